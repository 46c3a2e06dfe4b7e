//! In-memory store backend.
//!
//! Mirrors the SQLite layout without touching disk. Used by tests and by
//! cache-disabled operation; durability guarantees obviously do not hold.

#![allow(dead_code)]

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::traits::{CacheStore, MutationLog, QueuedMutation};
use crate::request::RequestKey;
use crate::response::StoredResponse;

type EntryKey = (String, String); // url, method

#[derive(Default)]
struct Inner {
  generations: BTreeMap<String, HashMap<EntryKey, StoredResponse>>,
  queue: Vec<QueuedMutation>,
  next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn entry_key(key: &RequestKey) -> EntryKey {
  (key.url_str().to_string(), key.method().as_str().to_string())
}

impl CacheStore for MemoryStore {
  fn open_generation(&self, name: &str) -> Result<()> {
    self.lock()?.generations.entry(name.to_string()).or_default();
    Ok(())
  }

  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    Ok(
      self
        .lock()?
        .generations
        .get(generation)
        .and_then(|entries| entries.get(&entry_key(key)))
        .cloned(),
    )
  }

  fn store(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    self
      .lock()?
      .generations
      .entry(generation.to_string())
      .or_default()
      .insert(entry_key(key), response.clone());
    Ok(())
  }

  fn generation_names(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.generations.keys().cloned().collect())
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    Ok(
      self
        .lock()?
        .generations
        .get(generation)
        .map_or(0, HashMap::len),
    )
  }

  fn delete_generation(&self, name: &str) -> Result<()> {
    self.lock()?.generations.remove(name);
    Ok(())
  }
}

impl MutationLog for MemoryStore {
  fn append(&self, tag: &str, payload: &[u8]) -> Result<i64> {
    let mut inner = self.lock()?;
    inner.next_id += 1;
    let id = inner.next_id;
    inner.queue.push(QueuedMutation {
      id,
      tag: tag.to_string(),
      payload: payload.to_vec(),
      enqueued_at: Utc::now(),
      attempts: 0,
    });
    Ok(id)
  }

  fn pending(&self, tag: &str) -> Result<Vec<QueuedMutation>> {
    Ok(
      self
        .lock()?
        .queue
        .iter()
        .filter(|record| record.tag == tag)
        .cloned()
        .collect(),
    )
  }

  fn pending_tags(&self) -> Result<Vec<String>> {
    let inner = self.lock()?;
    let mut tags: Vec<String> = inner.queue.iter().map(|r| r.tag.clone()).collect();
    tags.sort();
    tags.dedup();
    Ok(tags)
  }

  fn record_attempt(&self, id: i64) -> Result<()> {
    let mut inner = self.lock()?;
    if let Some(record) = inner.queue.iter_mut().find(|r| r.id == id) {
      record.attempts += 1;
    }
    Ok(())
  }

  fn remove(&self, id: i64) -> Result<()> {
    self.lock()?.queue.retain(|r| r.id != id);
    Ok(())
  }
}
