//! Core traits of the persistence layer.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::request::RequestKey;
use crate::response::StoredResponse;

/// Generation-partitioned response cache.
///
/// Generations are named partitions; entries inside one are keyed by
/// normalized URL + method and replaced whole, never patched. Entries are
/// not shared across generations. Components coordinate purely through
/// generation names: a handler only writes to a generation it was
/// constructed with.
pub trait CacheStore: Send + Sync {
  /// Create the named generation if absent. Idempotent.
  fn open_generation(&self, name: &str) -> Result<()>;

  /// Exact-match lookup. A missing key is `Ok(None)`, not an error.
  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Store or replace the entry for `key`. The store does not filter by
  /// status; callers only pass responses they consider cacheable.
  fn store(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()>;

  /// Names of all generations currently present.
  fn generation_names(&self) -> Result<Vec<String>>;

  /// Number of entries in a generation (0 if the generation is absent).
  fn entry_count(&self, generation: &str) -> Result<usize>;

  /// Remove a generation and all its entries. Irreversible.
  fn delete_generation(&self, name: &str) -> Result<()>;
}

/// One recorded mutation awaiting replay.
#[derive(Debug, Clone)]
pub struct QueuedMutation {
  pub id: i64,
  pub tag: String,
  pub payload: Vec<u8>,
  pub enqueued_at: DateTime<Utc>,
  pub attempts: u32,
}

/// Durable FIFO log of mutations attempted while offline.
///
/// The log stores opaque payloads and asserts no semantics over them;
/// replay policy lives in the sync queue that owns it.
pub trait MutationLog: Send + Sync {
  /// Append a record. Returns its id.
  fn append(&self, tag: &str, payload: &[u8]) -> Result<i64>;

  /// Pending records for `tag`, oldest first.
  fn pending(&self, tag: &str) -> Result<Vec<QueuedMutation>>;

  /// Tags that currently have pending records.
  fn pending_tags(&self) -> Result<Vec<String>>;

  /// Bump the attempt counter after a failed replay.
  fn record_attempt(&self, id: i64) -> Result<()>;

  /// Drop a record after confirmed delivery (or after giving up).
  fn remove(&self, id: i64) -> Result<()>;
}
