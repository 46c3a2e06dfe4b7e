//! Deferred mutation queue: mutations attempted while offline are
//! recorded durably and replayed when connectivity returns.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::net::FetchError;
use crate::store::MutationLog;

/// Replay action registered for one mutation tag.
///
/// Receives the opaque payload and performs the live delivery. Targets
/// must tolerate duplicate submission: delivery is at-least-once, and a
/// record is removed only after a confirmed success.
pub type ReplayHandler =
  Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, std::result::Result<(), FetchError>> + Send + Sync>;

/// Outcome of handling one connectivity-restored trigger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
  pub replayed: usize,
  pub remaining: usize,
  pub dropped: usize,
}

/// Outcome of submitting a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// Delivered live.
  Delivered,
  /// Connectivity is out; recorded for replay under the returned id.
  Queued(i64),
}

pub struct SyncQueue<L> {
  log: Arc<L>,
  handlers: Mutex<HashMap<String, ReplayHandler>>,
  max_attempts: u32,
}

impl<L: MutationLog> SyncQueue<L> {
  pub fn new(log: Arc<L>, max_attempts: u32) -> Self {
    Self {
      log,
      handlers: Mutex::new(HashMap::new()),
      max_attempts,
    }
  }

  /// Register the replay action for a mutation tag. Queueing is enabled
  /// only for registered tags.
  pub fn register(&self, tag: &str, handler: ReplayHandler) {
    if let Ok(mut handlers) = self.handlers.lock() {
      handlers.insert(tag.to_string(), handler);
    }
  }

  fn handler(&self, tag: &str) -> Result<ReplayHandler> {
    self
      .handlers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .get(tag)
      .cloned()
      .ok_or_else(|| eyre!("No replay handler registered for tag {}", tag))
  }

  /// Attempt a mutation now; record it durably if connectivity is out.
  ///
  /// Only connectivity failures queue. A rejection (the server said no)
  /// propagates to the caller, because replaying it later would fail the
  /// same way.
  pub async fn submit(&self, tag: &str, payload: &[u8]) -> Result<SubmitOutcome> {
    let handler = self.handler(tag)?;

    match handler(payload.to_vec()).await {
      Ok(()) => Ok(SubmitOutcome::Delivered),
      Err(e) if e.is_connectivity() => {
        let id = self.log.append(tag, payload)?;
        info!(tag, id, "mutation queued for replay");
        Ok(SubmitOutcome::Queued(id))
      }
      Err(e) => Err(eyre!("Mutation for tag {} rejected: {}", tag, e)),
    }
  }

  /// Connectivity-restored trigger: replay pending records for `tag` in
  /// FIFO order.
  ///
  /// The cycle stops at the first failure so per-tag order holds and no
  /// record runs twice within one trigger. A record that keeps failing
  /// past the attempt cap is dropped and surfaced as an error.
  pub async fn on_sync(&self, tag: &str) -> Result<SyncOutcome> {
    let handler = self.handler(tag)?;
    let mut outcome = SyncOutcome::default();

    for record in self.log.pending(tag)? {
      match handler(record.payload.clone()).await {
        Ok(()) => {
          self.log.remove(record.id)?;
          outcome.replayed += 1;
          info!(tag, id = record.id, "replayed queued mutation");
        }
        Err(e) => {
          if record.attempts + 1 >= self.max_attempts {
            self.log.remove(record.id)?;
            outcome.dropped += 1;
            error!(
              tag,
              id = record.id,
              attempts = record.attempts + 1,
              error = %e,
              "dropping mutation after repeated replay failures"
            );
          } else {
            self.log.record_attempt(record.id)?;
            warn!(tag, id = record.id, error = %e, "replay failed, keeping record queued");
          }
          break;
        }
      }
    }

    outcome.remaining = self.log.pending(tag)?.len();
    Ok(outcome)
  }
}
