//! Generation-partitioned response store and durable mutation log.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CacheStore, MutationLog, QueuedMutation};

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::net::Fetcher;
use crate::request::RequestKey;

/// Bulk pre-warm: fetch every descriptor and commit the set as a unit.
///
/// Nothing is written unless every fetch succeeded with a success status,
/// so a failed pre-warm leaves the generation exactly as it was.
pub async fn precache<S, F>(
  store: &S,
  fetcher: &F,
  generation: &str,
  keys: &[RequestKey],
) -> Result<usize>
where
  S: CacheStore,
  F: Fetcher,
{
  let mut fetched = Vec::with_capacity(keys.len());

  for key in keys {
    let response = fetcher
      .fetch(key)
      .await
      .map_err(|e| eyre!("Pre-warm fetch failed for {}: {}", key, e))?;

    if !response.is_success() {
      return Err(eyre!(
        "Pre-warm fetch for {} returned status {}",
        key,
        response.status
      ));
    }

    fetched.push((key, response.into_stored()));
  }

  for (key, stored) in &fetched {
    store.store(generation, key, stored)?;
  }

  debug!(generation, count = fetched.len(), "pre-warmed generation");
  Ok(fetched.len())
}
