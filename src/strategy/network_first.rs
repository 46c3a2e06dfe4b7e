//! Network-first resolution for volatile API data.

use std::sync::Arc;
use tracing::{info, warn};

use crate::net::Fetcher;
use crate::request::RequestKey;
use crate::response::{ServeSource, ServedResponse};
use crate::store::CacheStore;

/// Resolves API-like requests, preferring a live fetch.
///
/// Successful responses are snapshotted into the runtime generation,
/// which is independent of asset versioning. On network failure the last
/// snapshot is served, labeled `StaleCache`; with neither available the
/// caller gets a structured offline error, never an exception.
pub struct NetworkFirst<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
}

impl<S: CacheStore, F: Fetcher> NetworkFirst<S, F> {
  pub fn new(store: Arc<S>, fetcher: Arc<F>, generation: impl Into<String>) -> Self {
    Self {
      store,
      fetcher,
      generation: generation.into(),
    }
  }

  pub async fn handle(&self, key: &RequestKey) -> ServedResponse {
    match self.fetcher.fetch(key).await {
      Ok(response) => {
        let stored = response.into_stored();
        if stored.is_success() {
          if let Err(e) = self.store.store(&self.generation, key, &stored) {
            warn!(%key, error = %e, "failed to snapshot API response");
          }
        }
        ServedResponse::from_stored(&stored, ServeSource::Network)
      }
      Err(e) => {
        warn!(%key, error = %e, "API fetch failed, falling back to snapshot");
        match self.store.lookup(&self.generation, key) {
          Ok(Some(cached)) => {
            info!(%key, age_minutes = cached.age_minutes(), "serving stale snapshot");
            ServedResponse::from_stored(&cached, ServeSource::StaleCache)
          }
          Ok(None) => ServedResponse::offline_api(),
          Err(e) => {
            warn!(%key, error = %e, "snapshot read failed");
            ServedResponse::offline_api()
          }
        }
      }
    }
  }
}
