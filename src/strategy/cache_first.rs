//! Cache-first resolution for bundled static assets.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::net::Fetcher;
use crate::request::RequestKey;
use crate::response::{ServeSource, ServedResponse};
use crate::store::CacheStore;

/// Resolves static-asset requests, preferring the persisted snapshot.
///
/// A hit is served with no network round-trip. A miss is fetched and
/// written through. Never returns an error: every failure degrades to the
/// cached offline substitute or a synthesized 503.
pub struct CacheFirst<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
  fallback: Option<RequestKey>,
}

impl<S: CacheStore, F: Fetcher> CacheFirst<S, F> {
  pub fn new(
    store: Arc<S>,
    fetcher: Arc<F>,
    generation: impl Into<String>,
    fallback: Option<RequestKey>,
  ) -> Self {
    Self {
      store,
      fetcher,
      generation: generation.into(),
      fallback,
    }
  }

  pub async fn handle(&self, key: &RequestKey) -> ServedResponse {
    match self.store.lookup(&self.generation, key) {
      Ok(Some(cached)) => {
        debug!(%key, "serving from cache");
        return ServedResponse::from_stored(&cached, ServeSource::Cache);
      }
      Ok(None) => {}
      // Read failure is a miss, not a fault
      Err(e) => warn!(%key, error = %e, "cache read failed, treating as miss"),
    }

    match self.fetcher.fetch(key).await {
      Ok(response) => {
        let stored = response.into_stored();
        if stored.is_success() {
          if let Err(e) = self.store.store(&self.generation, key, &stored) {
            warn!(%key, error = %e, "failed to cache fetched asset");
          }
        }
        ServedResponse::from_stored(&stored, ServeSource::Network)
      }
      Err(e) => {
        warn!(%key, error = %e, "asset fetch failed, degrading");
        self.offline_response()
      }
    }
  }

  fn offline_response(&self) -> ServedResponse {
    if let Some(fallback) = &self.fallback {
      if let Ok(Some(cached)) = self.store.lookup(&self.generation, fallback) {
        return ServedResponse::from_stored(&cached, ServeSource::Fallback);
      }
    }
    ServedResponse::offline_asset()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::ScriptedFetcher;
  use crate::response::StoredResponse;
  use crate::store::MemoryStore;

  const GENERATION: &str = "static-1.0.0";

  fn handler(
    store: Arc<MemoryStore>,
    fetcher: Arc<ScriptedFetcher>,
    fallback: Option<&str>,
  ) -> CacheFirst<MemoryStore, ScriptedFetcher> {
    store.open_generation(GENERATION).unwrap();
    let fallback = fallback.map(|u| RequestKey::get(u).unwrap());
    CacheFirst::new(store, fetcher, GENERATION, fallback)
  }

  fn key(url: &str) -> RequestKey {
    RequestKey::get(url).unwrap()
  }

  #[tokio::test]
  async fn test_hit_serves_cached_with_zero_network_calls() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let handler = handler(store.clone(), fetcher.clone(), None);

    let k = key("https://app.example.org/app.js");
    store
      .store(GENERATION, &k, &StoredResponse::new(200, Vec::new(), b"cached".to_vec()))
      .unwrap();
    fetcher.set_online(false);

    let response = handler.handle(&k).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"cached");
    assert_eq!(response.source, ServeSource::Cache);
    assert_eq!(fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_writes_through() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let handler = handler(store.clone(), fetcher.clone(), None);

    let k = key("https://app.example.org/late.js");
    fetcher.route(k.url_str(), 200, b"fresh");

    let response = handler.handle(&k).await;
    assert_eq!(response.source, ServeSource::Network);
    assert_eq!(fetcher.calls(), 1);

    // Populated: a second request is served offline without a fetch
    fetcher.set_online(false);
    let response = handler.handle(&k).await;
    assert_eq!(response.body, b"fresh");
    assert_eq!(response.source, ServeSource::Cache);
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_non_success_fetch_is_served_but_not_cached() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let handler = handler(store.clone(), fetcher.clone(), None);

    let k = key("https://app.example.org/gone.js");
    let response = handler.handle(&k).await;
    assert_eq!(response.status, 404);
    assert_eq!(store.entry_count(GENERATION).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_offline_miss_uses_cached_fallback() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let handler = handler(
      store.clone(),
      fetcher.clone(),
      Some("https://app.example.org/offline.html"),
    );

    store
      .store(
        GENERATION,
        &key("https://app.example.org/offline.html"),
        &StoredResponse::new(200, Vec::new(), b"<offline>".to_vec()),
      )
      .unwrap();
    fetcher.set_online(false);

    let response = handler.handle(&key("https://app.example.org/uncached")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"<offline>");
    assert_eq!(response.source, ServeSource::Fallback);
  }

  #[tokio::test]
  async fn test_offline_miss_without_fallback_synthesizes_503() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let handler = handler(store, fetcher.clone(), None);
    fetcher.set_online(false);

    let response = handler.handle(&key("https://app.example.org/uncached")).await;
    assert_eq!(response.status, 503);
    assert_eq!(response.source, ServeSource::Synthesized);
  }
}
