//! The single dispatch point: classifies every event and routes it to
//! the component that can absorb its failures.

use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::event::{ControlMessage, GatewayEvent};
use crate::lifecycle::{LifecycleManager, LifecycleState, RUNTIME_GENERATION};
use crate::net::{FetchError, Fetcher};
use crate::notify::{Alert, ClientRegistry, NotificationDispatcher};
use crate::request::{Classifier, Method, RequestKey, RouteClass};
use crate::response::ServedResponse;
use crate::store::{self, CacheStore, MutationLog};
use crate::strategy::{CacheFirst, NetworkFirst};
use crate::sync::{ReplayHandler, SubmitOutcome, SyncOutcome, SyncQueue};

/// Result of routing one intercepted request.
#[derive(Debug)]
pub enum Dispatch {
  /// The gateway produced a response
  Response(ServedResponse),
  /// Cross-origin request; the caller goes to the network untouched
  Bypass,
}

/// Result of one dispatched event.
#[derive(Debug)]
pub enum Outcome {
  Done,
  Fetch(Dispatch),
  Alert(Alert),
  Sync(SyncOutcome),
}

/// Point-in-time snapshot for the status command.
#[derive(Debug)]
pub struct GatewayStatus {
  pub state: LifecycleState,
  pub generation: String,
  /// Generation name and entry count
  pub generations: Vec<(String, usize)>,
  /// Mutation tag and queue depth
  pub queues: Vec<(String, usize)>,
}

/// Owns every component and routes events between them.
///
/// Constructed once per process from injected dependencies; nothing in
/// here is process-global, so tests instantiate gateways freely.
pub struct Gateway<S, F, R> {
  classifier: Classifier,
  assets: CacheFirst<S, F>,
  api: NetworkFirst<S, F>,
  lifecycle: LifecycleManager<S, F>,
  queue: SyncQueue<S>,
  notifier: NotificationDispatcher<R>,
  registry: Arc<R>,
  store: Arc<S>,
  fetcher: Arc<F>,
  origin: Url,
}

impl<S, F, R> Gateway<S, F, R>
where
  S: CacheStore + MutationLog + 'static,
  F: Fetcher + 'static,
  R: ClientRegistry,
{
  pub fn new(config: &Config, store: Arc<S>, fetcher: Arc<F>, registry: Arc<R>) -> Result<Self> {
    let origin = config.origin_url()?;

    let lifecycle = LifecycleManager::new(
      store.clone(),
      fetcher.clone(),
      &config.version,
      &origin,
      &config.manifest,
    )?;

    // Handlers address these generations by name for the whole process
    let generation = lifecycle.generation().to_string();
    store.open_generation(&generation)?;
    store.open_generation(RUNTIME_GENERATION)?;

    let fallback = config
      .offline_fallback
      .as_deref()
      .map(|path| RequestKey::for_path(&origin, path, Method::Get))
      .transpose()?;

    let assets = CacheFirst::new(store.clone(), fetcher.clone(), generation, fallback);
    let api = NetworkFirst::new(store.clone(), fetcher.clone(), RUNTIME_GENERATION);

    let queue = SyncQueue::new(store.clone(), config.sync.max_attempts);
    for route in &config.sync.routes {
      let target = origin
        .join(&route.target)
        .map_err(|e| eyre!("Invalid sync target {}: {}", route.target, e))?;
      queue.register(&route.tag, replay_to(fetcher.clone(), target));
    }

    let notifier = NotificationDispatcher::new(registry.clone(), config.notifications.clone());

    Ok(Self {
      classifier: Classifier::new(origin.clone(), config.api_prefix.clone()),
      assets,
      api,
      lifecycle,
      queue,
      notifier,
      registry,
      store,
      fetcher,
      origin,
    })
  }

  /// Dispatch table: one handler per event kind, each awaited to
  /// completion.
  pub async fn dispatch(&mut self, event: GatewayEvent) -> Result<Outcome> {
    match event {
      GatewayEvent::Fetch { key } => Ok(Outcome::Fetch(self.handle_fetch(&key).await)),
      GatewayEvent::Install => {
        self.lifecycle.install().await?;
        Ok(Outcome::Done)
      }
      GatewayEvent::Activate => {
        self.activate().await?;
        Ok(Outcome::Done)
      }
      GatewayEvent::Sync { tag } => Ok(Outcome::Sync(self.queue.on_sync(&tag).await?)),
      GatewayEvent::Push { payload } => {
        Ok(Outcome::Alert(self.notifier.on_push(payload.as_deref())))
      }
      GatewayEvent::Message { message } => {
        self.on_message(message).await?;
        Ok(Outcome::Done)
      }
    }
  }

  /// Route one intercepted request to the matching strategy.
  pub async fn handle_fetch(&self, key: &RequestKey) -> Dispatch {
    match self.classifier.classify(key) {
      RouteClass::CrossOrigin => {
        debug!(%key, "cross-origin request, bypassing");
        Dispatch::Bypass
      }
      RouteClass::Api => Dispatch::Response(self.api.handle(key).await),
      RouteClass::Static => Dispatch::Response(self.assets.handle(key).await),
    }
  }

  async fn activate(&mut self) -> Result<()> {
    self.lifecycle.activate().await?;
    // Route every open window through the new generation without a reload
    self.registry.claim();
    Ok(())
  }

  async fn on_message(&mut self, message: ControlMessage) -> Result<()> {
    match message {
      ControlMessage::SkipWaiting => {
        if self.lifecycle.state() == LifecycleState::Installed {
          info!("skip-waiting requested, activating now");
          self.activate().await
        } else {
          warn!(state = self.lifecycle.state().as_str(), "skip-waiting ignored");
          Ok(())
        }
      }
      ControlMessage::CacheUrls { urls } => {
        let keys = urls
          .iter()
          .map(|path| RequestKey::for_path(&self.origin, path, Method::Get))
          .collect::<Result<Vec<_>>>()?;
        let generation = self.lifecycle.generation().to_string();

        // Unlike the install-time pre-warm, failure here is recoverable
        match store::precache(self.store.as_ref(), self.fetcher.as_ref(), &generation, &keys)
          .await
        {
          Ok(count) => info!(count, "pre-warmed additional URLs"),
          Err(e) => warn!(error = %e, "additional pre-warm failed"),
        }
        Ok(())
      }
    }
  }

  /// Attempt a mutation now; queue it for replay if connectivity is out.
  pub async fn submit(&self, tag: &str, payload: &[u8]) -> Result<SubmitOutcome> {
    self.queue.submit(tag, payload).await
  }

  /// Route a user interaction on a rendered alert.
  pub fn on_click(&self, action: &str, alert: &Alert) {
    self.notifier.on_click(action, alert);
  }

  pub fn status(&self) -> Result<GatewayStatus> {
    let mut generations = Vec::new();
    for name in self.store.generation_names()? {
      let count = self.store.entry_count(&name)?;
      generations.push((name, count));
    }

    let mut queues = Vec::new();
    for tag in self.store.pending_tags()? {
      let depth = self.store.pending(&tag)?.len();
      queues.push((tag, depth));
    }

    Ok(GatewayStatus {
      state: self.lifecycle.state(),
      generation: self.lifecycle.generation().to_string(),
      generations,
      queues,
    })
  }
}

/// Default replay action: POST the recorded payload to `target`. A
/// non-success status counts as a failed replay so the record stays
/// queued.
fn replay_to<F: Fetcher + 'static>(fetcher: Arc<F>, target: Url) -> ReplayHandler {
  Arc::new(move |payload: Vec<u8>| {
    let fetcher = fetcher.clone();
    let url = target.to_string();
    async move {
      let response = fetcher.submit(&url, payload, "application/json").await?;
      if response.is_success() {
        Ok(())
      } else {
        Err(FetchError::Rejected {
          url,
          reason: format!("status {}", response.status),
        })
      }
    }
    .boxed()
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::ScriptedFetcher;
  use crate::notify::testing::RecordingRegistry;
  use crate::response::ServeSource;
  use crate::store::MemoryStore;

  fn config(version: &str, manifest: &[&str]) -> Config {
    let yaml = format!(
      r#"
version: "{}"
origin: "https://app.example.org"
manifest: [{}]
offline_fallback: /offline.html
sync:
  routes:
    - tag: sync-donations
      target: /api/donations
"#,
      version,
      manifest
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect::<Vec<_>>()
        .join(", ")
    );
    serde_yaml::from_str(&yaml).unwrap()
  }

  fn gateway(
    config: &Config,
    store: Arc<MemoryStore>,
    fetcher: Arc<ScriptedFetcher>,
  ) -> Gateway<MemoryStore, ScriptedFetcher, RecordingRegistry> {
    Gateway::new(config, store, fetcher, Arc::new(RecordingRegistry::default())).unwrap()
  }

  fn key(url: &str) -> RequestKey {
    RequestKey::get(url).unwrap()
  }

  #[tokio::test]
  async fn test_install_activate_then_serve_offline() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.route("https://app.example.org/app.js", 200, b"js-v1");
    fetcher.route("https://app.example.org/app.css", 200, b"css-v1");

    let config = config("1.0.0", &["/app.js", "/app.css"]);
    let mut gateway = gateway(&config, store, fetcher.clone());

    gateway.dispatch(GatewayEvent::Install).await.unwrap();
    gateway.dispatch(GatewayEvent::Activate).await.unwrap();

    fetcher.set_online(false);
    let calls_before = fetcher.calls();

    match gateway.handle_fetch(&key("https://app.example.org/app.js")).await {
      Dispatch::Response(response) => {
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"js-v1");
        assert_eq!(response.source, ServeSource::Cache);
      }
      Dispatch::Bypass => panic!("expected a response"),
    }
    // No fetch was attempted for the cached asset
    assert_eq!(fetcher.calls(), calls_before);
  }

  #[tokio::test]
  async fn test_version_transition_leaves_one_static_generation() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.route("https://app.example.org/app.js", 200, b"js");
    fetcher.route("https://app.example.org/app.css", 200, b"css");
    fetcher.route("https://app.example.org/app.v2.css", 200, b"css2");

    let v1 = config("1.0.0", &["/app.js", "/app.css"]);
    let mut gateway_v1 = gateway(&v1, store.clone(), fetcher.clone());
    gateway_v1.dispatch(GatewayEvent::Install).await.unwrap();
    gateway_v1.dispatch(GatewayEvent::Activate).await.unwrap();

    // Redeploy with a changed manifest
    let v2 = config("2.0.0", &["/app.js", "/app.v2.css"]);
    let mut gateway_v2 = gateway(&v2, store.clone(), fetcher);
    gateway_v2.dispatch(GatewayEvent::Install).await.unwrap();
    gateway_v2.dispatch(GatewayEvent::Activate).await.unwrap();

    let statics: Vec<String> = store
      .generation_names()
      .unwrap()
      .into_iter()
      .filter(|name| name.starts_with("static-"))
      .collect();
    assert_eq!(statics, vec!["static-2.0.0"]);
  }

  #[tokio::test]
  async fn test_api_requests_round_trip_through_runtime_generation() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.route("https://app.example.org/api/donors", 200, b"[1,2]");

    let config = config("1.0.0", &[]);
    let gateway = gateway(&config, store, fetcher.clone());

    let k = key("https://app.example.org/api/donors");
    match gateway.handle_fetch(&k).await {
      Dispatch::Response(response) => assert_eq!(response.source, ServeSource::Network),
      Dispatch::Bypass => panic!("expected a response"),
    }

    fetcher.set_online(false);
    match gateway.handle_fetch(&k).await {
      Dispatch::Response(response) => {
        assert_eq!(response.body, b"[1,2]");
        assert_eq!(response.source, ServeSource::StaleCache);
      }
      Dispatch::Bypass => panic!("expected a response"),
    }
  }

  #[tokio::test]
  async fn test_cross_origin_is_bypassed() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let config = config("1.0.0", &[]);
    let gateway = gateway(&config, store, fetcher.clone());

    let dispatch = gateway
      .handle_fetch(&key("https://cdn.example.net/lib.js"))
      .await;
    assert!(matches!(dispatch, Dispatch::Bypass));
    assert_eq!(fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_and_claims_clients() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.route("https://app.example.org/app.js", 200, b"js");

    let config = config("1.0.0", &["/app.js"]);
    let registry = Arc::new(RecordingRegistry::default());
    let mut gateway =
      Gateway::new(&config, store, fetcher, registry.clone()).unwrap();

    gateway.dispatch(GatewayEvent::Install).await.unwrap();
    gateway
      .dispatch(GatewayEvent::Message {
        message: ControlMessage::SkipWaiting,
      })
      .await
      .unwrap();

    assert_eq!(gateway.status().unwrap().state, LifecycleState::Active);
    assert_eq!(*registry.claims.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_cache_urls_message_prewarms_current_generation() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.route("https://app.example.org/extra.js", 200, b"extra");

    let config = config("1.0.0", &[]);
    let mut gateway = gateway(&config, store.clone(), fetcher);

    gateway
      .dispatch(GatewayEvent::Message {
        message: ControlMessage::CacheUrls {
          urls: vec!["/extra.js".to_string()],
        },
      })
      .await
      .unwrap();

    let k = key("https://app.example.org/extra.js");
    assert!(store.lookup("static-1.0.0", &k).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_offline_mutation_queues_then_syncs_once() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let config = config("1.0.0", &[]);
    let mut gateway = gateway(&config, store.clone(), fetcher.clone());

    fetcher.set_online(false);
    let outcome = gateway
      .submit("sync-donations", br#"{"donor":7}"#)
      .await
      .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    assert_eq!(store.pending("sync-donations").unwrap().len(), 1);

    fetcher.set_online(true);
    let outcome = gateway
      .dispatch(GatewayEvent::Sync {
        tag: "sync-donations".to_string(),
      })
      .await
      .unwrap();

    match outcome {
      Outcome::Sync(sync) => {
        assert_eq!(sync.replayed, 1);
        assert_eq!(sync.remaining, 0);
      }
      other => panic!("expected sync outcome, got {:?}", other),
    }

    // Exactly one delivery reached the target
    let submissions = fetcher.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, "https://app.example.org/api/donations");
    assert!(store.pending("sync-donations").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_mutation_is_not_queued() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set_submit_status(422);

    let config = config("1.0.0", &[]);
    let gateway = gateway(&config, store.clone(), fetcher);

    // The server said no; replaying later would fail the same way
    assert!(gateway.submit("sync-donations", b"{}").await.is_err());
    assert!(store.pending("sync-donations").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_push_event_renders_alert() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let config = config("1.0.0", &[]);
    let mut gateway = gateway(&config, store, fetcher);

    let outcome = gateway
      .dispatch(GatewayEvent::Push { payload: None })
      .await
      .unwrap();

    match outcome {
      Outcome::Alert(alert) => {
        assert!(!alert.title.is_empty());
        assert!(!alert.body.is_empty());
      }
      other => panic!("expected alert, got {:?}", other),
    }
  }
}
