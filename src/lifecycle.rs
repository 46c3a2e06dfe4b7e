//! Install/activate lifecycle of static cache generations.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::net::Fetcher;
use crate::request::{Method, RequestKey};
use crate::store::{self, CacheStore};

/// Prefix shared by all static generations; the suffix is the deployed
/// version injected at process start.
const STATIC_PREFIX: &str = "static-";

/// Generation holding API snapshots. Its lifecycle is independent of
/// asset versioning and it survives every activation.
pub const RUNTIME_GENERATION: &str = "runtime";

pub fn static_generation(version: &str) -> String {
  format!("{}{}", STATIC_PREFIX, version)
}

fn is_static_generation(name: &str) -> bool {
  name.starts_with(STATIC_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// This version has no committed generation yet
  Uninstalled,
  /// Manifest pre-warm in progress
  Installing,
  /// Generation complete, waiting for takeover
  Installed,
  /// Deleting superseded generations
  Activating,
  /// Sole server of static content for this version
  Active,
}

impl LifecycleState {
  pub fn as_str(&self) -> &'static str {
    match self {
      LifecycleState::Uninstalled => "uninstalled",
      LifecycleState::Installing => "installing",
      LifecycleState::Installed => "installed",
      LifecycleState::Activating => "activating",
      LifecycleState::Active => "active",
    }
  }
}

impl std::fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Drives a version's generation through install and activation.
///
/// The manager is the sole writer of the generation-name set: handlers
/// only ever address the generation they were constructed with, so a
/// half-finished activation can never redirect an in-flight request.
pub struct LifecycleManager<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
  manifest: Vec<RequestKey>,
  state: LifecycleState,
}

impl<S: CacheStore, F: Fetcher> LifecycleManager<S, F> {
  pub fn new(
    store: Arc<S>,
    fetcher: Arc<F>,
    version: &str,
    origin: &Url,
    manifest_paths: &[String],
  ) -> Result<Self> {
    let manifest = manifest_paths
      .iter()
      .map(|path| RequestKey::for_path(origin, path, Method::Get))
      .collect::<Result<Vec<_>>>()?;

    let mut manager = Self {
      store,
      fetcher,
      generation: static_generation(version),
      manifest,
      state: LifecycleState::Uninstalled,
    };
    manager.resume_state()?;

    Ok(manager)
  }

  /// Re-derive state from the store so install and activate can run in
  /// separate process invocations.
  ///
  /// A generation counts as serviceable only when it holds the complete
  /// manifest; a partially populated one (write-through misses before a
  /// successful install) stays uninstalled.
  fn resume_state(&mut self) -> Result<()> {
    self.state = LifecycleState::Uninstalled;

    let names = self.store.generation_names()?;
    if !names.iter().any(|name| name == &self.generation) {
      return Ok(());
    }
    if self.store.entry_count(&self.generation)? < self.manifest.len() {
      return Ok(());
    }

    let superseded_present = names
      .iter()
      .any(|name| is_static_generation(name) && name != &self.generation);

    self.state = if superseded_present {
      LifecycleState::Installed
    } else {
      LifecycleState::Active
    };
    Ok(())
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Name of this version's static generation.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Pre-warm this version's generation from the manifest.
  ///
  /// Failure discards the partial generation, so a version that cannot
  /// complete its manifest is never observable as current and any
  /// previously active generation keeps serving unaffected. The install
  /// may be retried on the next opportunity.
  pub async fn install(&mut self) -> Result<usize> {
    self.state = LifecycleState::Installing;

    // A reinstall over an already-complete generation must not discard
    // it on failure; only a generation with nothing in it yet is ours to
    // clean up.
    let fresh = self.store.entry_count(&self.generation)? == 0;
    self.store.open_generation(&self.generation)?;

    match store::precache(
      self.store.as_ref(),
      self.fetcher.as_ref(),
      &self.generation,
      &self.manifest,
    )
    .await
    {
      Ok(count) => {
        self.state = LifecycleState::Installed;
        info!(generation = %self.generation, assets = count, "install complete");
        Ok(count)
      }
      Err(e) => {
        if fresh {
          if let Err(discard) = self.store.delete_generation(&self.generation) {
            warn!(generation = %self.generation, error = %discard, "failed to discard partial generation");
          }
        }
        self.resume_state()?;
        Err(e.wrap_err("install failed"))
      }
    }
  }

  /// Commit this version as the sole server of static content.
  ///
  /// Every other generation except the runtime one is deleted, so no two
  /// versions' assets are ever served interleaved. A deletion that keeps
  /// failing is tolerated and swept on a later activation.
  pub async fn activate(&mut self) -> Result<()> {
    match self.state {
      LifecycleState::Installed => {}
      LifecycleState::Active => {
        info!(generation = %self.generation, "already active");
        return Ok(());
      }
      other => return Err(eyre!("cannot activate from state {}", other)),
    }

    self.state = LifecycleState::Activating;

    for name in self.store.generation_names()? {
      if name == self.generation || name == RUNTIME_GENERATION {
        continue;
      }

      if let Err(first) = self.store.delete_generation(&name) {
        warn!(generation = %name, error = %first, "generation delete failed, retrying");
        if let Err(second) = self.store.delete_generation(&name) {
          warn!(generation = %name, error = %second, "generation delete failed again, leaving for a later sweep");
        }
      } else {
        info!(generation = %name, "deleted superseded generation");
      }
    }

    self.state = LifecycleState::Active;
    info!(generation = %self.generation, "activation complete");
    Ok(())
  }
}
