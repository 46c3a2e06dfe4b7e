use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Deployed build version; tags the static cache generation. Injected
  /// here rather than compiled in, so several versions can coexist in
  /// one store.
  pub version: String,
  /// Application origin; requests elsewhere are bypassed
  pub origin: String,
  /// Path prefix marking API-like requests
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Static assets pre-warmed at install
  #[serde(default)]
  pub manifest: Vec<String>,
  /// Asset served when an uncached static request fails offline
  pub offline_fallback: Option<String>,
  /// Cache database directory override
  pub cache_dir: Option<PathBuf>,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Replays per record before it is dropped and surfaced as an error
  pub max_attempts: u32,
  pub routes: Vec<SyncRoute>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: 8,
      routes: Vec::new(),
    }
  }
}

/// One mutation class: records tagged `tag` replay as POSTs to `target`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRoute {
  pub tag: String,
  pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub default_title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      default_title: "Notification".to_string(),
      default_body: "You have a new notification".to_string(),
      icon: "/assets/icons/icon-192x192.png".to_string(),
      badge: "/assets/icons/icon-96x96.png".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offramp.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offramp/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offramp/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offramp.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offramp").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("Config field 'version' must not be empty"));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("Config field 'api_prefix' must start with '/'"));
    }
    if self.sync.max_attempts == 0 {
      return Err(eyre!("Config field 'sync.max_attempts' must be at least 1"));
    }
    self.origin_url()?;
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if url.host_str().is_none() {
      return Err(eyre!("Origin {} has no host", self.origin));
    }
    Ok(url)
  }
}
