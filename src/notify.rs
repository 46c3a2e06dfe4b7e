//! Push payload handling and alert dispatch.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::NotificationsConfig;

/// Vibration pattern attached to every rendered alert.
const VIBRATE_PATTERN: &[u32] = &[200, 100, 200];

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

/// Wire payload of a push message. Every field defaults, so a malformed
/// or absent payload still renders.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
  pub url: String,
}

impl PushPayload {
  /// Parse a raw payload, tolerating absence and malformed JSON.
  pub fn parse(raw: Option<&[u8]>) -> Self {
    match raw {
      Some(bytes) => serde_json::from_slice(bytes).unwrap_or_else(|e| {
        warn!(error = %e, "malformed push payload, using defaults");
        PushPayload::default()
      }),
      None => PushPayload::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertAction {
  pub action: String,
  pub title: String,
}

/// A rendered system notification.
#[derive(Debug, Clone)]
pub struct Alert {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Navigation target carried by the "open" action.
  pub url: String,
  pub actions: Vec<AlertAction>,
}

/// An application window known to the client registry.
#[derive(Debug, Clone)]
pub struct ClientWindow {
  pub id: String,
  pub url: String,
}

/// Window-management surface of the hosting application shell.
pub trait ClientRegistry: Send + Sync {
  fn windows(&self) -> Vec<ClientWindow>;

  /// Bring a window to the foreground. Returns false if it is gone.
  fn focus(&self, id: &str) -> bool;

  fn open_window(&self, url: &str);

  /// Route all open windows through this process (activation handoff).
  fn claim(&self);
}

/// Registry for detached runs: there are no windows to manage, so
/// navigation requests are logged and claiming is a no-op.
#[derive(Debug, Default)]
pub struct HeadlessRegistry;

impl ClientRegistry for HeadlessRegistry {
  fn windows(&self) -> Vec<ClientWindow> {
    Vec::new()
  }

  fn focus(&self, _id: &str) -> bool {
    false
  }

  fn open_window(&self, url: &str) {
    info!(url, "open window requested");
  }

  fn claim(&self) {
    debug!("claimed clients");
  }
}

/// Turns push payloads into alerts and routes alert interactions.
///
/// Stateless: each notification is independent beyond its own payload.
pub struct NotificationDispatcher<R> {
  registry: Arc<R>,
  config: NotificationsConfig,
}

impl<R: ClientRegistry> NotificationDispatcher<R> {
  pub fn new(registry: Arc<R>, config: NotificationsConfig) -> Self {
    Self { registry, config }
  }

  /// Render the alert for an incoming push payload. Never rejects.
  pub fn on_push(&self, raw: Option<&[u8]>) -> Alert {
    let payload = PushPayload::parse(raw);

    let title = if payload.title.is_empty() {
      self.config.default_title.clone()
    } else {
      payload.title
    };
    let body = if payload.body.is_empty() {
      self.config.default_body.clone()
    } else {
      payload.body
    };
    let url = if payload.url.is_empty() {
      "/".to_string()
    } else {
      payload.url
    };

    info!(%title, "rendering push alert");
    Alert {
      title,
      body,
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibrate: VIBRATE_PATTERN.to_vec(),
      url,
      actions: vec![
        AlertAction {
          action: ACTION_OPEN.to_string(),
          title: "Open App".to_string(),
        },
        AlertAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }
  }

  /// Route a user interaction on a rendered alert. The default (empty)
  /// action navigates like "open"; "dismiss" closes with no further
  /// action.
  pub fn on_click(&self, action: &str, alert: &Alert) {
    if action == ACTION_DISMISS {
      debug!("alert dismissed");
      return;
    }

    for window in self.registry.windows() {
      if window.url == alert.url && self.registry.focus(&window.id) {
        debug!(url = %alert.url, "focused existing window");
        return;
      }
    }
    self.registry.open_window(&alert.url);
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::sync::Mutex;

  /// Registry that records every interaction.
  #[derive(Default)]
  pub struct RecordingRegistry {
    pub open_windows: Mutex<Vec<ClientWindow>>,
    pub focused: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
    pub claims: Mutex<usize>,
  }

  impl RecordingRegistry {
    pub fn with_window(self, id: &str, url: &str) -> Self {
      self.open_windows.lock().unwrap().push(ClientWindow {
        id: id.to_string(),
        url: url.to_string(),
      });
      self
    }
  }

  impl ClientRegistry for RecordingRegistry {
    fn windows(&self) -> Vec<ClientWindow> {
      self.open_windows.lock().unwrap().clone()
    }

    fn focus(&self, id: &str) -> bool {
      self.focused.lock().unwrap().push(id.to_string());
      true
    }

    fn open_window(&self, url: &str) {
      self.opened.lock().unwrap().push(url.to_string());
    }

    fn claim(&self) {
      *self.claims.lock().unwrap() += 1;
    }
  }
}
