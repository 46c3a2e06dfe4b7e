use serde::Deserialize;
use tracing::warn;

use crate::request::RequestKey;

/// Events delivered by the hosting runtime.
///
/// Each event is handled to completion before the runtime is signaled
/// ready for the next lifecycle transition; requests, sync triggers, and
/// pushes may interleave at await points.
#[derive(Debug)]
pub enum GatewayEvent {
  /// An intercepted outbound request
  Fetch { key: RequestKey },
  /// Pre-warm the configured version's generation
  Install,
  /// Commit the configured version and delete superseded generations
  Activate,
  /// Connectivity restored for one mutation tag
  Sync { tag: String },
  /// Incoming push message, raw payload if any
  Push { payload: Option<Vec<u8>> },
  /// Control message from the application shell
  Message { message: ControlMessage },
}

/// Typed cross-process control messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
  /// Demand immediate takeover without waiting for older instances
  SkipWaiting,
  /// Add URLs to the current static generation
  CacheUrls {
    #[serde(default)]
    urls: Vec<String>,
  },
}

impl ControlMessage {
  /// Parse a raw control message. Unknown or malformed input is
  /// tolerated and discarded, never an error.
  pub fn parse(raw: &[u8]) -> Option<Self> {
    match serde_json::from_slice(raw) {
      Ok(message) => Some(message),
      Err(e) => {
        warn!(error = %e, "ignoring unrecognized control message");
        None
      }
    }
  }
}
