//! Response snapshots and the responses handlers hand back to callers.

use chrono::{DateTime, Utc};

/// A response snapshot as persisted in a cache generation.
///
/// Entries are immutable once written except by whole replacement under
/// the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      stored_at: Utc::now(),
    }
  }

  /// Handlers only persist success-range responses.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[allow(dead_code)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn age_minutes(&self) -> i64 {
    (Utc::now() - self.stored_at).num_minutes()
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Fresh from the network
  Network,
  /// Persisted snapshot, served without a network round-trip
  Cache,
  /// Persisted snapshot served because the network failed; may be stale
  StaleCache,
  /// The designated offline substitute asset
  Fallback,
  /// Synthesized by the gateway; nothing cached, nothing reachable
  Synthesized,
}

impl ServeSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServeSource::Network => "network",
      ServeSource::Cache => "cache",
      ServeSource::StaleCache => "stale-cache",
      ServeSource::Fallback => "fallback",
      ServeSource::Synthesized => "synthesized",
    }
  }
}

impl std::fmt::Display for ServeSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What a handler returns to the dispatch point.
///
/// Handlers never fail: the worst case is a synthesized offline response,
/// so the calling application can always render a friendly offline state.
#[derive(Debug, Clone)]
pub struct ServedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ServeSource,
}

impl ServedResponse {
  pub fn from_stored(stored: &StoredResponse, source: ServeSource) -> Self {
    Self {
      status: stored.status,
      headers: stored.headers.clone(),
      body: stored.body.clone(),
      source,
    }
  }

  /// Synthesized 503 for a static asset with no cached copy and no
  /// reachable network.
  pub fn offline_asset() -> Self {
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: b"Offline - content not available".to_vec(),
      source: ServeSource::Synthesized,
    }
  }

  /// Synthesized, machine-readable offline error for API requests.
  pub fn offline_api() -> Self {
    let body = serde_json::json!({ "error": "offline", "retryable": true });
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: body.to_string().into_bytes(),
      source: ServeSource::Synthesized,
    }
  }
}
