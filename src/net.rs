//! Network access seam used by handlers, pre-warming, and replay.

use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use thiserror::Error;

use crate::request::{Method, RequestKey};
use crate::response::StoredResponse;

/// Failures crossing the network boundary.
///
/// `Unavailable` marks transport-level failures (connect, DNS, timeout):
/// the transient class expected under normal offline operation, and the
/// only one that makes a mutation eligible for queueing. Everything else
/// is `Rejected`.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network unavailable for {url}: {reason}")]
  Unavailable { url: String, reason: String },
  #[error("request failed for {url}: {reason}")]
  Rejected { url: String, reason: String },
}

impl FetchError {
  /// True for failures attributable to connectivity loss.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, FetchError::Unavailable { .. })
  }
}

/// A fetched response before any caching decision is made.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchedResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn into_stored(self) -> StoredResponse {
    StoredResponse::new(self.status, self.headers, self.body)
  }
}

/// Live network access.
///
/// Non-success statuses come back as `Ok`: only transport failures are
/// errors, so callers can tell "the server said no" from "offline".
#[allow(async_fn_in_trait)]
pub trait Fetcher: Send + Sync {
  /// Perform the read request described by `key`.
  async fn fetch(&self, key: &RequestKey) -> std::result::Result<FetchedResponse, FetchError>;

  /// POST an opaque payload to `url` (mutation delivery and replay).
  fn submit(
    &self,
    url: &str,
    body: Vec<u8>,
    content_type: &str,
  ) -> impl std::future::Future<Output = std::result::Result<FetchedResponse, FetchError>> + Send;
}

/// `Fetcher` backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

fn classify(url: &str, e: reqwest::Error) -> FetchError {
  if e.is_connect() || e.is_timeout() || e.is_request() {
    FetchError::Unavailable {
      url: url.to_string(),
      reason: e.to_string(),
    }
  } else {
    FetchError::Rejected {
      url: url.to_string(),
      reason: e.to_string(),
    }
  }
}

async fn read_response(response: reqwest::Response) -> std::result::Result<FetchedResponse, FetchError> {
  let status = response.status().as_u16();
  let url = response.url().to_string();
  let headers = response
    .headers()
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();
  let body = response
    .bytes()
    .await
    .map_err(|e| classify(&url, e))?
    .to_vec();

  Ok(FetchedResponse {
    status,
    headers,
    body,
  })
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, key: &RequestKey) -> std::result::Result<FetchedResponse, FetchError> {
    let request = match key.method() {
      Method::Get => self.client.get(key.url().clone()),
      Method::Head => self.client.head(key.url().clone()),
    };

    let response = request
      .send()
      .await
      .map_err(|e| classify(key.url_str(), e))?;

    read_response(response).await
  }

  async fn submit(
    &self,
    url: &str,
    body: Vec<u8>,
    content_type: &str,
  ) -> std::result::Result<FetchedResponse, FetchError> {
    let response = self
      .client
      .post(url)
      .header("content-type", content_type)
      .body(body)
      .send()
      .await
      .map_err(|e| classify(url, e))?;

    read_response(response).await
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Scripted fetcher for tests: canned responses per URL, a network
  /// switch, and call counting so tests can prove "zero network calls".
  pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    online: AtomicBool,
    calls: AtomicUsize,
    submissions: Mutex<Vec<(String, Vec<u8>)>>,
    submit_status: Mutex<u16>,
  }

  impl ScriptedFetcher {
    pub fn new() -> Self {
      Self {
        routes: Mutex::new(HashMap::new()),
        online: AtomicBool::new(true),
        calls: AtomicUsize::new(0),
        submissions: Mutex::new(Vec::new()),
        submit_status: Mutex::new(200),
      }
    }

    pub fn route(&self, url: &str, status: u16, body: &[u8]) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), (status, body.to_vec()));
    }

    pub fn set_online(&self, online: bool) {
      self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_submit_status(&self, status: u16) {
      *self.submit_status.lock().unwrap() = status;
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<(String, Vec<u8>)> {
      self.submissions.lock().unwrap().clone()
    }
  }

  impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, key: &RequestKey) -> std::result::Result<FetchedResponse, FetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);

      if !self.online.load(Ordering::SeqCst) {
        return Err(FetchError::Unavailable {
          url: key.url_str().to_string(),
          reason: "offline".to_string(),
        });
      }

      match self.routes.lock().unwrap().get(key.url_str()) {
        Some((status, body)) => Ok(FetchedResponse {
          status: *status,
          headers: vec![("content-type".to_string(), "text/plain".to_string())],
          body: body.clone(),
        }),
        None => Ok(FetchedResponse {
          status: 404,
          headers: Vec::new(),
          body: Vec::new(),
        }),
      }
    }

    async fn submit(
      &self,
      url: &str,
      body: Vec<u8>,
      _content_type: &str,
    ) -> std::result::Result<FetchedResponse, FetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);

      if !self.online.load(Ordering::SeqCst) {
        return Err(FetchError::Unavailable {
          url: url.to_string(),
          reason: "offline".to_string(),
        });
      }

      self
        .submissions
        .lock()
        .unwrap()
        .push((url.to_string(), body));

      Ok(FetchedResponse {
        status: *self.submit_status.lock().unwrap(),
        headers: Vec::new(),
        body: Vec::new(),
      })
    }
  }
}
