use color_eyre::{eyre::eyre, Result};
use std::fmt;
use url::Url;

/// Read methods the cache is allowed to key on.
///
/// Mutating methods never reach the cache; they go through the deferred
/// mutation queue instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Head,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
    }
  }

}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Normalized request descriptor: absolute URL plus read method.
///
/// Normalization strips the fragment and keeps the query, so two requests
/// for the same resource always hit the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  url: Url,
  method: Method,
}

impl RequestKey {
  pub fn parse(url: &str, method: Method) -> Result<Self> {
    let mut parsed = Url::parse(url).map_err(|e| eyre!("Invalid request URL {}: {}", url, e))?;
    parsed.set_fragment(None);
    Ok(Self {
      url: parsed,
      method,
    })
  }

  /// Build a key for an origin-relative path (manifest entries, fallback
  /// assets, sync targets).
  pub fn for_path(origin: &Url, path: &str, method: Method) -> Result<Self> {
    let joined = origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {} against origin {}: {}", path, origin, e))?;
    let mut key = Self {
      url: joined,
      method,
    };
    key.url.set_fragment(None);
    Ok(key)
  }

  #[allow(dead_code)]
  pub fn get(url: &str) -> Result<Self> {
    Self::parse(url, Method::Get)
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn url_str(&self) -> &str {
    self.url.as_str()
  }

  pub fn method(&self) -> Method {
    self.method
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// How the gateway routes an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Same-origin bundled asset - cache-first
  Static,
  /// Same-origin API-like path - network-first
  Api,
  /// Different origin; the gateway does not intercept these
  CrossOrigin,
}

/// Splits requests between the static and API handlers.
///
/// The API predicate is a fixed path-prefix convention supplied by
/// configuration; everything else on the origin is a static asset.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Url,
  api_prefix: String,
}

impl Classifier {
  pub fn new(origin: Url, api_prefix: impl Into<String>) -> Self {
    Self {
      origin,
      api_prefix: api_prefix.into(),
    }
  }

  pub fn classify(&self, key: &RequestKey) -> RouteClass {
    if key.url().origin() != self.origin.origin() {
      return RouteClass::CrossOrigin;
    }
    if key.path().starts_with(&self.api_prefix) {
      RouteClass::Api
    } else {
      RouteClass::Static
    }
  }
}
