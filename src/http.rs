//! Request and response model for the offline layer.
//!
//! The agent never hands out live network streams. Every response is
//! captured as a [`ResponseSnapshot`], an owned status/headers/body
//! triple, so the same response can be both stored and returned to the
//! caller without consuming anything twice.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Status code used for synthetic degraded responses.
pub const REQUEST_TIMEOUT: u16 = 408;

/// HTTP method of a request passing through the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Delete,
  Patch,
  Options,
}

impl Method {
  /// Only GET requests are ever intercepted or cached.
  pub fn is_get(&self) -> bool {
    matches!(self, Method::Get)
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
      Method::Patch => "PATCH",
      Method::Options => "OPTIONS",
    };
    write!(f, "{}", s)
  }
}

/// How a request reached the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page load. Eligible for the offline fallback page.
  Navigation,
  /// Sub-resource fetch (stylesheet, script, image, data).
  #[default]
  Resource,
}

/// A request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  /// Extra request headers forwarded to the network fetch.
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A plain GET sub-resource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::Resource,
      headers: Vec::new(),
    }
  }

  /// A GET navigation request (top-level page load).
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigation,
      ..Self::get(url)
    }
  }

  /// A request with an explicit method.
  pub fn with_method(method: Method, url: Url) -> Self {
    Self {
      method,
      ..Self::get(url)
    }
  }

  /// Add a request header.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigation
  }

  /// Whether this request targets the given origin.
  pub fn same_origin_as(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }

  /// Stable cache key for this request.
  ///
  /// SHA-256 over `METHOD:url` with the fragment stripped, hex-encoded.
  /// Fragments never reach the network, so `/songs/#top` and `/songs/`
  /// must key identically.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    let input = format!("{}:{}", self.method, url);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Classification of a response snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin network response. The only kind eligible for caching.
  Basic,
  /// Network response whose final URL landed on another origin.
  Cors,
  /// Constructed locally by the agent, never from the network.
  Synthetic,
}

/// Point-in-time snapshot of a response.
///
/// Snapshots are plain owned data, so cloning one for storage while
/// returning the other to the caller is trivial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl ResponseSnapshot {
  pub fn new(status: u16, kind: ResponseKind, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body,
      kind,
    }
  }

  /// A 200 same-origin response, as produced by a successful fetch.
  pub fn ok(body: impl Into<Vec<u8>>) -> Self {
    Self::new(200, ResponseKind::Basic, body.into())
  }

  /// Synthetic degraded response for an unreachable resource.
  pub fn request_timeout() -> Self {
    Self::new(REQUEST_TIMEOUT, ResponseKind::Synthetic, Vec::new())
  }

  pub fn is_success(&self) -> bool {
    self.status == 200
  }

  /// Whether the interceptor may store this response: a standard
  /// same-origin success, nothing else.
  pub fn is_cacheable(&self) -> bool {
    self.is_success() && self.kind == ResponseKind::Basic
  }
}
