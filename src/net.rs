//! Network fetch seam.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::http::{Method, Request, ResponseKind, ResponseSnapshot};

/// Abstraction over network fetching.
///
/// Any error returned here is treated as a network failure by the
/// interceptor; there is no finer-grained signaling, matching the
/// underlying fetch primitive.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Perform one network fetch and snapshot the response.
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot>;
}

/// Fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Delete => reqwest::Method::DELETE,
    Method::Patch => reqwest::Method::PATCH,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network fetch failed for {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    // A redirect off-origin yields a response the agent must not cache.
    let kind = if response.url().origin() == request.url.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body for {}: {}", request.url, e))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      headers,
      body,
      kind,
    })
  }
}
