//! Request interception: the cache-vs-network-vs-fallback policy.

use color_eyre::Result;
use tracing::{debug, warn};

use super::Agent;
use crate::cache::CacheStore;
use crate::config::NavigationStrategy;
use crate::http::{Request, ResponseSnapshot};
use crate::net::Fetcher;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Cache hit in the current generation.
  Cache,
  /// Fresh network response.
  Network,
  /// The designated offline page, served for a failed navigation.
  OfflineFallback,
  /// Locally constructed degraded response.
  Synthetic,
  /// Not intercepted; forwarded to the network untouched.
  PassThrough,
}

/// Outcome of a request passing through the agent.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
  pub response: ResponseSnapshot,
  pub served: ServedFrom,
}

impl FetchOutcome {
  fn new(response: ResponseSnapshot, served: ServedFrom) -> Self {
    Self { response, served }
  }
}

impl<S: CacheStore, F: Fetcher> Agent<S, F> {
  /// Decide how to serve one request.
  ///
  /// In order: requests the agent does not control (non-GET,
  /// cross-origin, or any request before activation) pass through to
  /// the network untouched. Navigations follow the configured
  /// strategy. Everything else is served from cache when possible,
  /// fetched and opportunistically cached otherwise, and degraded to
  /// the offline page or a synthetic timeout when the network is gone.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if !self.state().can_intercept()
      || !request.method.is_get()
      || !request.same_origin_as(&self.config.origin)
    {
      let response = self.fetcher.fetch(request).await?;
      return Ok(FetchOutcome::new(response, ServedFrom::PassThrough));
    }

    if request.is_navigation() && self.config.navigation == NavigationStrategy::NetworkFirst {
      return self.navigate_network_first(request).await;
    }

    self.serve_cache_first(request).await
  }

  /// Pages prefer the network so users never read stale content while
  /// online. Successful navigations are not cached here: offline page
  /// coverage comes from the manifest and SAVE_OFFLINE, not from
  /// incidental browsing.
  async fn navigate_network_first(&self, request: &Request) -> Result<FetchOutcome> {
    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(FetchOutcome::new(response, ServedFrom::Network)),
      Err(err) => {
        debug!("Navigation fetch for {} failed ({}), serving offline", request.url, err);
        self.serve_offline(request)
      }
    }
  }

  async fn serve_cache_first(&self, request: &Request) -> Result<FetchOutcome> {
    let generation = self.config.generation();

    // The cache read must conclusively miss before the network is
    // tried; the two are never raced.
    if let Some(cached) = self.store.get(&generation, &request.cache_key())? {
      return Ok(FetchOutcome::new(cached.response, ServedFrom::Cache));
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          // A failed write must not fail the request being served.
          if let Err(err) = self.store.put(
            &generation,
            &request.cache_key(),
            request.url.as_str(),
            &response,
          ) {
            warn!("Failed to cache {}: {}", request.url, err);
          }
        }
        Ok(FetchOutcome::new(response, ServedFrom::Network))
      }
      Err(err) => {
        debug!("Fetch for {} failed ({}), serving offline", request.url, err);
        self.serve_offline(request)
      }
    }
  }

  /// Degraded service for an unreachable resource: the request's own
  /// cache entry if it has one, the offline page for navigations,
  /// otherwise a synthetic timeout so the caller always gets a
  /// response rather than a hang.
  fn serve_offline(&self, request: &Request) -> Result<FetchOutcome> {
    let generation = self.config.generation();

    if let Some(cached) = self.store.get(&generation, &request.cache_key())? {
      return Ok(FetchOutcome::new(cached.response, ServedFrom::Cache));
    }

    if request.is_navigation() {
      if let Some(fallback) = self.cached_fallback()? {
        return Ok(FetchOutcome::new(fallback, ServedFrom::OfflineFallback));
      }
    }

    Ok(FetchOutcome::new(
      ResponseSnapshot::request_timeout(),
      ServedFrom::Synthetic,
    ))
  }
}
