//! Shared test fixtures: a scripted fetcher and store fakes.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStore, CachedResponse, MemoryStore};
use crate::config::{AgentConfig, InstallPolicy, NavigationStrategy};
use crate::http::{Request, ResponseSnapshot};
use crate::net::Fetcher;

/// Configuration used across the test suite.
pub(crate) fn sample_config(version: u32) -> AgentConfig {
  AgentConfig {
    origin: Url::parse("https://songs.example").unwrap(),
    cache_name: "songbook".to_string(),
    cache_version: version,
    manifest: vec![
      "/".to_string(),
      "/songs/".to_string(),
      "/offline/".to_string(),
    ],
    offline_fallback: "/offline/".to_string(),
    install_policy: InstallPolicy::default(),
    navigation: NavigationStrategy::default(),
  }
}

/// Scripted fetcher: canned responses per URL, per-URL failures, a
/// whole-network outage switch, and a call counter for verifying that
/// cache hits never touch the network.
#[derive(Default)]
pub(crate) struct FakeFetcher {
  routes: Mutex<HashMap<String, ResponseSnapshot>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: AtomicU32,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve this URL with the given snapshot.
  pub fn route(&self, url: &str, response: ResponseSnapshot) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
    self.failing.lock().unwrap().remove(url);
  }

  /// Serve every manifest entry of a config with a small page body.
  pub fn route_manifest(&self, config: &AgentConfig) {
    for url in config.manifest_urls().unwrap() {
      self.route(
        url.as_str(),
        ResponseSnapshot::ok(format!("<html>{}</html>", url.path()).into_bytes()),
      );
    }
  }

  /// Make fetches of this URL fail, route or not.
  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  /// Drop the whole network.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of network fetches performed so far.
  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable"));
    }

    let url = request.url.as_str();
    if self.failing.lock().unwrap().contains(url) {
      return Err(eyre!("connection refused: {}", url));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(url)
      .cloned()
      .ok_or_else(|| eyre!("no route for {}", url))
  }
}

/// Store whose writes can be made to fail, for quota-exhaustion tests.
/// Reads keep working against whatever was written before.
#[derive(Default)]
pub(crate) struct QuotaStore {
  inner: MemoryStore,
  exhausted: AtomicBool,
}

impl QuotaStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// All subsequent writes fail.
  pub fn exhaust(&self) {
    self.exhausted.store(true, Ordering::SeqCst);
  }
}

impl CacheStore for QuotaStore {
  fn open(&self, generation: &str) -> Result<()> {
    if self.exhausted.load(Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    self.inner.open(generation)
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>> {
    self.inner.get(generation, key)
  }

  fn put(
    &self,
    generation: &str,
    key: &str,
    url: &str,
    response: &ResponseSnapshot,
  ) -> Result<()> {
    if self.exhausted.load(Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    self.inner.put(generation, key, url, response)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    self.inner.delete_generation(generation)
  }

  fn generations(&self) -> Result<Vec<String>> {
    self.inner.generations()
  }

  fn entries(&self, generation: &str) -> Result<Vec<String>> {
    self.inner.entries(generation)
  }
}
