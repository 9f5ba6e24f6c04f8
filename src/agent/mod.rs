//! The offline cache agent.
//!
//! One agent owns one cache generation. Its life is a short state
//! machine: install populates the generation from the app-shell
//! manifest, activate evicts every other generation, and from then on
//! requests are intercepted and served cache-first with network
//! fallback. A message channel lets pages ask for individual URLs to
//! be saved on demand.

mod interceptor;
mod registration;

pub use interceptor::{FetchOutcome, ServedFrom};
pub use registration::{register, AgentHandle, PageMessage, Registration};

use color_eyre::{eyre::eyre, Result};
use futures::future;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::config::{AgentConfig, InstallPolicy};
use crate::http::{Request, ResponseSnapshot};
use crate::net::Fetcher;

/// Lifecycle state of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  /// Constructed; the current generation has not been populated.
  Uninstalled,
  /// Manifest population in progress.
  Installing,
  /// Manifest cached; not yet controlling fetches.
  Installed,
  /// Controlling fetches; stale generations evicted.
  Active,
}

impl AgentState {
  /// Only an active agent intercepts fetches.
  pub fn can_intercept(&self) -> bool {
    matches!(self, AgentState::Active)
  }
}

/// Result of an install run.
#[derive(Debug, Default)]
pub struct InstallReport {
  /// Manifest entries cached, in manifest order.
  pub cached: Vec<String>,
  /// Entries that could not be fetched, with the failure message.
  /// Always empty under the fail-fast policy.
  pub failed: Vec<(String, String)>,
}

/// Result of an activate run.
#[derive(Debug)]
pub struct ActivateReport {
  /// Stale generation names that were deleted.
  pub removed: Vec<String>,
}

/// The offline cache agent.
///
/// All collaborators are injected: the versioned cache store, the
/// network fetcher, and the configuration (origin, manifest, policies).
/// Lifecycle transitions are named methods returning results, so tests
/// can drive the machine deterministically.
pub struct Agent<S: CacheStore, F: Fetcher> {
  config: AgentConfig,
  store: Arc<S>,
  fetcher: Arc<F>,
  state: AgentState,
}

impl<S: CacheStore, F: Fetcher> Agent<S, F> {
  /// Create an uninstalled agent. Fails if the configuration is
  /// structurally invalid.
  pub fn new(config: AgentConfig, store: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    config.validate()?;

    Ok(Self {
      config,
      store,
      fetcher,
      state: AgentState::Uninstalled,
    })
  }

  pub fn state(&self) -> AgentState {
    self.state
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  /// Populate the current generation from the manifest.
  ///
  /// All manifest entries are fetched concurrently and the step
  /// completes only once every fetch has settled: any resource could
  /// be requested immediately after activation. Under the best-effort
  /// policy, failed entries are logged and left absent; under
  /// fail-fast, any failure aborts the install and nothing is written.
  pub async fn install(&mut self) -> Result<InstallReport> {
    if self.state != AgentState::Uninstalled {
      return Err(eyre!(
        "Install is only valid from the uninstalled state (agent is {:?})",
        self.state
      ));
    }
    self.state = AgentState::Installing;

    match self.populate().await {
      Ok(report) => {
        self.state = AgentState::Installed;
        info!(
          "Installed generation {}: {} cached, {} missing",
          self.config.generation(),
          report.cached.len(),
          report.failed.len()
        );
        Ok(report)
      }
      Err(err) => {
        self.state = AgentState::Uninstalled;
        Err(err)
      }
    }
  }

  async fn populate(&self) -> Result<InstallReport> {
    let generation = self.config.generation();
    let requests: Vec<Request> = self
      .config
      .manifest_urls()?
      .into_iter()
      // Install wants fresh copies, not whatever an intermediate
      // HTTP cache still holds.
      .map(|url| Request::get(url).with_header("cache-control", "no-cache"))
      .collect();

    let results = future::join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

    let mut report = InstallReport::default();
    let mut ready = Vec::new();
    for ((path, request), result) in self.config.manifest.iter().zip(&requests).zip(results) {
      let failure = match result {
        Ok(response) if response.is_cacheable() => {
          ready.push((request.cache_key(), request.url.to_string(), response));
          report.cached.push(path.clone());
          continue;
        }
        Ok(response) if !response.is_success() => {
          format!("unexpected status {}", response.status)
        }
        Ok(_) => "redirected off-origin".to_string(),
        Err(err) => err.to_string(),
      };

      match self.config.install_policy {
        InstallPolicy::FailFast => {
          return Err(eyre!("Install aborted: {}: {}", path, failure));
        }
        InstallPolicy::BestEffort => {
          warn!("Failed to pre-cache {}: {}", path, failure);
          report.failed.push((path.clone(), failure));
        }
      }
    }

    // Every fetch has settled; only now is anything written, so a
    // fail-fast abort leaves the store untouched.
    self.store.open(&generation)?;
    for (key, url, response) in &ready {
      self.store.put(&generation, key, url, response)?;
    }

    Ok(report)
  }

  /// Adopt a generation already populated by a previous registration.
  ///
  /// Re-registering an unchanged agent must not re-fetch the manifest.
  pub fn adopt_installed(&mut self) -> Result<()> {
    if self.state != AgentState::Uninstalled {
      return Err(eyre!(
        "Adopt is only valid from the uninstalled state (agent is {:?})",
        self.state
      ));
    }
    self.state = AgentState::Installed;
    Ok(())
  }

  /// Evict stale generations and take control of fetches.
  ///
  /// Every generation whose name is not exactly the current version
  /// string is deleted. Activation takes effect immediately: all
  /// subsequent fetches through this agent are intercepted.
  pub async fn activate(&mut self) -> Result<ActivateReport> {
    if self.state != AgentState::Installed {
      return Err(eyre!(
        "Activate is only valid from the installed state (agent is {:?})",
        self.state
      ));
    }

    let current = self.config.generation();
    let mut removed = Vec::new();
    for name in self.store.generations()? {
      if name != current && self.store.delete_generation(&name)? {
        removed.push(name);
      }
    }

    self.state = AgentState::Active;
    info!(
      "Activated generation {}: {} stale generation(s) removed",
      current,
      removed.len()
    );
    Ok(ActivateReport { removed })
  }

  /// Fetch one URL and store it in the current generation, independent
  /// of the manifest. This backs the SAVE_OFFLINE page message.
  pub async fn save_offline(&self, url: &Url) -> Result<()> {
    let request = Request::get(url.clone());
    if !request.same_origin_as(&self.config.origin) {
      return Err(eyre!("Refusing to save cross-origin URL {}", url));
    }

    let response = self.fetcher.fetch(&request).await?;
    if !response.is_cacheable() {
      return Err(eyre!(
        "Cannot save {} for offline reading: status {}",
        url,
        response.status
      ));
    }

    self.store.put(
      &self.config.generation(),
      &request.cache_key(),
      request.url.as_str(),
      &response,
    )?;
    info!("Saved {} for offline reading", url);
    Ok(())
  }

  /// The offline fallback page from the current generation, if cached.
  fn cached_fallback(&self) -> Result<Option<ResponseSnapshot>> {
    let fallback = Request::get(self.config.offline_fallback_url()?);
    Ok(
      self
        .store
        .get(&self.config.generation(), &fallback.cache_key())?
        .map(|cached| cached.response),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::config::NavigationStrategy;
  use crate::testutil::{sample_config, FakeFetcher};

  fn agent_with(
    config: AgentConfig,
  ) -> (Agent<MemoryStore, FakeFetcher>, Arc<MemoryStore>, Arc<FakeFetcher>) {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::new());
    let agent = Agent::new(config, store.clone(), fetcher.clone()).unwrap();
    (agent, store, fetcher)
  }

  #[tokio::test]
  async fn install_populates_every_manifest_entry() {
    let config = sample_config(5);
    let (mut agent, store, fetcher) = agent_with(config.clone());
    fetcher.route_manifest(&config);

    let report = agent.install().await.unwrap();

    assert_eq!(agent.state(), AgentState::Installed);
    assert_eq!(report.cached, config.manifest);
    assert!(report.failed.is_empty());

    for url in config.manifest_urls().unwrap() {
      let key = Request::get(url).cache_key();
      assert!(store.get("songbook-v5", &key).unwrap().is_some());
    }
  }

  #[tokio::test]
  async fn install_is_only_valid_once() {
    let config = sample_config(5);
    let (mut agent, _store, fetcher) = agent_with(config.clone());
    fetcher.route_manifest(&config);

    agent.install().await.unwrap();
    assert!(agent.install().await.is_err());
  }

  #[tokio::test]
  async fn best_effort_install_tolerates_failures() {
    let config = sample_config(5);
    let (mut agent, store, fetcher) = agent_with(config.clone());
    fetcher.route_manifest(&config);
    fetcher.fail("https://songs.example/songs/");

    let report = agent.install().await.unwrap();

    assert_eq!(agent.state(), AgentState::Installed);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "/songs/");

    let missing = Request::get(config.resolve("/songs/").unwrap()).cache_key();
    assert!(store.get("songbook-v5", &missing).unwrap().is_none());
    let present = Request::get(config.resolve("/").unwrap()).cache_key();
    assert!(store.get("songbook-v5", &present).unwrap().is_some());
  }

  #[tokio::test]
  async fn fail_fast_install_writes_nothing() {
    let mut config = sample_config(5);
    config.install_policy = InstallPolicy::FailFast;
    let (mut agent, store, fetcher) = agent_with(config.clone());
    fetcher.route_manifest(&config);
    fetcher.fail("https://songs.example/songs/");

    assert!(agent.install().await.is_err());

    // Aborted installs leave no trace and the agent reinstallable.
    assert_eq!(agent.state(), AgentState::Uninstalled);
    assert!(store.generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn install_rejects_non_success_responses() {
    let config = sample_config(5);
    let (mut agent, store, fetcher) = agent_with(config.clone());
    fetcher.route_manifest(&config);
    fetcher.route(
      "https://songs.example/songs/",
      ResponseSnapshot::new(404, crate::http::ResponseKind::Basic, Vec::new()),
    );

    let report = agent.install().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("404"));
    let key = Request::get(config.resolve("/songs/").unwrap()).cache_key();
    assert!(store.get("songbook-v5", &key).unwrap().is_none());
  }

  #[tokio::test]
  async fn activate_removes_every_stale_generation() {
    let config = sample_config(7);
    let (mut agent, store, fetcher) = agent_with(config.clone());
    fetcher.route_manifest(&config);

    // Leftovers from three earlier versions and an unrelated cache.
    let junk = ResponseSnapshot::ok(Vec::new());
    store.put("songbook-v4", "k", "https://songs.example/", &junk).unwrap();
    store.put("songbook-v5", "k", "https://songs.example/", &junk).unwrap();
    store.put("songbook-v6", "k", "https://songs.example/", &junk).unwrap();
    store.put("legacy-cache", "k", "https://songs.example/", &junk).unwrap();

    agent.install().await.unwrap();
    let report = agent.activate().await.unwrap();

    assert_eq!(agent.state(), AgentState::Active);
    assert_eq!(
      report.removed,
      vec!["legacy-cache", "songbook-v4", "songbook-v5", "songbook-v6"]
    );
    assert_eq!(store.generations().unwrap(), vec!["songbook-v7"]);
  }

  #[tokio::test]
  async fn activate_with_no_stale_generations_removes_nothing() {
    let config = sample_config(7);
    let (mut agent, store, fetcher) = agent_with(config.clone());
    fetcher.route_manifest(&config);

    agent.install().await.unwrap();
    let report = agent.activate().await.unwrap();

    assert!(report.removed.is_empty());
    assert_eq!(store.generations().unwrap(), vec!["songbook-v7"]);
  }

  #[tokio::test]
  async fn activate_requires_installed_state() {
    let (mut agent, _store, _fetcher) = agent_with(sample_config(5));
    assert!(agent.activate().await.is_err());
  }

  #[tokio::test]
  async fn save_offline_caches_one_page() {
    let config = sample_config(5);
    let (agent, store, fetcher) = agent_with(config.clone());
    fetcher.route(
      "https://songs.example/songs/12/",
      ResponseSnapshot::ok(b"<html>song 12</html>".to_vec()),
    );

    let url = Url::parse("https://songs.example/songs/12/").unwrap();
    agent.save_offline(&url).await.unwrap();

    let key = Request::get(url).cache_key();
    let cached = store.get("songbook-v5", &key).unwrap().unwrap();
    assert_eq!(cached.response.body, b"<html>song 12</html>");
  }

  #[tokio::test]
  async fn save_offline_rejects_cross_origin() {
    let (agent, _store, _fetcher) = agent_with(sample_config(5));
    let url = Url::parse("https://cdn.example/lib.js").unwrap();
    assert!(agent.save_offline(&url).await.is_err());
  }

  #[tokio::test]
  async fn save_offline_rejects_error_pages() {
    let (agent, store, fetcher) = agent_with(sample_config(5));
    fetcher.route(
      "https://songs.example/songs/404/",
      ResponseSnapshot::new(404, crate::http::ResponseKind::Basic, Vec::new()),
    );

    let url = Url::parse("https://songs.example/songs/404/").unwrap();
    assert!(agent.save_offline(&url).await.is_err());
    assert!(store.entries("songbook-v5").unwrap().is_empty());
  }

  // The version-bump scenario: v7 installed, then v8 under each
  // install policy with one resource unreachable.
  #[tokio::test]
  async fn version_bump_scenario_best_effort() {
    let mut config = sample_config(7);
    config.manifest = vec!["/".to_string(), "/offline/".to_string()];
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.route_manifest(&config);

    let mut v7 = Agent::new(config.clone(), store.clone(), fetcher.clone()).unwrap();
    v7.install().await.unwrap();
    v7.activate().await.unwrap();

    config.cache_version = 8;
    fetcher.fail("https://songs.example/offline/");
    let mut v8 = Agent::new(config.clone(), store.clone(), fetcher.clone()).unwrap();

    let report = v8.install().await.unwrap();
    assert_eq!(report.cached, vec!["/"]);
    assert_eq!(report.failed.len(), 1);

    v8.activate().await.unwrap();
    assert_eq!(store.generations().unwrap(), vec!["songbook-v8"]);

    let home = Request::get(config.resolve("/").unwrap()).cache_key();
    let offline = Request::get(config.resolve("/offline/").unwrap()).cache_key();
    assert!(store.get("songbook-v8", &home).unwrap().is_some());
    assert!(store.get("songbook-v8", &offline).unwrap().is_none());
  }

  #[tokio::test]
  async fn version_bump_scenario_fail_fast() {
    let mut config = sample_config(7);
    config.manifest = vec!["/".to_string(), "/offline/".to_string()];
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.route_manifest(&config);

    let mut v7 = Agent::new(config.clone(), store.clone(), fetcher.clone()).unwrap();
    v7.install().await.unwrap();
    v7.activate().await.unwrap();

    config.cache_version = 8;
    config.install_policy = InstallPolicy::FailFast;
    fetcher.fail("https://songs.example/offline/");
    let mut v8 = Agent::new(config.clone(), store.clone(), fetcher.clone()).unwrap();

    assert!(v8.install().await.is_err());

    // v8 never materialized; v7 remains the current generation.
    assert_eq!(store.generations().unwrap(), vec!["songbook-v7"]);
  }

  #[tokio::test]
  async fn navigation_strategy_is_plumbed_from_config() {
    let mut config = sample_config(5);
    config.navigation = NavigationStrategy::CacheFirst;
    let (agent, _store, _fetcher) = agent_with(config);
    assert_eq!(agent.config().navigation, NavigationStrategy::CacheFirst);
  }
}
