use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Install failure policy for the manifest population step.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstallPolicy {
  /// Individual resource failures are logged; the resource is absent.
  #[default]
  BestEffort,
  /// Any resource failure aborts the whole install; nothing is written.
  FailFast,
}

/// How navigation requests are served once the agent is active.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationStrategy {
  /// Always prefer the network for page loads to avoid staleness;
  /// fall back to cache, then to the offline page.
  #[default]
  NetworkFirst,
  /// Serve cached pages when present, like any other resource.
  CacheFirst,
}

/// Configuration of the offline cache agent.
///
/// Everything the agent needs is injected here at construction: the
/// site origin, the cache generation identity, the app-shell manifest
/// and the policy knobs. There are no ambient globals.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
  /// Origin of the site this agent serves. Requests to any other
  /// origin pass through untouched.
  pub origin: Url,
  /// Logical cache name, e.g. "songbook".
  pub cache_name: String,
  /// Generation number. Bumping it invalidates every prior generation.
  pub cache_version: u32,
  /// App-shell resource paths cached unconditionally at install time.
  pub manifest: Vec<String>,
  /// Manifest entry served when a navigation fails with no cache hit.
  pub offline_fallback: String,
  #[serde(default)]
  pub install_policy: InstallPolicy,
  #[serde(default)]
  pub navigation: NavigationStrategy,
}

impl AgentConfig {
  /// Current cache generation name, `<logical-name>-v<integer>`.
  ///
  /// Activation deletes every generation whose name is not exactly
  /// this string.
  pub fn generation(&self) -> String {
    format!("{}-v{}", self.cache_name, self.cache_version)
  }

  /// Manifest entries resolved against the configured origin.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self.manifest.iter().map(|path| self.resolve(path)).collect()
  }

  /// Offline fallback path resolved against the configured origin.
  pub fn offline_fallback_url(&self) -> Result<Url> {
    self.resolve(&self.offline_fallback)
  }

  /// Resolve a site-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid manifest path {}: {}", path, e))
  }

  /// Check structural invariants of the configuration.
  ///
  /// Manifest entries must be site-relative paths; CDN and other
  /// cross-origin assets have unknown cache semantics and are rejected
  /// outright. The offline fallback must itself be part of the
  /// manifest, or it could never be served offline.
  pub fn validate(&self) -> Result<()> {
    if self.cache_name.is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }
    if self.cache_version == 0 {
      return Err(eyre!("cache_version must be at least 1"));
    }
    if self.manifest.is_empty() {
      return Err(eyre!("manifest must list at least one resource"));
    }

    for entry in &self.manifest {
      if !entry.starts_with('/') {
        return Err(eyre!(
          "Manifest entry '{}' is not a site-relative path; cross-origin assets must not be pre-cached",
          entry
        ));
      }
    }

    if !self.manifest.contains(&self.offline_fallback) {
      return Err(eyre!(
        "Offline fallback '{}' must appear in the manifest",
        self.offline_fallback
      ));
    }

    Ok(())
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: AgentConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }
}
