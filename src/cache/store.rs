//! Cache store trait and in-memory implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::http::ResponseSnapshot;

/// A cached response together with storage metadata.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The stored response snapshot
  pub response: ResponseSnapshot,
  /// When the snapshot was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache store backends.
///
/// This is the host-environment dependency of the agent: a versioned,
/// named request→response map. Operations are atomic per key; the
/// agent never assumes anything beyond that.
pub trait CacheStore: Send + Sync {
  /// Ensure a generation exists, creating it empty if needed.
  fn open(&self, generation: &str) -> Result<()>;

  /// Look up a cached response by request key.
  fn get(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Store a response snapshot under a request key, creating the
  /// generation if needed. The URL is kept alongside for enumeration.
  fn put(&self, generation: &str, key: &str, url: &str, response: &ResponseSnapshot)
    -> Result<()>;

  /// Delete a generation and all its entries. Returns whether it existed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Names of all generations, sorted.
  fn generations(&self) -> Result<Vec<String>>;

  /// URLs of the entries stored in a generation, sorted.
  fn entries(&self, generation: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
  url: String,
  cached: CachedResponse,
}

/// In-memory cache store.
///
/// Ephemeral backend for hosts that don't want persistence, and the
/// store used throughout the test suite.
#[derive(Default)]
pub struct MemoryStore {
  generations: Mutex<BTreeMap<String, BTreeMap<String, MemoryEntry>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, generation: &str) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations.entry(generation.to_string()).or_default();
    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      generations
        .get(generation)
        .and_then(|entries| entries.get(key))
        .map(|entry| entry.cached.clone()),
    )
  }

  fn put(
    &self,
    generation: &str,
    key: &str,
    url: &str,
    response: &ResponseSnapshot,
  ) -> Result<()> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations.entry(generation.to_string()).or_default().insert(
      key.to_string(),
      MemoryEntry {
        url: url.to_string(),
        cached: CachedResponse {
          response: response.clone(),
          cached_at: Utc::now(),
        },
      },
    );
    Ok(())
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.remove(generation).is_some())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.keys().cloned().collect())
  }

  fn entries(&self, generation: &str) -> Result<Vec<String>> {
    let generations = self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut urls: Vec<String> = generations
      .get(generation)
      .map(|entries| entries.values().map(|e| e.url.clone()).collect())
      .unwrap_or_default();
    urls.sort();
    Ok(urls)
  }
}
