//! Offline cache layer for a content website.
//!
//! This crate implements the site's offline story as a host-independent
//! caching agent:
//! - Pre-caches a fixed app-shell manifest into a versioned generation
//! - Serves requests cache-first with network fallback
//! - Evicts stale generations wholesale on version bumps
//! - Accepts page messages asking for individual URLs to be saved
//!
//! The cache store and the network fetcher are traits, so hosts and
//! tests choose their own backends.

pub mod agent;
pub mod cache;
pub mod config;
pub mod http;
pub mod net;

#[cfg(test)]
mod testutil;
