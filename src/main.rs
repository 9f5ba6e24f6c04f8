use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use offcache::agent::{self, Agent, ServedFrom};
use offcache::cache::{CacheStore, SqliteStore};
use offcache::config::AgentConfig;
use offcache::http::Request;
use offcache::net::HttpFetcher;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Offline cache agent for a content website")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the cache database (default: platform data dir)
  #[arg(long)]
  cache_db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Re-install the app-shell manifest and evict stale generations
  Sync,
  /// Save one page for offline reading
  Save {
    /// Page URL, absolute or site-relative
    url: String,
  },
  /// Fetch a URL through the interceptor; body goes to stdout
  Fetch {
    /// Resource URL, absolute or site-relative
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Show cache generations and their entries
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = AgentConfig::load(args.config.as_deref())?;

  let store = Arc::new(match &args.cache_db {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  });
  let fetcher = Arc::new(HttpFetcher::new()?);

  match args.command {
    Command::Sync => sync(config, store, fetcher).await,
    Command::Save { url } => save(config, store, fetcher, &url).await,
    Command::Fetch { url, navigate } => fetch(config, store, fetcher, &url, navigate).await,
    Command::Status => status(&config, store.as_ref()),
  }
}

/// Force a fresh install of the current generation, then activate it.
async fn sync(config: AgentConfig, store: Arc<SqliteStore>, fetcher: Arc<HttpFetcher>) -> Result<()> {
  let mut agent = Agent::new(config, store, fetcher)?;

  let report = agent.install().await?;
  let activated = agent.activate().await?;

  println!(
    "Generation {}: {} resource(s) cached, {} missing",
    agent.config().generation(),
    report.cached.len(),
    report.failed.len()
  );
  for (path, err) in &report.failed {
    println!("  missing {}: {}", path, err);
  }
  for name in &activated.removed {
    println!("Removed stale generation {}", name);
  }

  Ok(())
}

async fn save(
  config: AgentConfig,
  store: Arc<SqliteStore>,
  fetcher: Arc<HttpFetcher>,
  url: &str,
) -> Result<()> {
  let url = resolve_url(&config, url)?;
  let registration = agent::register(config, store, fetcher).await?;

  registration.handle().save_offline_ack(url.as_str()).await?;
  println!("Saved {} for offline reading", url);

  Ok(())
}

async fn fetch(
  config: AgentConfig,
  store: Arc<SqliteStore>,
  fetcher: Arc<HttpFetcher>,
  url: &str,
  navigate: bool,
) -> Result<()> {
  let url = resolve_url(&config, url)?;
  let registration = agent::register(config, store, fetcher).await?;

  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  let outcome = registration.agent().handle_fetch(&request).await?;

  eprintln!(
    "{} {} [{}]",
    outcome.response.status,
    request.url,
    served_label(outcome.served)
  );
  std::io::stdout().write_all(&outcome.response.body)?;

  Ok(())
}

fn status(config: &AgentConfig, store: &SqliteStore) -> Result<()> {
  let current = config.generation();
  let generations = store.generations()?;

  if generations.is_empty() {
    println!("Cache is empty; run `offcache sync` first");
    return Ok(());
  }

  for name in generations {
    let entries = store.entries(&name)?;
    let marker = if name == current { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, entries.len());
    for url in entries {
      println!("    {}", url);
    }
  }

  Ok(())
}

/// Accept both absolute URLs and site-relative paths.
fn resolve_url(config: &AgentConfig, input: &str) -> Result<Url> {
  if input.starts_with('/') {
    config.resolve(input)
  } else {
    Url::parse(input).map_err(|e| color_eyre::eyre::eyre!("Invalid URL {}: {}", input, e))
  }
}

fn served_label(served: ServedFrom) -> &'static str {
  match served {
    ServedFrom::Cache => "cache",
    ServedFrom::Network => "network",
    ServedFrom::OfflineFallback => "offline-fallback",
    ServedFrom::Synthetic => "synthetic",
    ServedFrom::PassThrough => "pass-through",
  }
}
