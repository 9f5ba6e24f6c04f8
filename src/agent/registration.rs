//! Registration contract and the page→agent message channel.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use url::Url;

use super::Agent;
use crate::cache::CacheStore;
use crate::config::AgentConfig;
use crate::net::Fetcher;

/// Structured message a page sends to the agent.
///
/// The wire shape is `{"type": "SAVE_OFFLINE", "url": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
  /// Ask the agent to persist one page for offline reading.
  #[serde(rename = "SAVE_OFFLINE")]
  SaveOffline { url: String },
}

struct Delivery {
  message: PageMessage,
  reply: Option<oneshot::Sender<Result<()>>>,
}

/// Handle a page keeps after registering the agent.
#[derive(Clone)]
pub struct AgentHandle {
  tx: mpsc::UnboundedSender<Delivery>,
}

impl AgentHandle {
  /// Post a message without waiting for a result. Failures are
  /// logged by the agent.
  pub fn post(&self, message: PageMessage) -> Result<()> {
    self
      .tx
      .send(Delivery {
        message,
        reply: None,
      })
      .map_err(|_| eyre!("Agent message channel closed"))
  }

  /// Ask for one page to be saved, fire-and-forget.
  pub fn save_offline(&self, url: &str) -> Result<()> {
    self.post(PageMessage::SaveOffline {
      url: url.to_string(),
    })
  }

  /// Ask for one page to be saved and wait for the acknowledgment.
  pub async fn save_offline_ack(&self, url: &str) -> Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(Delivery {
        message: PageMessage::SaveOffline {
          url: url.to_string(),
        },
        reply: Some(reply_tx),
      })
      .map_err(|_| eyre!("Agent message channel closed"))?;

    reply_rx
      .await
      .map_err(|_| eyre!("Agent dropped the reply channel"))?
  }
}

/// A registered, active agent plus its message channel.
pub struct Registration<S: CacheStore, F: Fetcher> {
  agent: Arc<Agent<S, F>>,
  handle: AgentHandle,
}

impl<S: CacheStore, F: Fetcher> Registration<S, F> {
  pub fn agent(&self) -> &Agent<S, F> {
    &self.agent
  }

  pub fn handle(&self) -> AgentHandle {
    self.handle.clone()
  }
}

/// Register an offline agent: install if this generation is new,
/// activate, and start draining page messages.
///
/// Success and failure are logged, so a host that treats registration
/// as fire-and-forget still leaves a trace.
pub async fn register<S, F>(
  config: AgentConfig,
  store: Arc<S>,
  fetcher: Arc<F>,
) -> Result<Registration<S, F>>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  match try_register(config, store, fetcher).await {
    Ok(registration) => {
      info!(
        "Offline agent registered for generation {}",
        registration.agent().config().generation()
      );
      Ok(registration)
    }
    Err(err) => {
      error!("Offline agent registration failed: {}", err);
      Err(err)
    }
  }
}

async fn try_register<S, F>(
  config: AgentConfig,
  store: Arc<S>,
  fetcher: Arc<F>,
) -> Result<Registration<S, F>>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  let mut agent = Agent::new(config, store.clone(), fetcher)?;

  let generation = agent.config().generation();
  let already_populated = store.generations()?.contains(&generation)
    && !store.entries(&generation)?.is_empty();

  if already_populated {
    // Re-registering an unchanged agent must not re-fetch the manifest.
    agent.adopt_installed()?;
  } else {
    let report = agent.install().await?;
    if !report.failed.is_empty() {
      warn!(
        "Install of {} completed with {} resource(s) missing",
        generation,
        report.failed.len()
      );
    }
  }

  agent.activate().await?;

  let agent = Arc::new(agent);
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(drain_messages(agent.clone(), rx));

  Ok(Registration {
    agent,
    handle: AgentHandle { tx },
  })
}

/// Process page messages until every handle is dropped.
async fn drain_messages<S, F>(agent: Arc<Agent<S, F>>, mut rx: mpsc::UnboundedReceiver<Delivery>)
where
  S: CacheStore,
  F: Fetcher,
{
  while let Some(delivery) = rx.recv().await {
    let result = match &delivery.message {
      PageMessage::SaveOffline { url } => save_one(&agent, url).await,
    };

    match delivery.reply {
      Some(reply) => {
        // The sender may have given up waiting; that's fine.
        let _ = reply.send(result);
      }
      None => {
        if let Err(err) = result {
          warn!("SAVE_OFFLINE failed: {}", err);
        }
      }
    }
  }
}

async fn save_one<S: CacheStore, F: Fetcher>(agent: &Agent<S, F>, url: &str) -> Result<()> {
  let url = Url::parse(url).map_err(|e| eyre!("Invalid URL in SAVE_OFFLINE message: {}", e))?;
  agent.save_offline(&url).await
}
