//! The offline cache manager.
//!
//! Intercepts requests from open pages and answers them from the network,
//! the cache or a synthesized fallback, depending on the request class:
//! - Documents: network-first with a timeout, then cache, then offline page
//! - Scripts and styles: cache-first with a background refresh on every hit
//! - Media: cache-first with placeholders when nothing is available
//! - API-like data: stale-while-revalidate against an expiring cache
//!
//! It also owns cache lifecycle (install, activation, expiry cleanup) and
//! the messages exchanged with pages.

mod activate;
mod background;
mod expiry;
mod fallback;
mod install;
mod lifecycle;
mod messages;
mod router;
mod strategy;

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::CacheVersion;
use crate::net::Fetcher;

pub use activate::ActivationReport;
pub use install::InstallReport;
pub use lifecycle::WorkerState;
pub use messages::{Clients, PageMessage, WorkerMessage};
pub use router::FetchOutcome;

use background::BackgroundTasks;
use lifecycle::Lifecycle;

/// Registration key holding the version that currently controls pages.
pub const ACTIVE_VERSION: &str = "active_version";
/// Registration key holding an installed version waiting to activate.
pub const WAITING_VERSION: &str = "waiting_version";

/// Resolved routing rules derived from the configuration.
struct Routes {
  origin: Url,
  api_prefixes: Vec<String>,
  offline_page: Url,
}

impl Routes {
  fn resolve(config: &CacheVersion) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", config.origin, e))?;

    let join = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid path {} for origin {}: {}", path, origin, e))
    };

    let api_prefixes = config
      .api_prefixes
      .iter()
      .map(|prefix| join(prefix).map(String::from))
      .collect::<Result<Vec<_>>>()?;
    let offline_page = join(&config.offline_page)?;

    Ok(Self {
      origin,
      api_prefixes,
      offline_page,
    })
  }
}

/// Offline cache manager: the single owner of the cache generations.
///
/// Handles are cheap to clone; clones share storage, network, clients and
/// lifecycle.
pub struct OfflineCacheManager<S: CacheStorage, F: Fetcher> {
  config: Arc<CacheVersion>,
  routes: Arc<Routes>,
  storage: Arc<S>,
  fetcher: Arc<F>,
  clients: Clients,
  lifecycle: Arc<Mutex<Lifecycle>>,
  background: BackgroundTasks,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
  /// Create a manager for `config`, resuming the lifecycle recorded in storage.
  pub fn new(config: CacheVersion, storage: S, fetcher: F) -> Result<Self> {
    config.validate()?;
    let routes = Routes::resolve(&config)?;

    let version = Some(config.version.as_str());
    let state = if storage.registration(ACTIVE_VERSION)?.as_deref() == version {
      WorkerState::Activated
    } else if storage.registration(WAITING_VERSION)?.as_deref() == version {
      WorkerState::Installed
    } else {
      WorkerState::Parsed
    };
    debug!(version = %config.version, %state, "Resuming cache manager");

    Ok(Self {
      config: Arc::new(config),
      routes: Arc::new(routes),
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      clients: Clients::new(),
      lifecycle: Arc::new(Mutex::new(Lifecycle::resume(state))),
      background: BackgroundTasks::default(),
    })
  }

  pub fn config(&self) -> &CacheVersion {
    &self.config
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle().state()
  }

  /// Resolve a manifest-style path (relative or absolute) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .routes
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
  }

  /// Number of background refreshes still running.
  pub fn pending_background(&self) -> usize {
    self.background.pending()
  }

  /// Wait for background refreshes to finish. Requests never call this.
  pub async fn settle(&self) {
    self.background.drain().await;
  }

  /// Handle a message posted by a page.
  pub fn handle_message(&self, message: PageMessage) -> Result<()> {
    match message {
      PageMessage::NetworkStatus { online } => {
        let outgoing = if online {
          WorkerMessage::Online
        } else {
          WorkerMessage::Offline
        };
        let reached = self.clients.broadcast(outgoing);
        info!(online, clients = reached, "Network status changed");
      }
      PageMessage::SkipWaiting => {
        let activate_now = self.lifecycle().request_skip_waiting();
        if activate_now {
          info!("Skip waiting requested, activating installed generation");
          self.activate()?;
        } else {
          debug!(state = %self.state(), "Skip waiting recorded, nothing waiting");
        }
      }
    }
    Ok(())
  }

  /// Parse and handle a raw JSON message. Unknown messages are ignored.
  pub fn handle_raw_message(&self, raw: &str) -> Result<()> {
    match PageMessage::parse(raw) {
      Ok(message) => self.handle_message(message),
      Err(e) => {
        debug!(error = %e, "Ignoring page message");
        Ok(())
      }
    }
  }

  fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
    // Lifecycle transitions are single assignments; a poisoned lock is still consistent
    self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for OfflineCacheManager<S, F> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      routes: Arc::clone(&self.routes),
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      clients: self.clients.clone(),
      lifecycle: Arc::clone(&self.lifecycle),
      background: self.background.clone(),
    }
  }
}
