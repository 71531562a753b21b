//! Command line subcommands. Each one drives a single lifecycle or fetch
//! event against the manager and prints what happened.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheRole, CacheStorage};
use crate::net::{Destination, Fetcher, Request};
use crate::worker::{FetchOutcome, OfflineCacheManager, ACTIVE_VERSION, WAITING_VERSION};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Pre-cache the app shell and assets for the configured version
  Install,
  /// Activate the installed version and delete outdated caches
  Activate,
  /// Send a request through the cache manager
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,

    #[arg(long, default_value = "GET")]
    method: String,

    /// Treat the request as a top-level page navigation
    #[arg(long)]
    navigate: bool,

    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,

    /// Request destination (script, image, font, ...)
    #[arg(long, value_enum)]
    destination: Option<Destination>,

    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Post a JSON message from a page, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Delete expired API cache entries once
  Cleanup,
  /// Delete expired API cache entries periodically until interrupted
  Sync {
    /// Seconds between passes (default: cache.cleanup_interval_secs)
    #[arg(long)]
    interval: Option<u64>,
  },
  /// Show lifecycle state and cache contents
  Status,
}

pub async fn run<S: CacheStorage, F: Fetcher>(
  command: Command,
  manager: &OfflineCacheManager<S, F>,
) -> Result<()> {
  match command {
    Command::Install => {
      let report = manager.install().await?;
      println!(
        "Installed {}: {} core, {} secondary ({} failed)",
        manager.config().version,
        report.core_cached,
        report.secondary_cached,
        report.secondary_failed
      );
      if report.update_announced {
        println!("Update announced to open pages");
      }
      if report.activated {
        println!("Activated");
      } else {
        println!("Waiting to activate");
      }
    }
    Command::Activate => {
      let report = manager.activate()?;
      println!("Activated {}", manager.config().version);
      for name in &report.deleted {
        println!("Deleted cache {}", name);
      }
    }
    Command::Fetch {
      url,
      method,
      navigate,
      accept,
      destination,
      output,
    } => {
      let request = build_request(manager, &url, &method, navigate, accept, destination)?;
      fetch(manager, &request, output).await?;
    }
    Command::Message { json } => {
      let (_, mut inbox) = manager.clients().connect();
      manager.handle_raw_message(&json)?;
      while let Ok(message) = inbox.try_recv() {
        let line = serde_json::to_string(&message)
          .map_err(|e| eyre!("Failed to encode message: {}", e))?;
        println!("{}", line);
      }
    }
    Command::Cleanup => {
      let removed = manager.cleanup_expired()?;
      println!("Removed {} expired entries", removed);
    }
    Command::Sync { interval } => {
      let interval = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| manager.config().cleanup_interval());
      info!(?interval, "Running periodic cleanup, press Ctrl-C to stop");
      manager
        .run_periodic_cleanup(interval, async {
          let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    }
    Command::Status => {
      for line in status_lines(manager)? {
        println!("{}", line);
      }
    }
  }

  Ok(())
}

fn build_request<S: CacheStorage, F: Fetcher>(
  manager: &OfflineCacheManager<S, F>,
  url: &str,
  method: &str,
  navigate: bool,
  accept: Option<String>,
  destination: Option<Destination>,
) -> Result<Request> {
  let url = manager.resolve(url)?;
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;

  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  request.method = method;
  if let Some(accept) = accept {
    request = request.with_accept(&accept);
  }
  if let Some(destination) = destination {
    request = request.with_destination(destination);
  }
  Ok(request)
}

async fn fetch<S: CacheStorage, F: Fetcher>(
  manager: &OfflineCacheManager<S, F>,
  request: &Request,
  output: Option<PathBuf>,
) -> Result<()> {
  let (response, source) = match manager.handle_fetch(request).await {
    FetchOutcome::Responded(served) => (served.response, served.source.to_string()),
    FetchOutcome::PassThrough => (manager.fetcher().fetch(request).await?, "pass-through".to_string()),
  };

  println!(
    "{} {} from {} ({} bytes)",
    response.status,
    request.url,
    source,
    response.body.len()
  );

  if let Some(path) = output {
    std::fs::write(&path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
  }

  // Let background refreshes land before the process exits
  let pending = manager.pending_background();
  if pending > 0 {
    debug!(pending, "Waiting for background refreshes");
  }
  manager.settle().await;
  Ok(())
}

fn status_lines<S: CacheStorage, F: Fetcher>(manager: &OfflineCacheManager<S, F>) -> Result<Vec<String>> {
  let config = manager.config();
  let storage = manager.storage();

  let mut lines = vec![
    format!("version:  {}", config.version),
    format!("state:    {}", manager.state()),
    format!(
      "active:   {}",
      storage.registration(ACTIVE_VERSION)?.as_deref().unwrap_or("-")
    ),
    format!(
      "waiting:  {}",
      storage.registration(WAITING_VERSION)?.as_deref().unwrap_or("-")
    ),
  ];

  for role in CacheRole::ALL {
    let name = config.cache_name(role);
    lines.push(format!("{}:  {} ({} entries)", role, name, storage.entry_count(name)?));
  }

  let declared = config.declared_names();
  for name in storage.generation_names()? {
    if !declared.contains(&name.as_str()) {
      lines.push(format!("outdated  {} ({} entries)", name, storage.entry_count(&name)?));
    }
  }

  Ok(lines)
}
