mod cache;
mod commands;
mod config;
mod net;
mod worker;

#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cache::SqliteStorage;
use net::HttpFetcher;
use worker::OfflineCacheManager;

#[derive(Parser, Debug)]
#[command(name = "kplan-offline")]
#[command(about = "Offline cache manager for the Kidney Fix-It Plan web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kplan-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database path (overrides database.path)
  #[arg(short, long)]
  database: Option<PathBuf>,

  /// Keep caches in memory for this run only
  #[arg(long, conflicts_with = "database")]
  ephemeral: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config.log)?;

  let storage = if args.ephemeral {
    SqliteStorage::open_in_memory()?
  } else {
    let path = args.database.or(config.database.path);
    SqliteStorage::open(path.as_deref())?
  };

  let manager = OfflineCacheManager::new(config.cache, storage, HttpFetcher::new()?)?;
  commands::run(args.command, &manager).await
}

/// Install the global subscriber. RUST_LOG wins over the configured filter.
///
/// The returned guard flushes the file writer and must outlive main.
fn init_tracing(log: &config::LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));

  let Some(path) = &log.file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .try_init()
      .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(Some(guard))
}
