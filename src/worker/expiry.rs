use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::OfflineCacheManager;
use crate::cache::{CacheRole, CacheStorage};
use crate::net::Fetcher;

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
  /// Delete expired entries from the API generation. Returns how many went.
  pub fn cleanup_expired(&self) -> Result<usize> {
    let generation = self.config.cache_name(CacheRole::Api);
    let removed = self.storage.delete_expired(generation, Utc::now())?;

    if removed > 0 {
      info!(generation, removed, "Cleaned up expired cache entries");
    } else {
      debug!(generation, "No expired cache entries");
    }
    Ok(removed)
  }

  /// Run `cleanup_expired` every `interval` until `shutdown` resolves.
  ///
  /// The first pass runs immediately. A failed pass is logged and the loop
  /// keeps going. A zero interval is rejected.
  pub async fn run_periodic_cleanup(
    &self,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
  ) -> Result<()> {
    if interval.is_zero() {
      return Err(eyre!("Cleanup interval must be greater than zero"));
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        _ = &mut shutdown => {
          debug!("Periodic cleanup stopped");
          break;
        }
        _ = ticker.tick() => {
          if let Err(e) = self.cleanup_expired() {
            warn!(error = %e, "Periodic cleanup failed");
          }
        }
      }
    }
    Ok(())
  }
}
