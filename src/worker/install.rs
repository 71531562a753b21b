use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use tracing::{error, info, warn};

use super::messages::WorkerMessage;
use super::{OfflineCacheManager, ACTIVE_VERSION, WAITING_VERSION};
use crate::cache::{CacheRole, CacheStorage, RequestKey};
use crate::net::{Fetcher, Request, Response};

/// What installation did.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub core_cached: usize,
  pub secondary_cached: usize,
  pub secondary_failed: usize,
  /// Whether an older version was active when install finished
  pub update_announced: bool,
  /// Whether activation ran right after install
  pub activated: bool,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
  /// Install this version: populate the static generation with the core
  /// manifest (all or nothing) and the dynamic one with secondary assets
  /// (best effort).
  ///
  /// On failure nothing is written, the lifecycle becomes redundant and the
  /// previously active version keeps serving.
  pub async fn install(&self) -> Result<InstallReport> {
    self.lifecycle().begin_install()?;
    info!(version = %self.config.version, "Installing cache generation");

    let mut report = match self.populate().await {
      Ok(report) => report,
      Err(e) => {
        error!(error = %e, "Pre-caching failed");
        self.lifecycle().finish_install(false);
        return Err(e);
      }
    };

    let mut activate_now = self.lifecycle().finish_install(true);
    info!(
      core = report.core_cached,
      secondary = report.secondary_cached,
      "Cached app shell and main assets"
    );

    let previous = self.storage.registration(ACTIVE_VERSION)?;
    if previous.is_some_and(|v| v != self.config.version) {
      let reached = self.clients.broadcast(WorkerMessage::UpdateAvailable);
      info!(clients = reached, "Announced available update");
      report.update_announced = true;
    }

    if self.config.skip_waiting {
      activate_now = self.lifecycle().request_skip_waiting();
    }
    if activate_now {
      self.activate()?;
      report.activated = true;
    }

    Ok(report)
  }

  async fn populate(&self) -> Result<InstallReport> {
    let core = self.fetch_core().await?;
    self
      .storage
      .put_all(self.config.cache_name(CacheRole::Static), &core)?;

    let (secondary_cached, secondary_failed) = self.cache_secondary().await;

    self
      .storage
      .set_registration(WAITING_VERSION, &self.config.version)?;

    Ok(InstallReport {
      core_cached: core.len(),
      secondary_cached,
      secondary_failed,
      ..InstallReport::default()
    })
  }

  /// Fetch every core asset; any failure fails the whole batch.
  async fn fetch_core(&self) -> Result<Vec<(RequestKey, Response)>> {
    let requests = self
      .config
      .core_assets
      .iter()
      .map(|path| self.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    try_join_all(requests.iter().map(|request| self.fetch_core_asset(request))).await
  }

  async fn fetch_core_asset(&self, request: &Request) -> Result<(RequestKey, Response)> {
    let response = self.fetcher.fetch(request).await?;
    if !response.is_ok() {
      return Err(eyre!(
        "Core asset {} returned status {}",
        request.url,
        response.status
      ));
    }
    Ok((RequestKey::from(request), response))
  }

  /// Cache secondary assets one by one. Returns (cached, failed).
  async fn cache_secondary(&self) -> (usize, usize) {
    let dynamic = self.config.cache_name(CacheRole::Dynamic);

    let results = join_all(
      self
        .config
        .secondary_assets
        .iter()
        .map(|path| self.cache_secondary_asset(path, dynamic)),
    )
    .await;

    let mut cached = 0;
    let mut failed = 0;
    for (path, result) in self.config.secondary_assets.iter().zip(results) {
      match result {
        Ok(()) => cached += 1,
        Err(e) => {
          warn!(asset = %path, error = %e, "Secondary asset failed to cache");
          failed += 1;
        }
      }
    }

    (cached, failed)
  }

  async fn cache_secondary_asset(&self, path: &str, generation: &str) -> Result<()> {
    let request = Request::get(self.resolve(path)?);
    let response = self.fetcher.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!("{} returned status {}", request.url, response.status));
    }
    self
      .storage
      .put(generation, &RequestKey::from(&request), &response, None)
  }
}
