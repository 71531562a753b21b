use color_eyre::Result;
use tracing::{error, info};

use super::{OfflineCacheManager, ACTIVE_VERSION, WAITING_VERSION};
use crate::cache::CacheStorage;
use crate::net::Fetcher;

/// What activation did.
#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  /// Generations removed because their names are no longer declared
  pub deleted: Vec<String>,
  /// Pages now controlled
  pub claimed: usize,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
  /// Activate the installed generation set.
  ///
  /// Every generation whose name is not declared by this version is deleted,
  /// then all open pages are claimed. Running it again with the same names
  /// deletes nothing.
  pub fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle().begin_activate()?;

    let deleted = match self.evict_stale_generations() {
      Ok(deleted) => deleted,
      Err(e) => {
        error!(error = %e, "Activation failed");
        self.lifecycle().finish_activate(false);
        return Err(e);
      }
    };
    self.lifecycle().finish_activate(true);

    let claimed = self.clients.claim();
    info!(
      version = %self.config.version,
      deleted = deleted.len(),
      claimed,
      "Cache manager active, controlling clients"
    );

    Ok(ActivationReport { deleted, claimed })
  }

  fn evict_stale_generations(&self) -> Result<Vec<String>> {
    let declared = self.config.declared_names();
    let mut deleted = Vec::new();

    for name in self.storage.generation_names()? {
      if declared.contains(&name.as_str()) {
        continue;
      }
      info!(generation = %name, "Deleting outdated cache");
      if self.storage.delete_generation(&name)? {
        deleted.push(name);
      }
    }

    self
      .storage
      .set_registration(ACTIVE_VERSION, &self.config.version)?;
    self.storage.clear_registration(WAITING_VERSION)?;

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use crate::cache::{CacheStorage, RequestKey, SqliteStorage};
  use crate::net::Response;
  use crate::testing::{active_manager, script_core, test_config, url, FakeFetcher};
  use crate::worker::{OfflineCacheManager, WorkerState, ACTIVE_VERSION};

  #[tokio::test]
  async fn test_reactivation_is_idempotent() {
    let (manager, _) = active_manager().await;
    let before: Vec<usize> = manager
      .config()
      .declared_names()
      .iter()
      .map(|name| manager.storage().entry_count(name).unwrap())
      .collect();

    let report = manager.activate().unwrap();
    assert!(report.deleted.is_empty());

    let after: Vec<usize> = manager
      .config()
      .declared_names()
      .iter()
      .map(|name| manager.storage().entry_count(name).unwrap())
      .collect();
    assert_eq!(before, after);
    assert_eq!(manager.state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_upgrade_deletes_undeclared_generations() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let old_key = RequestKey::for_url(&url("./index.html"));
    storage
      .put("kidney-plan-v2", &old_key, &Response::new(200, "v2"), None)
      .unwrap();
    storage
      .put("static-v0", &old_key, &Response::new(200, "v0"), None)
      .unwrap();
    storage.set_registration(ACTIVE_VERSION, "test-v0").unwrap();

    let fetcher = FakeFetcher::new();
    script_core(&fetcher);
    let manager = OfflineCacheManager::new(test_config(), storage, fetcher).unwrap();
    let install = manager.install().await.unwrap();
    assert!(install.activated);

    let mut names = manager.storage().generation_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["static-v1"]);
    assert_eq!(
      manager
        .storage()
        .registration(ACTIVE_VERSION)
        .unwrap()
        .as_deref(),
      Some("test-v1")
    );
  }

  #[tokio::test]
  async fn test_activation_claims_open_pages() {
    let (manager, _) = active_manager().await;
    let (page, _rx) = manager.clients().connect();
    assert!(!manager.clients().is_controlled(page));

    let report = manager.activate().unwrap();
    assert_eq!(report.claimed, 1);
    assert!(manager.clients().is_controlled(page));
  }

  #[test]
  fn test_activate_without_install_fails() {
    let manager = OfflineCacheManager::new(
      test_config(),
      SqliteStorage::open_in_memory().unwrap(),
      FakeFetcher::new(),
    )
    .unwrap();
    assert!(manager.activate().is_err());
    assert_eq!(manager.state(), WorkerState::Parsed);
  }
}
