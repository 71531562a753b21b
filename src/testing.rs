//! Shared fixtures for unit tests: a scripted network and a small config.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::SqliteStorage;
use crate::config::{CacheNames, CacheVersion};
use crate::net::{Fetcher, Request, Response};
use crate::worker::OfflineCacheManager;

pub type TestManager = OfflineCacheManager<SqliteStorage, FakeFetcher>;

pub const ORIGIN: &str = "https://kplan.test/";

/// Version config with a small manifest and a short timeout.
pub fn test_config() -> CacheVersion {
  let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

  CacheVersion {
    version: "test-v1".to_string(),
    origin: ORIGIN.to_string(),
    caches: CacheNames {
      static_shell: "static-v1".to_string(),
      dynamic: "dynamic-v1".to_string(),
      api: "api-v1".to_string(),
    },
    core_assets: strings(&["./", "./index.html", "./offline.html", "./Kplan.js"]),
    secondary_assets: strings(&["https://assets.mixkit.co/sfx/bell.mp3"]),
    network_timeout_ms: 50,
    ..CacheVersion::default()
  }
}

/// Absolute URL under the test origin.
pub fn url(path: &str) -> url::Url {
  url::Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
enum Scripted {
  Respond(Response),
  Delayed(Duration, Response),
}

#[derive(Default)]
struct FakeState {
  routes: HashMap<String, Scripted>,
  calls: Vec<String>,
}

/// Scripted network. Unscripted URLs fail like an unreachable host.
#[derive(Clone, Default)]
pub struct FakeFetcher {
  state: Arc<Mutex<FakeState>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) -> &Self {
    self.script(url, Scripted::Respond(Response::new(status, body)))
  }

  pub fn delay(&self, url: &str, delay: Duration, body: &str) -> &Self {
    self.script(url, Scripted::Delayed(delay, Response::new(200, body)))
  }

  /// Make a URL unreachable again.
  pub fn fail(&self, url: &str) -> &Self {
    self.state.lock().unwrap().routes.remove(url);
    self
  }

  /// Make every URL unreachable.
  pub fn go_offline(&self) {
    self.state.lock().unwrap().routes.clear();
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .calls
      .iter()
      .filter(|u| u.as_str() == url)
      .count()
  }

  fn script(&self, url: &str, scripted: Scripted) -> &Self {
    self
      .state
      .lock()
      .unwrap()
      .routes
      .insert(url.to_string(), scripted);
    self
  }
}

impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    let scripted = {
      let mut state = self.state.lock().unwrap();
      state.calls.push(url.clone());
      state.routes.get(&url).cloned()
    };

    match scripted {
      Some(Scripted::Respond(response)) => Ok(response),
      Some(Scripted::Delayed(delay, response)) => {
        tokio::time::sleep(delay).await;
        Ok(response)
      }
      None => Err(eyre!("network unreachable: {}", url)),
    }
  }
}

/// Script every core asset of `test_config` with a 200.
pub fn script_core(fetcher: &FakeFetcher) {
  fetcher
    .respond(url("./").as_str(), 200, "<html>shell</html>")
    .respond(url("./index.html").as_str(), 200, "<html>index v1</html>")
    .respond(url("./offline.html").as_str(), 200, "<html>cached offline</html>")
    .respond(url("./Kplan.js").as_str(), 200, "console.log('v1')");
}

/// A manager that has installed and activated `test_config`.
pub async fn active_manager() -> (TestManager, FakeFetcher) {
  let fetcher = FakeFetcher::new();
  script_core(&fetcher);
  fetcher.respond("https://assets.mixkit.co/sfx/bell.mp3", 200, "ding");

  let storage = SqliteStorage::open_in_memory().unwrap();
  let manager = OfflineCacheManager::new(test_config(), storage, fetcher.clone()).unwrap();
  manager.install().await.unwrap();

  (manager, fetcher)
}
