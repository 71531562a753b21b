use reqwest::Method;
use tracing::debug;

use super::fallback::MediaKind;
use super::strategy::OnRejected;
use super::{OfflineCacheManager, WorkerState};
use crate::cache::{CacheRole, CacheStorage, Served};
use crate::net::{Destination, Fetcher, Request};

/// How the manager answers an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Not intercepted: non-GET or foreign cross-origin traffic
  PassThrough,
  /// Top-level documents
  Navigation,
  /// Same-origin data under an API prefix
  Api,
  /// Scripts and stylesheets
  Asset,
  Media(MediaKind),
  Other,
}

/// Result of offering a request to the manager.
#[derive(Debug)]
pub enum FetchOutcome {
  /// The manager did not intercept; the caller goes to the network itself
  PassThrough,
  Responded(Served),
}

const ASSET_EXTENSIONS: &[&str] = &["js", "mjs", "css"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "ico", "webp"];
const FONT_EXTENSIONS: &[&str] = &["woff2", "woff", "ttf", "otf"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a"];

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
  /// Intercept a request and answer it with exactly one strategy.
  ///
  /// Network and cache failures never surface as errors here: they end in
  /// a cached copy, the offline page, a placeholder or a synthesized error
  /// response.
  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    if self.state() != WorkerState::Activated {
      return FetchOutcome::PassThrough;
    }

    let class = self.classify(request);
    debug!(url = %request.url, ?class, "Routing request");

    let timeout = self.config.network_timeout();
    let served = match class {
      RequestClass::PassThrough => return FetchOutcome::PassThrough,
      RequestClass::Navigation => {
        self
          .network_first(request, CacheRole::Static, Some(timeout), OnRejected::Fallback)
          .await
      }
      RequestClass::Api => self.stale_while_revalidate(request).await,
      RequestClass::Asset => self.cache_first(request, true, None).await,
      RequestClass::Media(kind) => self.cache_first(request, false, Some(kind)).await,
      RequestClass::Other => {
        self
          .network_first(request, CacheRole::Dynamic, None, OnRejected::ReturnLive)
          .await
      }
    };

    FetchOutcome::Responded(served)
  }

  /// Classify a request. The first matching rule wins.
  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.method != Method::GET {
      return RequestClass::PassThrough;
    }

    let same_origin = self.is_same_origin(request);
    if !same_origin && !self.is_allowed_host(request) {
      return RequestClass::PassThrough;
    }

    if request.is_navigation() {
      return RequestClass::Navigation;
    }

    if same_origin
      && self
        .routes
        .api_prefixes
        .iter()
        .any(|prefix| request.url.as_str().starts_with(prefix.as_str()))
    {
      return RequestClass::Api;
    }

    match request.destination {
      Destination::Script | Destination::Style => return RequestClass::Asset,
      Destination::Image => return RequestClass::Media(MediaKind::Image),
      Destination::Font => return RequestClass::Media(MediaKind::Font),
      Destination::Audio => return RequestClass::Media(MediaKind::Audio),
      Destination::Document | Destination::Empty => {}
    }

    match extension(request).as_deref() {
      Some(ext) if ASSET_EXTENSIONS.contains(&ext) => RequestClass::Asset,
      Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => RequestClass::Media(MediaKind::Image),
      Some(ext) if FONT_EXTENSIONS.contains(&ext) => RequestClass::Media(MediaKind::Font),
      Some(ext) if AUDIO_EXTENSIONS.contains(&ext) => RequestClass::Media(MediaKind::Audio),
      _ => RequestClass::Other,
    }
  }

  pub(super) fn is_same_origin(&self, request: &Request) -> bool {
    request.url.origin() == self.routes.origin.origin()
  }

  pub(super) fn is_allowed_host(&self, request: &Request) -> bool {
    request
      .url
      .host_str()
      .is_some_and(|host| self.config.allowed_hosts.iter().any(|h| h == host))
  }
}

/// Lowercased extension of the last path segment.
fn extension(request: &Request) -> Option<String> {
  let segment = request.url.path_segments()?.last()?;
  let (_, ext) = segment.rsplit_once('.')?;
  Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::{test_config, url, FakeFetcher, TestManager};

  fn manager() -> TestManager {
    OfflineCacheManager::new(
      test_config(),
      SqliteStorage::open_in_memory().unwrap(),
      FakeFetcher::new(),
    )
    .unwrap()
  }

  fn get(address: &str) -> Request {
    Request::get(url::Url::parse(address).unwrap())
  }

  #[test]
  fn test_non_get_passes_through() {
    let request = Request::new(Method::POST, url("./api/labs"));
    assert_eq!(manager().classify(&request), RequestClass::PassThrough);
  }

  #[test]
  fn test_foreign_cross_origin_passes_through() {
    let request = get("https://www.google-analytics.com/collect.js");
    assert_eq!(manager().classify(&request), RequestClass::PassThrough);
  }

  #[test]
  fn test_allow_listed_cdn_is_intercepted() {
    let manager = manager();
    let css = get("https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css");
    assert_eq!(manager.classify(&css), RequestClass::Asset);

    let font = get("https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/webfonts/fa-solid-900.woff2");
    assert_eq!(manager.classify(&font), RequestClass::Media(MediaKind::Font));

    let sound = get("https://assets.mixkit.co/sfx/preview/mixkit-achievement-bell-600.mp3");
    assert_eq!(manager.classify(&sound), RequestClass::Media(MediaKind::Audio));
  }

  #[test]
  fn test_navigation_and_html_accept() {
    let manager = manager();
    assert_eq!(
      manager.classify(&Request::navigate(url("./"))),
      RequestClass::Navigation
    );
    assert_eq!(
      manager.classify(&Request::get(url("./index.html")).with_accept("text/html")),
      RequestClass::Navigation
    );
  }

  #[test]
  fn test_api_prefix_is_api() {
    let manager = manager();
    assert_eq!(manager.classify(&Request::get(url("./api/labs"))), RequestClass::Api);
    assert_eq!(
      manager.classify(&Request::get(url("./api/meds.json?day=3"))),
      RequestClass::Api
    );
  }

  #[test]
  fn test_extensions_pick_strategy() {
    let manager = manager();
    assert_eq!(manager.classify(&Request::get(url("./Kplan.js"))), RequestClass::Asset);
    assert_eq!(manager.classify(&Request::get(url("./Kplan.CSS"))), RequestClass::Asset);
    assert_eq!(
      manager.classify(&Request::get(url("./assets/icon-192.png"))),
      RequestClass::Media(MediaKind::Image)
    );
    assert_eq!(
      manager.classify(&Request::get(url("./manifest.json"))),
      RequestClass::Other
    );
    assert_eq!(manager.classify(&Request::get(url("./"))), RequestClass::Other);
  }

  #[test]
  fn test_destination_overrides_extension() {
    let request = Request::get(url("./chart")).with_destination(Destination::Image);
    assert_eq!(
      manager().classify(&request),
      RequestClass::Media(MediaKind::Image)
    );
  }

  #[tokio::test]
  async fn test_inactive_manager_does_not_intercept() {
    let outcome = manager().handle_fetch(&Request::navigate(url("./"))).await;
    assert!(matches!(outcome, FetchOutcome::PassThrough));
  }
}
