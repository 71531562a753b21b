//! Caching strategies.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::fallback::{self, MediaKind};
use super::OfflineCacheManager;
use crate::cache::{CacheRole, CacheStorage, CachedEntry, RequestKey, Served};
use crate::net::{Fetcher, Request, Response};

/// How the live leg of a network-first race ended.
enum NetworkOutcome {
  /// 200 from the network, already written to the cache
  Fresh(Response),
  /// The network answered, but not with a 200
  Rejected(Response),
  TimedOut,
  Failed(color_eyre::Report),
}

/// What network-first does with a live answer that is not a 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum OnRejected {
  /// Prefer a cached copy, then the offline page, then the live answer
  Fallback,
  /// Hand the live answer back untouched; the cache is only for fetch errors
  ReturnLive,
}

impl<S: CacheStorage, F: Fetcher> OfflineCacheManager<S, F> {
  /// Network-first, optionally bounded by a timeout.
  ///
  /// 1. Race the live fetch against the timer
  /// 2. On a 200, write it to `role` and return it
  /// 3. Otherwise fall back to any cached copy
  /// 4. Then to the offline page for document requests
  /// 5. Then to whatever the network produced (or a synthesized error)
  ///
  /// With `OnRejected::ReturnLive` a non-200 answer skips steps 3 to 5 and
  /// is returned as is.
  ///
  /// A fetch that loses the race keeps running and still updates the cache
  /// when it lands, so the next request sees its result.
  pub(super) async fn network_first(
    &self,
    request: &Request,
    role: CacheRole,
    timeout: Option<Duration>,
    on_rejected: OnRejected,
  ) -> Served {
    let mut live = self.spawn_fetch_and_store(request.clone(), role);

    let outcome = match timeout {
      Some(limit) => match tokio::time::timeout(limit, &mut live).await {
        Ok(joined) => network_outcome(joined),
        Err(_) => {
          // Let the abandoned fetch finish in the background
          self.background.spawn(async move {
            let _ = live.await;
          });
          NetworkOutcome::TimedOut
        }
      },
      None => network_outcome(live.await),
    };

    match outcome {
      NetworkOutcome::Fresh(response) => Served::network(response),
      NetworkOutcome::Rejected(response) if on_rejected == OnRejected::ReturnLive => {
        Served::network(response)
      }
      NetworkOutcome::Rejected(response) => {
        debug!(url = %request.url, status = response.status, "Network rejected request, trying cache");
        self
          .fallback(request)
          .unwrap_or_else(|| Served::network(response))
      }
      NetworkOutcome::TimedOut => {
        warn!(url = %request.url, ?timeout, "Network timed out, trying cache");
        self
          .fallback(request)
          .unwrap_or_else(|| Served::failure(fallback::timeout_response()))
      }
      NetworkOutcome::Failed(e) => {
        warn!(url = %request.url, error = %e, "Network-first fetch failed, trying cache");
        self
          .fallback(request)
          .unwrap_or_else(|| Served::failure(fallback::unavailable_response()))
      }
    }
  }

  /// Cache-first.
  ///
  /// A hit is returned without touching the network; with `refresh` set a
  /// background fetch updates the entry for next time. A miss goes to the
  /// network and lands in the dynamic cache. When both fail, media gets a
  /// placeholder and everything else a 503.
  pub(super) async fn cache_first(
    &self,
    request: &Request,
    refresh: bool,
    media: Option<MediaKind>,
  ) -> Served {
    if let Some((role, entry)) = self.match_any(&RequestKey::from(request)) {
      debug!(url = %request.url, %role, cached_at = %entry.cached_at, "Cache hit");
      if refresh {
        self.spawn_refresh(request.clone(), role);
      }
      return Served::cache(entry.response);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(CacheRole::Dynamic, request, &response);
        }
        Served::network(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cache miss and network failure");
        match media {
          Some(kind) => Served::placeholder(fallback::media_placeholder(kind)),
          None => Served::failure(fallback::unavailable_response()),
        }
      }
    }
  }

  /// Stale-while-revalidate against the API cache.
  ///
  /// Expired entries are still served, never blocking the caller, while a
  /// background fetch replaces them. Misses use network-first with timeout.
  pub(super) async fn stale_while_revalidate(&self, request: &Request) -> Served {
    let key = RequestKey::from(request);

    match self.lookup(CacheRole::Api, &key) {
      Some(entry) if entry.is_expired(Utc::now()) => {
        debug!(url = %request.url, "Serving expired API entry, refreshing");
        self.spawn_refresh(request.clone(), CacheRole::Api);
        Served::stale(entry.response)
      }
      Some(entry) => Served::cache(entry.response),
      None => {
        self
          .network_first(
            request,
            CacheRole::Api,
            Some(self.config.network_timeout()),
            OnRejected::Fallback,
          )
          .await
      }
    }
  }

  /// Cached copy, then the offline page for document requests.
  fn fallback(&self, request: &Request) -> Option<Served> {
    if let Some((_, entry)) = self.match_any(&RequestKey::from(request)) {
      return Some(Served::cache(entry.response));
    }
    if request.is_navigation() {
      return Some(self.offline_page());
    }
    None
  }

  /// The cached offline page if installed, the built-in one otherwise.
  pub(super) fn offline_page(&self) -> Served {
    let key = RequestKey::for_url(&self.routes.offline_page);
    let response = self
      .match_any(&key)
      .map(|(_, entry)| entry.response)
      .unwrap_or_else(fallback::builtin_offline_page);
    Served::offline_page(response)
  }

  /// Look a request up in every declared generation, in role order.
  pub(super) fn match_any(&self, key: &RequestKey) -> Option<(CacheRole, CachedEntry)> {
    CacheRole::ALL
      .into_iter()
      .find_map(|role| self.lookup(role, key).map(|entry| (role, entry)))
  }

  /// Storage errors are logged and treated as a miss.
  pub(super) fn lookup(&self, role: CacheRole, key: &RequestKey) -> Option<CachedEntry> {
    match self.storage.lookup(self.config.cache_name(role), key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url = %key.url(), error = %e, "Cache lookup failed");
        None
      }
    }
  }

  /// Write a response to a role. API entries get an expiration.
  /// Returns whether anything was written.
  pub(super) fn store(&self, role: CacheRole, request: &Request, response: &Response) -> bool {
    if !self.should_cache(request) {
      return false;
    }

    let expires_at = (role == CacheRole::Api).then(|| Utc::now() + self.config.api_ttl());
    let key = RequestKey::from(request);

    match self
      .storage
      .put(self.config.cache_name(role), &key, response, expires_at)
    {
      Ok(()) => true,
      Err(e) => {
        warn!(url = %key.url(), error = %e, "Failed to cache response");
        false
      }
    }
  }

  fn should_cache(&self, request: &Request) -> bool {
    let url = request.url.as_str();
    request.method == reqwest::Method::GET
      && (self.is_same_origin(request) || self.is_allowed_host(request))
      && !self.config.never_cache.iter().any(|fragment| url.contains(fragment.as_str()))
  }

  /// Spawn the live leg of a network-first request. The task writes a 200
  /// to the cache itself, so the write happens even if nobody awaits it.
  fn spawn_fetch_and_store(&self, request: Request, role: CacheRole) -> JoinHandle<Result<Response>> {
    let this = self.clone();
    tokio::spawn(async move {
      let response = this.fetcher.fetch(&request).await?;
      if response.is_ok() {
        this.store(role, &request, &response);
      }
      Ok(response)
    })
  }

  /// Refresh a cached entry without making anyone wait for it.
  pub(super) fn spawn_refresh(&self, request: Request, role: CacheRole) {
    let this = self.clone();
    self.background.spawn(async move {
      match this.fetcher.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          if this.store(role, &request, &response) {
            debug!(url = %request.url, %role, "Refreshed cached entry");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Background refresh rejected");
        }
        Err(e) => debug!(url = %request.url, error = %e, "Background refresh failed"),
      }
    });
  }
}

fn network_outcome(
  joined: std::result::Result<Result<Response>, tokio::task::JoinError>,
) -> NetworkOutcome {
  match joined {
    Ok(Ok(response)) if response.is_ok() => NetworkOutcome::Fresh(response),
    Ok(Ok(response)) => NetworkOutcome::Rejected(response),
    Ok(Err(e)) => NetworkOutcome::Failed(e),
    Err(e) => NetworkOutcome::Failed(eyre!("Fetch task failed: {}", e)),
  }
}
