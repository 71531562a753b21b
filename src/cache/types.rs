//! Core types and keys for the cache store.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::net::{Request, Response};

/// Logical partition of the cache, each backed by one named generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheRole {
  /// App shell and core manifest
  Static,
  /// Secondary assets and runtime-cached responses
  Dynamic,
  /// API-like responses with an expiration
  Api,
}

impl CacheRole {
  /// Lookup order for cache matches.
  pub const ALL: [CacheRole; 3] = [CacheRole::Static, CacheRole::Dynamic, CacheRole::Api];
}

impl fmt::Display for CacheRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheRole::Static => write!(f, "static"),
      CacheRole::Dynamic => write!(f, "dynamic"),
      CacheRole::Api => write!(f, "api"),
    }
  }
}

/// Normalized cache key: GET + absolute URL without fragment.
///
/// Request headers never take part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  url: String,
  hash: String,
}

impl RequestKey {
  pub fn for_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let url = url.to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(url.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { url, hash }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }
}

impl From<&Request> for RequestKey {
  fn from(request: &Request) -> Self {
    Self::for_url(&request.url)
  }
}

/// A stored response with its write time and optional expiration.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
  pub expires_at: Option<DateTime<Utc>>,
}

impl CachedEntry {
  /// Entries without an expiration never go stale.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|expires_at| expires_at < now)
  }
}

/// A response handed back to the page, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  /// Live data from the network.
  pub fn network(response: Response) -> Self {
    Self::new(response, ResponseSource::Network)
  }

  /// Data from cache, considered fresh.
  pub fn cache(response: Response) -> Self {
    Self::new(response, ResponseSource::Cache)
  }

  /// Expired data from cache while a refresh runs.
  pub fn stale(response: Response) -> Self {
    Self::new(response, ResponseSource::CacheStale)
  }

  pub fn offline_page(response: Response) -> Self {
    Self::new(response, ResponseSource::OfflinePage)
  }

  pub fn placeholder(response: Response) -> Self {
    Self::new(response, ResponseSource::Placeholder)
  }

  /// Synthesized error response once every fallback is exhausted.
  pub fn failure(response: Response) -> Self {
    Self::new(response, ResponseSource::Failure)
  }

  fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Cache hit
  Cache,
  /// Expired cache hit, refresh scheduled
  CacheStale,
  /// Offline fallback page
  OfflinePage,
  /// Synthesized media placeholder
  Placeholder,
  /// Synthesized error (timeout or unavailable)
  Failure,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::CacheStale => "cache (stale)",
      ResponseSource::OfflinePage => "offline page",
      ResponseSource::Placeholder => "placeholder",
      ResponseSource::Failure => "failure",
    };
    f.write_str(label)
  }
}
