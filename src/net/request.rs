//! Request and response snapshots exchanged with the network and the cache.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Method;
use url::Url;

/// How the page issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document navigation
  Navigate,
  /// Subresource or script-issued fetch
  Cors,
}

/// What kind of resource the page expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Destination {
  /// Unknown - routing falls back to the URL extension
  #[default]
  Empty,
  Document,
  Script,
  Style,
  Image,
  Font,
  Audio,
}

/// An outgoing request issued by a page.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      mode: RequestMode::Cors,
      destination: Destination::default(),
    }
  }

  /// A plain GET, as issued by `fetch(url)` or by manifest population.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A top-level document navigation.
  pub fn navigate(url: Url) -> Self {
    let mut request = Self::get(url).with_accept("text/html,application/xhtml+xml");
    request.mode = RequestMode::Navigate;
    request.destination = Destination::Document;
    request
  }

  /// Set the Accept header. Invalid header values are ignored.
  pub fn with_accept(mut self, accept: &str) -> Self {
    if let Ok(value) = HeaderValue::from_str(accept) {
      self.headers.insert(ACCEPT, value);
    }
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  /// Whether the Accept header asks for an HTML document.
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get(ACCEPT)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|accept| accept.contains("text/html"))
  }

  /// Navigations and HTML-accepting GETs are served as documents.
  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate || (self.method == Method::GET && self.accepts_html())
  }
}

/// A response snapshot: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  /// Only complete 200 responses are usable as cache snapshots.
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_navigate_accepts_html() {
    let request = Request::navigate(url("https://kplan.test/"));
    assert!(request.accepts_html());
    assert!(request.is_navigation());
  }

  #[test]
  fn test_html_accept_on_get_is_navigation() {
    let request = Request::get(url("https://kplan.test/about")).with_accept("text/html");
    assert_eq!(request.mode, RequestMode::Cors);
    assert!(request.is_navigation());
  }

  #[test]
  fn test_html_accept_on_post_is_not_navigation() {
    let request =
      Request::new(Method::POST, url("https://kplan.test/form")).with_accept("text/html");
    assert!(!request.is_navigation());
  }

  #[test]
  fn test_plain_get_is_not_navigation() {
    let request = Request::get(url("https://kplan.test/Kplan.js"));
    assert!(!request.accepts_html());
    assert!(!request.is_navigation());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::new(200, "ok").with_header("Content-Type", "text/plain");
    assert_eq!(response.content_type(), Some("text/plain"));
    assert_eq!(response.header("CONTENT-TYPE"), Some("text/plain"));
    assert!(response.header("etag").is_none());
  }

  #[test]
  fn test_only_200_is_ok() {
    assert!(Response::new(200, "").is_ok());
    assert!(!Response::new(204, "").is_ok());
    assert!(!Response::new(404, "").is_ok());
  }
}
