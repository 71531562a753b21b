//! Synthesized responses for when both network and cache come up empty.

use crate::net::Response;

/// Built-in offline page, used when no copy of the configured page is cached.
const OFFLINE_PAGE: &str = include_str!("../../assets/offline.html");

const IMAGE_PLACEHOLDER: &str = r#"<svg width="100" height="100" viewBox="0 0 100 100" xmlns="http://www.w3.org/2000/svg"><text x="50%" y="50%" font-size="12" text-anchor="middle">Image</text></svg>"#;

/// Decorative media whose absence must not break the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Font,
  Audio,
}

pub fn builtin_offline_page() -> Response {
  Response::new(200, OFFLINE_PAGE).with_header("content-type", "text/html; charset=utf-8")
}

/// Placeholder for media that could not be loaded from anywhere.
pub fn media_placeholder(kind: MediaKind) -> Response {
  match kind {
    MediaKind::Image => {
      Response::new(200, IMAGE_PLACEHOLDER).with_header("content-type", "image/svg+xml")
    }
    // Silent: an empty body plays nothing and renders with fallback fonts
    MediaKind::Audio => Response::new(200, Vec::new()).with_header("content-type", "audio/mpeg"),
    MediaKind::Font => Response::new(200, Vec::new()).with_header("content-type", "font/woff2"),
  }
}

/// What a network race produced when the timer won.
pub fn timeout_response() -> Response {
  Response::new(504, "Network timeout").with_header("content-type", "text/plain")
}

/// Final answer for a non-document request with no network and no cache.
pub fn unavailable_response() -> Response {
  Response::new(503, "Network and cache both failed").with_header("content-type", "text/plain")
}
