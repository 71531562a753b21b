//! Network seam: request/response snapshots and the live fetcher.

mod client;
mod request;

pub use client::{Fetcher, HttpFetcher};
pub use request::{Destination, Request, Response};
