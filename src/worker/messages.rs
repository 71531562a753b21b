//! Messages exchanged with open pages, and the registry of those pages.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Page -> manager
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
  /// The page saw the browser go online or offline
  NetworkStatus { online: bool },
  /// Activate the waiting generation now
  SkipWaiting,
}

impl PageMessage {
  pub fn parse(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Unrecognized page message {}: {}", raw, e))
  }
}

/// Manager -> page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  Online,
  Offline,
  /// A new generation finished installing while an old one is active
  UpdateAvailable,
}

pub type ClientId = u64;

struct Client {
  id: ClientId,
  controlled: bool,
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

#[derive(Default)]
struct Registry {
  next_id: ClientId,
  clients: Vec<Client>,
}

/// Open pages that receive broadcasts.
#[derive(Clone, Default)]
pub struct Clients {
  inner: Arc<Mutex<Registry>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a page and get the receiving end of its message channel.
  pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<WorkerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut registry = self.registry();

    let id = registry.next_id;
    registry.next_id += 1;
    registry.clients.push(Client {
      id,
      controlled: false,
      tx,
    });

    (id, rx)
  }

  /// Take control of every open page. Returns the number of pages.
  pub fn claim(&self) -> usize {
    let mut registry = self.registry();
    for client in &mut registry.clients {
      client.controlled = true;
    }
    registry.clients.len()
  }

  pub fn is_controlled(&self, id: ClientId) -> bool {
    self
      .registry()
      .clients
      .iter()
      .any(|c| c.id == id && c.controlled)
  }

  /// Send a message to every open page. Pages that went away are dropped.
  pub fn broadcast(&self, message: WorkerMessage) -> usize {
    let mut registry = self.registry();
    registry.clients.retain(|c| c.tx.send(message).is_ok());
    registry.clients.len()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.registry().clients.len()
  }

  fn registry(&self) -> MutexGuard<'_, Registry> {
    // The registry holds no invariants a panicking holder could break
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_network_status() {
    let message = PageMessage::parse(r#"{"type":"NETWORK_STATUS","online":false}"#).unwrap();
    assert_eq!(message, PageMessage::NetworkStatus { online: false });
  }

  #[test]
  fn test_parse_skip_waiting() {
    let message = PageMessage::parse(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(message, PageMessage::SkipWaiting);
  }

  #[test]
  fn test_parse_rejects_unknown_and_malformed() {
    assert!(PageMessage::parse(r#"{"type":"CLEAR_EVERYTHING"}"#).is_err());
    assert!(PageMessage::parse(r#"{"type":"NETWORK_STATUS"}"#).is_err());
    assert!(PageMessage::parse("not json").is_err());
  }

  #[test]
  fn test_worker_message_wire_format() {
    assert_eq!(
      serde_json::to_string(&WorkerMessage::Online).unwrap(),
      r#"{"type":"ONLINE"}"#
    );
    assert_eq!(
      serde_json::to_string(&WorkerMessage::UpdateAvailable).unwrap(),
      r#"{"type":"UPDATE_AVAILABLE"}"#
    );
  }

  #[test]
  fn test_broadcast_reaches_every_client() {
    let clients = Clients::new();
    let (_, mut first) = clients.connect();
    let (_, mut second) = clients.connect();

    assert_eq!(clients.broadcast(WorkerMessage::Offline), 2);
    assert_eq!(first.try_recv().unwrap(), WorkerMessage::Offline);
    assert_eq!(second.try_recv().unwrap(), WorkerMessage::Offline);
  }

  #[test]
  fn test_broadcast_drops_closed_clients() {
    let clients = Clients::new();
    let (_, rx) = clients.connect();
    let (_, mut open) = clients.connect();
    drop(rx);

    assert_eq!(clients.broadcast(WorkerMessage::Online), 1);
    assert_eq!(clients.len(), 1);
    assert_eq!(open.try_recv().unwrap(), WorkerMessage::Online);
  }

  #[test]
  fn test_claim_controls_open_pages() {
    let clients = Clients::new();
    let (id, _rx) = clients.connect();
    assert!(!clients.is_controlled(id));

    assert_eq!(clients.claim(), 1);
    assert!(clients.is_controlled(id));
  }
}
