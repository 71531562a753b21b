//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::types::{CachedEntry, RequestKey};
use crate::net::Response;

/// Trait for cache storage backends.
///
/// A backend holds any number of named generations. Writes to a single key
/// are last-write-wins; only `put_all` groups writes atomically.
pub trait CacheStorage: Send + Sync + 'static {
  /// Names of every stored generation, oldest first.
  fn generation_names(&self) -> Result<Vec<String>>;

  /// Delete a generation and all its entries. Returns false if it did not exist.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Store one response, creating the generation if needed.
  fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    response: &Response,
    expires_at: Option<DateTime<Utc>>,
  ) -> Result<()>;

  /// Store a batch of responses in one transaction.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up an entry in one generation.
  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  fn entry_count(&self, generation: &str) -> Result<usize>;

  /// Delete entries of a generation whose expiration is before `now`.
  fn delete_expired(&self, generation: &str, now: DateTime<Utc>) -> Result<usize>;

  /// Read a registration value (e.g. the active version).
  fn registration(&self, key: &str) -> Result<Option<String>>;

  fn set_registration(&self, key: &str, value: &str) -> Result<()>;

  fn clear_registration(&self, key: &str) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("kplan-offline").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- One row per cached response; expiration is metadata, not a header
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    expires_at TEXT,
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_expires
    ON entries(generation, expires_at);

CREATE TABLE IF NOT EXISTS registration (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries
   (generation, key_hash, url, status, headers, body, cached_at, expires_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const ENSURE_GENERATION: &str =
  "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?, ?)";

impl CacheStorage for SqliteStorage {
  fn generation_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    response: &Response,
    expires_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let mut conn = self.conn()?;
    let now = format_timestamp(Utc::now());
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(ENSURE_GENERATION, params![generation, now])
      .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;
    tx.execute(
      UPSERT_ENTRY,
      params![
        generation,
        key.hash(),
        key.url(),
        response.status,
        headers,
        response.body,
        now,
        expires_at.map(format_timestamp),
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", key.url(), e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.conn()?;
    let now = format_timestamp(Utc::now());

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(ENSURE_GENERATION, params![generation, now])
      .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        UPSERT_ENTRY,
        params![
          generation,
          key.hash(),
          key.url(),
          response.status,
          headers,
          response.body,
          now,
          Option::<String>::None,
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key.url(), e))?;
    }

    // Dropping the transaction without commit rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;

    let row: Option<(u16, String, Vec<u8>, String, Option<String>)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at, expires_at FROM entries
         WHERE generation = ? AND key_hash = ?",
        params![generation, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url(), e))?;

    let Some((status, headers, body, cached_at, expires_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key.url(), e))?;

    Ok(Some(CachedEntry {
      response: Response {
        status,
        headers,
        body,
      },
      cached_at: parse_timestamp(&cached_at)?,
      expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
    }))
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let conn = self.conn()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", generation, e))?;

    Ok(count as usize)
  }

  fn delete_expired(&self, generation: &str, now: DateTime<Utc>) -> Result<usize> {
    let conn = self.conn()?;

    // Fixed-width RFC 3339 timestamps compare correctly as text
    let removed = conn
      .execute(
        "DELETE FROM entries
         WHERE generation = ? AND expires_at IS NOT NULL AND expires_at < ?",
        params![generation, format_timestamp(now)],
      )
      .map_err(|e| eyre!("Failed to delete expired entries of {}: {}", generation, e))?;

    Ok(removed)
  }

  fn registration(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn()?;

    conn
      .query_row(
        "SELECT value FROM registration WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read registration {}: {}", key, e))
  }

  fn set_registration(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO registration (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write registration {}: {}", key, e))?;

    Ok(())
  }

  fn clear_registration(&self, key: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute("DELETE FROM registration WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to clear registration {}: {}", key, e))?;

    Ok(())
  }
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}
