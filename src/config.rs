use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::CacheRole;

/// Upper bound for `api_ttl_hours`: ten years.
pub const MAX_API_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cache: CacheVersion,
  pub database: DatabaseConfig,
  pub log: LogConfig,
}

/// One version of the cache layout: role names, manifests and routing rules.
///
/// Bumping any of the role names is how a deploy forces a full cache reset;
/// activation reaps every generation whose name is no longer declared here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheVersion {
  /// Version tag recorded as active once activation finishes
  pub version: String,
  /// Base URL of the app; relative manifest paths resolve against it
  pub origin: String,
  pub caches: CacheNames,
  /// Assets required for the app to work at all - any failure fails install
  pub core_assets: Vec<String>,
  /// Nice-to-have assets, cached best-effort
  pub secondary_assets: Vec<String>,
  /// Cross-origin hosts whose requests are intercepted and cached
  pub allowed_hosts: Vec<String>,
  /// URL fragments that are never written to the cache
  pub never_cache: Vec<String>,
  /// Path prefixes served from the expiring API cache
  pub api_prefixes: Vec<String>,
  /// Page served when a navigation has neither network nor cache
  pub offline_page: String,
  pub network_timeout_ms: u64,
  pub api_ttl_hours: i64,
  pub cleanup_interval_secs: u64,
  /// Activate right after install instead of waiting for old pages to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheNames {
  #[serde(rename = "static")]
  pub static_shell: String,
  pub dynamic: String,
  pub api: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  /// Cache database path (defaults to $XDG_DATA_HOME/kplan-offline/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is not set
  pub filter: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      file: None,
    }
  }
}

impl Default for CacheNames {
  fn default() -> Self {
    Self {
      static_shell: "kidney-plan-static-v3".to_string(),
      dynamic: "kidney-plan-dynamic-v3".to_string(),
      api: "kidney-plan-api-v3".to_string(),
    }
  }
}

impl Default for CacheVersion {
  fn default() -> Self {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    Self {
      version: "v3".to_string(),
      origin: "http://localhost:8080/".to_string(),
      caches: CacheNames::default(),
      core_assets: strings(&[
        "./",
        "./index.html",
        "./offline.html",
        "./Kplan.css",
        "./Kplan.js",
        "./manifest.json",
        "./assets/icon-192.png",
        "./assets/icon-512.png",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/webfonts/fa-solid-900.woff2",
      ]),
      secondary_assets: strings(&[
        "https://assets.mixkit.co/sfx/preview/mixkit-achievement-bell-600.mp3",
        "https://assets.mixkit.co/sfx/preview/mixkit-positive-interface-beep-221.mp3",
      ]),
      allowed_hosts: strings(&["cdnjs.cloudflare.com", "assets.mixkit.co"]),
      never_cache: strings(&["google-analytics.com"]),
      api_prefixes: strings(&["./api/"]),
      offline_page: "./offline.html".to_string(),
      network_timeout_ms: 3000,
      api_ttl_hours: 24,
      cleanup_interval_secs: 3600,
      skip_waiting: true,
    }
  }
}

impl CacheVersion {
  /// Generation name backing a cache role.
  pub fn cache_name(&self, role: CacheRole) -> &str {
    match role {
      CacheRole::Static => &self.caches.static_shell,
      CacheRole::Dynamic => &self.caches.dynamic,
      CacheRole::Api => &self.caches.api,
    }
  }

  /// Every generation name this version keeps on activation.
  pub fn declared_names(&self) -> [&str; 3] {
    CacheRole::ALL.map(|role| self.cache_name(role))
  }

  pub fn network_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.network_timeout_ms)
  }

  /// Lifetime of an API entry. Out-of-range values are clamped; `validate`
  /// rejects them up front.
  pub fn api_ttl(&self) -> chrono::Duration {
    chrono::Duration::hours(self.api_ttl_hours.clamp(1, MAX_API_TTL_HOURS))
  }

  pub fn cleanup_interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.cleanup_interval_secs.max(1))
  }

  pub fn validate(&self) -> Result<()> {
    let names = self.declared_names();
    if names.iter().any(|n| n.is_empty()) {
      return Err(eyre!("Cache role names must not be empty"));
    }
    if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
      return Err(eyre!("Cache role names must be distinct: {:?}", names));
    }
    if self.network_timeout_ms == 0 {
      return Err(eyre!("network_timeout_ms must be greater than zero"));
    }
    if !(1..=MAX_API_TTL_HOURS).contains(&self.api_ttl_hours) {
      return Err(eyre!(
        "api_ttl_hours must be between 1 and {}, got {}",
        MAX_API_TTL_HOURS,
        self.api_ttl_hours
      ));
    }
    Ok(())
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kplan-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kplan-offline/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kplan-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kplan-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.cache.validate()
  }
}
