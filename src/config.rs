use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application shell is served from
  pub origin: String,
  /// Deployment version; cache store names are derived from it
  pub version: String,
  /// Database location (defaults to the data directory)
  pub database: Option<PathBuf>,
  /// Application shell resources cached on install, in order
  pub static_manifest: Vec<String>,
  pub api: ApiConfig,
  pub notifications: NotificationConfig,
  pub sync: SyncConfig,
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Paths starting with this prefix are API requests
  pub prefix: String,
  /// Path prefixes whose successful GET responses are cached
  pub cacheable: Vec<String>,
  /// Synthetic path the admin dashboard snapshot is stored under
  pub admin_snapshot_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push carries no text
  pub fallback_body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
  pub explore_title: String,
  pub close_title: String,
  /// Route opened by the `explore` action
  pub open_route: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag the replay queue is registered under
  pub tag: String,
  /// Queue mutating API requests that fail on the network
  pub queue_failed_mutations: bool,
  /// Drop a queued request after this many failed replays; unset keeps it forever
  pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Request timeout; unset leaves it to the network stack
  pub timeout_secs: Option<u64>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      version: "v1".to_string(),
      database: None,
      static_manifest: [
        "/",
        "/static/js/bundle.js",
        "/static/css/main.css",
        "/manifest.json",
        "/favicon.ico",
        "/logo192.png",
        "/logo512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      api: ApiConfig::default(),
      notifications: NotificationConfig::default(),
      sync: SyncConfig::default(),
      network: NetworkConfig::default(),
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      prefix: "/api/".to_string(),
      cacheable: [
        "/api/organizations",
        "/api/tenants",
        "/api/branding",
        "/api/themes",
        "/api/sounds",
        "/api/admin/dashboard",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      admin_snapshot_path: "/api/admin/offline-data".to_string(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Therapeutic Sounds".to_string(),
      fallback_body: "New content is available".to_string(),
      icon: "/logo192.png".to_string(),
      badge: "/logo192.png".to_string(),
      vibrate: vec![100, 50, 100],
      explore_title: "View details".to_string(),
      close_title: "Close".to_string(),
      open_route: "/dashboard".to_string(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "background-sync".to_string(),
      queue_failed_mutations: true,
      max_attempts: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./offline-proxy.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-proxy/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        info!("no configuration file found, using defaults");
        Self::default()
      }
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-proxy.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-proxy").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    info!(path = %path.display(), "loaded configuration");
    Ok(config)
  }

  /// Reject configurations the proxy cannot route with.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.version.trim().is_empty() {
      return Err(eyre!("Config field `version` must not be empty"));
    }
    if !self.api.prefix.starts_with('/') {
      return Err(eyre!(
        "Config field `api.prefix` must start with '/': {}",
        self.api.prefix
      ));
    }
    if self.sync.max_attempts == Some(0) {
      return Err(eyre!("Config field `sync.max_attempts` must be at least 1"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  /// Name of the static-asset cache store for this deployment.
  pub fn static_cache_name(&self) -> String {
    format!("static-{}", self.version)
  }

  /// Name of the API-response cache store for this deployment.
  pub fn api_cache_name(&self) -> String {
    format!("api-{}", self.version)
  }
}
