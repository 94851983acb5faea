use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheGeneration, DEFAULT_CACHE_VERSION};

/// Environment variable overriding `server.url`
pub const SERVER_URL_ENV: &str = "BUDGET_SYNC_SERVER_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  /// Where the pending queue, response cache and logs live
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub url: String,
  pub timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:3000".to_string(),
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix of the cache names
  pub name: String,
  /// Bumping this evicts every older cache on the next activation
  pub version: String,
  /// Static assets fetched on install
  pub assets: Vec<String>,
  /// Requests under this path are live data (network first)
  pub api_prefix: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "budget".to_string(),
      version: DEFAULT_CACHE_VERSION.to_string(),
      assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles.css".to_string(),
        "/index.js".to_string(),
      ],
      api_prefix: "/api/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub probe_path: String,
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      probe_path: "/".to_string(),
      probe_interval_secs: 5,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./budget-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/budget-sync/config.yaml
  ///
  /// Without a file the defaults apply. `BUDGET_SYNC_SERVER_URL` overrides
  /// the server URL either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var(SERVER_URL_ENV) {
      config.server.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("budget-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("budget-sync").join("config.yaml");
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
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn server_url(&self) -> Result<Url> {
    Url::parse(&self.server.url)
      .map_err(|e| eyre!("Invalid server URL '{}': {}", self.server.url, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.server.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs.max(1))
  }

  pub fn generation(&self) -> CacheGeneration {
    CacheGeneration::new(&self.cache.name, &self.cache.version)
  }

  /// Resolve the data directory, defaulting to the platform data dir.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .map(|d| d.join("budget-sync"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  pub fn pending_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("pending.db"))
  }

  pub fn cache_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache.db"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("logs"))
  }
}
