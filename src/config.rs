use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::db::Database;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Title used for push notifications
  pub app_name: String,
  pub cache: CacheConfig,
  pub storage: StorageConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_name: "Salão".to_string(),
      cache: CacheConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every cache namespace name
  pub prefix: String,
  /// Deployed version; bumping it makes older namespaces stale
  pub version: String,
  /// Origin the application is served from
  pub origin: String,
  /// Paths precached on install, relative to the origin
  pub shell_assets: Vec<String>,
  /// Page served when a navigation cannot be answered
  pub root_document: String,
  /// Activate right after a successful install instead of waiting
  pub skip_waiting_on_install: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "salao".to_string(),
      version: "v1".to_string(),
      origin: "http://localhost:5173".to_string(),
      shell_assets: [
        "/",
        "/index.html",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      root_document: "/".to_string(),
      skip_waiting_on_install: true,
    }
  }
}

impl CacheConfig {
  pub fn static_namespace(&self) -> String {
    format!("{}-static-{}", self.prefix, self.version)
  }

  pub fn dynamic_namespace(&self) -> String {
    format!("{}-dynamic-{}", self.prefix, self.version)
  }

  /// General bucket from earlier deployments. Never current, only purged.
  pub fn legacy_namespace(&self) -> String {
    format!("{}-{}", self.prefix, self.version)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite file (default: $XDG_DATA_HOME/salon-offline/salon.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn resolved_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(p) => Ok(p.clone()),
      None => Database::default_path(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./salon-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/salon-offline/config.yaml
  ///
  /// Without a file, defaults are used. `SALON_ORIGIN` overrides the origin.
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
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("SALON_ORIGIN") {
      config.cache.origin = origin;
    }

    // Fail early on a bad origin instead of on the first request
    config.cache.origin_url()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("salon-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("salon-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}
