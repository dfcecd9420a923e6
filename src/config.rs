use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the application; responses from it are same-origin
  pub origin: Url,
  /// Prefix of every cache store name (e.g. "applezero" -> "applezero-v1.0.0")
  pub app_name: String,
  /// Generation tag of this deploy
  pub version: String,
  /// Activate a freshly installed generation without waiting
  pub skip_waiting: bool,
  /// Paths pre-fetched at install and served cache-first
  pub static_assets: Vec<String>,
  /// Root document served when a navigation cannot reach the network
  pub shell_path: String,
  pub api: ApiConfig,
  pub notifications: NotificationConfig,
  pub storage: StorageConfig,
  /// Also write logs to this file
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Path prefix shared by all backend API calls
  pub prefix: String,
  /// Public GET endpoints served stale-while-revalidate
  pub public_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub default_title: String,
  pub default_body: String,
  pub default_url: String,
  pub icon: String,
  pub badge: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// In-process only, gone when the process exits
  Memory,
  /// Caching disabled
  None,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: StorageBackend,
  /// Database path (default: $XDG_DATA_HOME/swcache/cache.db)
  pub path: Option<PathBuf>,
  /// Entry limit for the memory backend; writes past it fail with a quota error
  pub max_entries: Option<usize>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:3000").expect("static origin parses"),
      app_name: "applezero".to_string(),
      version: "1.0.0".to_string(),
      skip_waiting: true,
      static_assets: [
        "/",
        "/static/js/bundle.js",
        "/static/css/main.css",
        "/manifest.json",
        "/icon-192.png",
        "/icon-512.png",
        "/apple-touch-icon.png",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      shell_path: "/".to_string(),
      api: ApiConfig::default(),
      notifications: NotificationConfig::default(),
      storage: StorageConfig::default(),
      log_file: None,
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      prefix: "/api/".to_string(),
      public_endpoints: vec!["stats".to_string(), "bank-info".to_string()],
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: "AppleZero Update".to_string(),
      default_body: "Your transfer request has been updated".to_string(),
      default_url: "/".to_string(),
      icon: "/icon-192.png".to_string(),
      badge: "/icon-192.png".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Without any file the built-in defaults are used.
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

    if let Some(version) = Self::version_override() {
      config.version = version;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
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
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Generation tag from the environment, if set.
  ///
  /// Checks SWCACHE_VERSION.
  pub fn version_override() -> Option<String> {
    std::env::var("SWCACHE_VERSION")
      .ok()
      .filter(|v| !v.trim().is_empty())
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("Config: version must not be empty"));
    }
    if self.app_name.trim().is_empty() {
      return Err(eyre!("Config: app_name must not be empty"));
    }
    if !self.api.prefix.starts_with('/') {
      return Err(eyre!("Config: api.prefix must start with '/'"));
    }
    if self
      .api
      .public_endpoints
      .iter()
      .any(|e| e.trim_matches('/').is_empty())
    {
      return Err(eyre!("Config: api.public_endpoints must not contain empty entries"));
    }
    if let Some(bad) = self.static_assets.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("Config: static asset '{}' must be an absolute path", bad));
    }
    Ok(())
  }

  /// Resolve a path or absolute URL against the configured origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))
  }

  /// Where the SQLite registry lives.
  pub fn database_path(&self) -> Result<PathBuf> {
    self
      .storage
      .path
      .clone()
      .or_else(crate::cache::SqliteStorage::default_path)
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = Config::default();
    config.validate().unwrap();
    assert_eq!(config.static_assets.len(), 7);
    assert_eq!(config.api.prefix, "/api/");
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://bank.example"
version: "2.0.0"
api:
  public_endpoints: ["stats"]
storage:
  backend: memory
  max_entries: 500
"#,
    )
    .unwrap();

    assert_eq!(config.origin.as_str(), "https://bank.example/");
    assert_eq!(config.version, "2.0.0");
    assert_eq!(config.app_name, "applezero");
    assert_eq!(config.api.prefix, "/api/");
    assert_eq!(config.api.public_endpoints, vec!["stats".to_string()]);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.storage.max_entries, Some(500));
  }

  #[test]
  fn test_relative_asset_rejected() {
    let config = Config {
      static_assets: vec!["icon.png".into()],
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_empty_public_endpoint_rejected() {
    let mut config = Config::default();
    config.api.public_endpoints.push("/".into());
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_resolve_relative_and_absolute() {
    let config = Config::default();
    assert_eq!(
      config.resolve("/api/stats?a=1").unwrap().as_str(),
      "http://localhost:3000/api/stats?a=1"
    );
    assert_eq!(
      config.resolve("https://cdn.example/x.js").unwrap().as_str(),
      "https://cdn.example/x.js"
    );
  }
}
