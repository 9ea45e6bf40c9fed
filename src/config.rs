use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Live cache namespace tag. Bump on every deploy.
  pub version: String,
  /// Base URL that relative request paths resolve against
  pub origin: String,
  /// Directory holding the durable store and log files
  pub data_dir: Option<PathBuf>,
  /// Soft freshness window for API responses
  pub api_soft_ttl_secs: u64,
  /// Path prefixes that mark a request as an API call
  pub api_prefixes: Vec<String>,
  /// Path fragments that mark a request as an API call anywhere in the path
  pub api_markers: Vec<String>,
  /// Origins whose uploads are never intercepted and whose assets are never cached
  pub never_cache_origins: Vec<String>,
  /// Path fragments and query keys that mark an upload request
  pub upload_markers: UploadMarkers,
  /// Paths fetched into the namespace on install
  pub precache: Vec<String>,
  /// Strategy for requests that are neither navigation, API nor asset
  pub other_strategy: OtherStrategy,
  pub connectivity: ConnectivityConfig,
  pub request_timeout_secs: u64,
  /// Also write a daily-rotated log file under `data_dir`
  pub log_to_file: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OtherStrategy {
  #[default]
  StaleWhileRevalidate,
  NetworkFirst,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadMarkers {
  pub path_fragments: Vec<String>,
  pub query_keys: Vec<String>,
}

impl Default for UploadMarkers {
  fn default() -> Self {
    Self {
      path_fragments: vec!["upload".to_string()],
      query_keys: vec!["uploadType".to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// URL probed to detect that the network is back. Defaults to `origin`.
  pub probe_url: Option<String>,
  pub poll_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      poll_interval_secs: 15,
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      version: "v1".to_string(),
      origin: "http://localhost".to_string(),
      data_dir: None,
      api_soft_ttl_secs: 10,
      api_prefixes: vec!["/api/".to_string()],
      api_markers: vec!["/functions/".to_string()],
      never_cache_origins: vec!["firebasestorage.googleapis.com".to_string()],
      upload_markers: UploadMarkers::default(),
      precache: vec!["/".to_string(), "/index.html".to_string()],
      other_strategy: OtherStrategy::default(),
      connectivity: ConnectivityConfig::default(),
      request_timeout_secs: 30,
      log_to_file: false,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./edgecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/edgecache/config.yaml
  ///
  /// Falls back to defaults when no file exists.
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
    let local = PathBuf::from("edgecache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("edgecache").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    if config.version.trim().is_empty() {
      return Err(eyre!("Cache version must not be empty"));
    }
    Ok(config)
  }

  /// Directory for the durable store and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("edgecache"))
  }

  pub fn api_soft_ttl(&self) -> Duration {
    Duration::from_secs(self.api_soft_ttl_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.poll_interval_secs.max(1))
  }

  pub fn probe_url(&self) -> &str {
    self
      .connectivity
      .probe_url
      .as_deref()
      .unwrap_or(&self.origin)
  }
}
