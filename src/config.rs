use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{ComputationConfig, OfflineConfig, WriterConfig};

/// Overrides `api.base_url`
pub const API_URL_ENV: &str = "ENVCACHE_API_URL";
/// Sent as a bearer token when set
pub const API_TOKEN_ENV: &str = "ENVCACHE_API_TOKEN";

const HOUR_SECS: u64 = 60 * 60;
const DAY_SECS: u64 = 24 * HOUR_SECS;
/// Longest duration any setting may express (100 years)
const MAX_DURATION_SECS: u64 = 100 * 365 * DAY_SECS;

/// `value * unit_secs` as a duration, saturating instead of overflowing.
fn scaled(value: u64, unit_secs: u64) -> Duration {
  Duration::from_secs(value.saturating_mul(unit_secs))
}

fn check_range(name: &str, value: u64, unit_secs: u64) -> Result<()> {
  if value > MAX_DURATION_SECS / unit_secs {
    return Err(eyre!(
      "{} is too large: {} exceeds {}",
      name,
      value,
      MAX_DURATION_SECS / unit_secs
    ));
  }
  Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub offline: OfflineSettings,
  /// Directory holding the SQLite files and logs (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api".to_string(),
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub l1_ttl_secs: u64,
  pub l1_capacity: usize,
  pub l2_ttl_hours: u64,
  pub dataset_ttl_secs: u64,
  /// Upper bound on rows pulled into one dataset snapshot
  pub dataset_page_limit: usize,
  pub store_timeout_secs: u64,
  pub write_queue_capacity: usize,
  pub write_retries: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      l1_ttl_secs: 300,
      l1_capacity: 1000,
      l2_ttl_hours: 24,
      dataset_ttl_secs: 300,
      dataset_page_limit: 500,
      store_timeout_secs: 5,
      write_queue_capacity: 256,
      write_retries: 3,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
  pub stale_threshold_hours: u64,
  pub max_retention_days: u64,
  pub refresh_interval_secs: u64,
  /// Connectivity probe period; 0 disables the probe
  pub probe_interval_secs: u64,
}

impl Default for OfflineSettings {
  fn default() -> Self {
    Self {
      stale_threshold_hours: 24,
      max_retention_days: 30,
      refresh_interval_secs: 300,
      probe_interval_secs: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./envcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/envcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists. Environment overrides are
  /// applied and the result is validated either way.
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
    config.apply_overrides(std::env::var(API_URL_ENV).ok());
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("envcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("envcache").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn apply_overrides(&mut self, api_url: Option<String>) {
    if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
      self.api.base_url = url;
    }
  }

  /// Get the API token from the environment, if any.
  pub fn api_token() -> Option<String> {
    std::env::var(API_TOKEN_ENV)
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  pub fn validate(&self) -> Result<()> {
    let cache = &self.cache;
    let offline = &self.offline;
    for (name, value, unit) in [
      ("api.timeout_secs", self.api.timeout_secs, 1),
      ("cache.l1_ttl_secs", cache.l1_ttl_secs, 1),
      ("cache.l2_ttl_hours", cache.l2_ttl_hours, HOUR_SECS),
      ("cache.dataset_ttl_secs", cache.dataset_ttl_secs, 1),
      ("cache.store_timeout_secs", cache.store_timeout_secs, 1),
      ("offline.stale_threshold_hours", offline.stale_threshold_hours, HOUR_SECS),
      ("offline.max_retention_days", offline.max_retention_days, DAY_SECS),
      ("offline.refresh_interval_secs", offline.refresh_interval_secs, 1),
      ("offline.probe_interval_secs", offline.probe_interval_secs, 1),
    ] {
      check_range(name, value, unit)?;
    }

    if cache.l1_capacity == 0 {
      return Err(eyre!("cache.l1_capacity must be greater than 0"));
    }
    if cache.l1_ttl_secs == 0 || cache.l2_ttl_hours == 0 || cache.dataset_ttl_secs == 0 {
      return Err(eyre!("cache TTLs must be greater than 0"));
    }
    if self.l2_ttl() < self.l1_ttl() {
      return Err(eyre!(
        "cache.l2_ttl_hours ({}h) must not be shorter than cache.l1_ttl_secs ({}s)",
        cache.l2_ttl_hours,
        cache.l1_ttl_secs
      ));
    }
    if cache.dataset_page_limit == 0 || cache.write_queue_capacity == 0 {
      return Err(eyre!(
        "cache.dataset_page_limit and cache.write_queue_capacity must be greater than 0"
      ));
    }
    if self.offline.stale_threshold_hours == 0 || self.offline.refresh_interval_secs == 0 {
      return Err(eyre!(
        "offline.stale_threshold_hours and offline.refresh_interval_secs must be greater than 0"
      ));
    }
    Ok(())
  }

  /// Directory for the SQLite files and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .map(|d| d.join("envcache"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  fn l1_ttl(&self) -> Duration {
    Duration::from_secs(self.cache.l1_ttl_secs)
  }

  fn l2_ttl(&self) -> Duration {
    scaled(self.cache.l2_ttl_hours, HOUR_SECS)
  }

  pub fn store_timeout(&self) -> Duration {
    Duration::from_secs(self.cache.store_timeout_secs)
  }

  pub fn dataset_ttl(&self) -> Duration {
    Duration::from_secs(self.cache.dataset_ttl_secs)
  }

  /// `None` when the probe is disabled.
  pub fn probe_interval(&self) -> Option<Duration> {
    match self.offline.probe_interval_secs {
      0 => None,
      secs => Some(Duration::from_secs(secs)),
    }
  }

  pub fn writer_config(&self) -> WriterConfig {
    WriterConfig {
      queue_capacity: self.cache.write_queue_capacity,
      max_attempts: self.cache.write_retries.max(1),
      timeout: self.store_timeout(),
      ..WriterConfig::default()
    }
  }

  pub fn computation_config(&self) -> ComputationConfig {
    ComputationConfig {
      l1_ttl: self.l1_ttl(),
      l1_capacity: self.cache.l1_capacity,
      l2_ttl: self.l2_ttl(),
      store_timeout: self.store_timeout(),
      writer: self.writer_config(),
    }
  }

  pub fn offline_config(&self) -> OfflineConfig {
    let offline = &self.offline;
    OfflineConfig {
      stale_threshold: scaled(offline.stale_threshold_hours, HOUR_SECS),
      max_retention: scaled(offline.max_retention_days, DAY_SECS),
      refresh_interval: Duration::from_secs(offline.refresh_interval_secs),
      fetch_timeout: Duration::from_secs(self.api.timeout_secs),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    config.validate().unwrap();

    let computation = config.computation_config();
    assert_eq!(computation.l1_ttl, Duration::from_secs(300));
    assert_eq!(computation.l1_capacity, 1000);
    assert_eq!(computation.l2_ttl, Duration::from_secs(24 * 60 * 60));
    assert_eq!(computation.writer.max_attempts, 3);
    assert_eq!(config.dataset_ttl(), Duration::from_secs(300));
    assert_eq!(
      config.offline_config().max_retention,
      Duration::from_secs(30 * 24 * 60 * 60)
    );
    assert_eq!(config.probe_interval(), Some(Duration::from_secs(30)));
  }

  #[test]
  fn test_partial_sections_keep_defaults() {
    let config = Config::parse(
      r#"
api:
  base_url: "https://metrics.example.org/v1"
cache:
  l1_capacity: 50
offline:
  probe_interval_secs: 0
data_dir: /tmp/envcache-test
"#,
    )
    .unwrap();

    assert_eq!(config.api.base_url, "https://metrics.example.org/v1");
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.cache.l1_capacity, 50);
    assert_eq!(config.cache.l1_ttl_secs, 300);
    assert_eq!(config.probe_interval(), None);
    assert_eq!(
      config.data_dir().unwrap(),
      PathBuf::from("/tmp/envcache-test")
    );
  }

  #[test]
  fn test_validate_rejects_bad_values() {
    let mut config = Config::default();
    config.cache.l1_capacity = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.cache.l1_ttl_secs = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.cache.l1_ttl_secs = 2 * 60 * 60;
    config.cache.l2_ttl_hours = 1;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("l2_ttl_hours"));
  }

  #[test]
  fn test_validate_rejects_out_of_range_durations() {
    let mut config = Config::default();
    config.cache.l2_ttl_hours = u64::MAX / 100;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("cache.l2_ttl_hours is too large"));

    let mut config = Config::default();
    config.offline.max_retention_days = 200_000_000;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("offline.max_retention_days"));

    let mut config = Config::default();
    config.offline.max_retention_days = 36_500;
    config.validate().unwrap();
  }

  #[test]
  fn test_conversions_saturate_instead_of_overflowing() {
    let mut config = Config::default();
    config.cache.l2_ttl_hours = u64::MAX;
    config.offline.max_retention_days = u64::MAX;

    assert_eq!(config.computation_config().l2_ttl, Duration::from_secs(u64::MAX));
    assert_eq!(config.offline_config().max_retention, Duration::from_secs(u64::MAX));
  }

  #[test]
  fn test_api_url_override() {
    let mut config = Config::default();
    config.apply_overrides(Some("http://override:9000".to_string()));
    assert_eq!(config.api.base_url, "http://override:9000");

    config.apply_overrides(Some("  ".to_string()));
    assert_eq!(config.api.base_url, "http://override:9000");

    config.apply_overrides(None);
    assert_eq!(config.api.base_url, "http://override:9000");
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/envcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "cache:\n  write_retries: 5\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.writer_config().max_attempts, 5);
  }

  #[test]
  fn test_invalid_yaml_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "cache: [not, a, map]\n").unwrap();

    let err = Config::load(Some(&path)).unwrap_err().to_string();
    assert!(err.contains("broken.yaml"));
  }
}
