use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub erp: ErpConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErpConfig {
  /// Base URL of the ERP instance (the JSON-RPC endpoint lives under it)
  pub url: String,
  /// Database name on the ERP server
  pub db: String,
  /// Login of the API user; the key comes from the environment
  pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cached data older than this is eligible for an incremental refresh
  #[serde(default = "default_stale_after_hours")]
  pub stale_after_hours: i64,
  /// Lookback subtracted from the last sync time on incremental fetches,
  /// tolerating clock skew and late-arriving records at the source
  #[serde(default = "default_overlap_hours")]
  pub overlap_hours: i64,
  /// Override for the cache database location
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_hours: default_stale_after_hours(),
      overlap_hours: default_overlap_hours(),
      path: None,
    }
  }
}

fn default_stale_after_hours() -> i64 {
  24
}

fn default_overlap_hours() -> i64 {
  3
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./opsdash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/opsdash/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/opsdash/config.yaml\n\
                 with an erp section (url, db, username)."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("opsdash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("opsdash").join("config.yaml");
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

    Ok(config)
  }

  /// Get the ERP API key from environment variables.
  ///
  /// Checks OPSDASH_ERP_API_KEY first, then ERP_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("OPSDASH_ERP_API_KEY")
      .or_else(|_| std::env::var("ERP_API_KEY"))
      .map_err(|_| {
        eyre!("ERP API key not found. Set OPSDASH_ERP_API_KEY or ERP_API_KEY environment variable.")
      })
  }

  /// Staleness threshold as a duration.
  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::hours(self.cache.stale_after_hours)
  }

  /// Incremental-fetch overlap window as a duration.
  pub fn overlap(&self) -> chrono::Duration {
    chrono::Duration::hours(self.cache.overlap_hours)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_minimal_config() {
    let config: Config = serde_yaml::from_str(
      "erp:\n  url: https://erp.example.com\n  db: production\n  username: dashboard\n",
    )
    .unwrap();

    assert_eq!(config.erp.db, "production");
    assert_eq!(config.cache.stale_after_hours, 24);
    assert_eq!(config.cache.overlap_hours, 3);
    assert!(config.cache.path.is_none());
  }

  #[test]
  fn test_parse_cache_overrides() {
    let yaml = "erp:\n  url: https://erp.example.com\n  db: production\n  username: dashboard\ncache:\n  stale_after_hours: 1\n  overlap_hours: 6\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.stale_after(), chrono::Duration::hours(1));
    assert_eq!(config.overlap(), chrono::Duration::hours(6));
  }
}
