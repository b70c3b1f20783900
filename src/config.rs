use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub candles: CandlesConfig,
  /// Minutes between scheduled listing refreshes
  pub refresh_minutes: u64,
  /// Database path (default: $XDG_DATA_HOME/coinwatch/coins.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Reference currency for quotes
  pub currency: String,
  /// How many listing entries each sync fetches
  pub listing_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CandlesConfig {
  pub base_url: String,
  /// Candles per detail request
  pub limit: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      candles: CandlesConfig::default(),
      refresh_minutes: 15,
      database: None,
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://pro-api.coinmarketcap.com".to_string(),
      currency: "USD".to_string(),
      listing_limit: 200,
    }
  }
}

impl Default for CandlesConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.binance.com/api/v3/klines".to_string(),
      limit: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./coinwatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/coinwatch/config.yaml
  ///
  /// Every key has a default, so a missing file just yields the defaults.
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
    let local = PathBuf::from("coinwatch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("coinwatch").join("config.yaml");
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

  /// Get the market API key from environment variables.
  ///
  /// Checks COINWATCH_API_KEY first, then CMC_PRO_API_KEY as fallback.
  pub fn api_key() -> Result<String> {
    std::env::var("COINWATCH_API_KEY")
      .or_else(|_| std::env::var("CMC_PRO_API_KEY"))
      .map_err(|_| {
        eyre!(
          "Market API key not found. Set COINWATCH_API_KEY or CMC_PRO_API_KEY environment variable."
        )
      })
  }

  /// Resolve the database path; directories are created by the store.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("coinwatch").join("coins.db"))
  }

  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_minutes * 60)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_usable() {
    let config = Config::default();
    assert_eq!(config.api.currency, "USD");
    assert_eq!(config.api.listing_limit, 200);
    assert_eq!(config.refresh_minutes, 15);
    assert_eq!(config.refresh_interval(), Duration::from_secs(900));
  }

  #[test]
  fn partial_yaml_overlays_defaults() {
    let config: Config =
      serde_yaml::from_str("api:\n  currency: EUR\nrefresh_minutes: 5\n").unwrap();

    assert_eq!(config.api.currency, "EUR");
    assert_eq!(config.refresh_minutes, 5);
    // Untouched keys keep their defaults.
    assert_eq!(config.api.listing_limit, 200);
    assert_eq!(config.candles.limit, 30);
  }
}
