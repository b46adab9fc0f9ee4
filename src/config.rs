use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const ENV_EXCHANGERATE_API_KEY: &str = "RATEHUB_EXCHANGERATE_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoinGeckoConfig {
    #[serde(default = "default_coingecko_url")]
    pub base_url: String,
    /// Currency code to CoinGecko asset id.
    #[serde(default = "default_crypto_ids")]
    pub id_map: BTreeMap<String, String>,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        CoinGeckoConfig {
            base_url: default_coingecko_url(),
            id_map: default_crypto_ids(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExchangeRateConfig {
    #[serde(default = "default_exchangerate_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        ExchangeRateConfig {
            base_url: default_exchangerate_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub coingecko: Option<CoinGeckoConfig>,
    #[serde(default)]
    pub exchangerate: Option<ExchangeRateConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Reporting currency used when none is requested explicitly.
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    /// Fiat codes requested from the fiat-rate provider.
    #[serde(default = "default_fiat_currencies")]
    pub fiat_currencies: Vec<String>,
    /// Crypto codes requested from the crypto-price provider.
    #[serde(default = "default_crypto_currencies")]
    pub crypto_currencies: Vec<String>,
    /// Maximum age of the rate cache before conversions trigger a refresh.
    #[serde(default = "default_rates_ttl")]
    pub rates_ttl_seconds: u64,
    /// Delay between scheduler cycles.
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Overrides the platform data directory for rates/history/portfolios.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            base_currency: default_base_currency(),
            fiat_currencies: default_fiat_currencies(),
            crypto_currencies: default_crypto_currencies(),
            rates_ttl_seconds: default_rates_ttl(),
            update_interval_seconds: default_update_interval(),
            request_timeout_seconds: default_request_timeout(),
            data_dir: None,
            providers: ProvidersConfig::default(),
        }
    }
}

fn default_coingecko_url() -> String {
    "https://api.coingecko.com".to_string()
}

fn default_exchangerate_url() -> String {
    "https://v6.exchangerate-api.com".to_string()
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_fiat_currencies() -> Vec<String> {
    vec!["EUR".to_string(), "GBP".to_string(), "RUB".to_string()]
}

fn default_crypto_currencies() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()]
}

fn default_crypto_ids() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("BTC".to_string(), "bitcoin".to_string()),
        ("ETH".to_string(), "ethereum".to_string()),
        ("SOL".to_string(), "solana".to_string()),
    ])
}

fn default_rates_ttl() -> u64 {
    300
}

fn default_update_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Loads configuration from the default path, falling back to built-in
    /// defaults when no config file exists.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(AppConfig::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "ratehub", "ratehub")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Directory holding rates.json, history.json and portfolios.json.
    pub fn data_path(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let proj_dirs = ProjectDirs::from("dev", "ratehub", "ratehub")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn rates_path(&self) -> Result<PathBuf> {
        Ok(self.data_path()?.join("rates.json"))
    }

    pub fn history_path(&self) -> Result<PathBuf> {
        Ok(self.data_path()?.join("history.json"))
    }

    pub fn portfolios_path(&self) -> Result<PathBuf> {
        Ok(self.data_path()?.join("portfolios.json"))
    }

    /// The ExchangeRate-API key, from the config file or the
    /// RATEHUB_EXCHANGERATE_API_KEY environment variable.
    pub fn exchangerate_api_key(&self) -> Option<String> {
        if let Some(cfg) = &self.providers.exchangerate {
            if let Some(key) = &cfg.api_key {
                if !key.trim().is_empty() {
                    return Some(key.trim().to_string());
                }
            }
        }
        std::env::var(ENV_EXCHANGERATE_API_KEY)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
base_currency: "EUR"
fiat_currencies: ["EUR", "GBP"]
crypto_currencies: ["BTC"]
rates_ttl_seconds: 60
providers:
  coingecko:
    base_url: "http://example.com/gecko"
  exchangerate:
    base_url: "http://example.com/xr"
    api_key: "secret"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.base_currency, "EUR");
        assert_eq!(config.fiat_currencies, vec!["EUR", "GBP"]);
        assert_eq!(config.crypto_currencies, vec!["BTC"]);
        assert_eq!(config.rates_ttl_seconds, 60);
        // Unset fields keep their defaults
        assert_eq!(config.update_interval_seconds, 300);
        assert_eq!(config.request_timeout_seconds, 10);

        let gecko = config.providers.coingecko.unwrap();
        assert_eq!(gecko.base_url, "http://example.com/gecko");
        assert_eq!(gecko.id_map.get("BTC").map(String::as_str), Some("bitcoin"));

        let xr = config.providers.exchangerate.unwrap();
        assert_eq!(xr.base_url, "http://example.com/xr");
        assert_eq!(xr.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_config_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").expect("Failed to deserialize");
        assert_eq!(config.base_currency, "USD");
        assert_eq!(config.fiat_currencies, vec!["EUR", "GBP", "RUB"]);
        assert_eq!(config.crypto_currencies, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(config.rates_ttl_seconds, 300);
        assert!(config.data_dir.is_none());
        assert!(config.providers.coingecko.is_none());
    }

    #[test]
    fn test_api_key_from_config() {
        let config = AppConfig {
            providers: ProvidersConfig {
                exchangerate: Some(ExchangeRateConfig {
                    api_key: Some(" key123 ".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.exchangerate_api_key().as_deref(), Some("key123"));
    }
}
