//! Rate source adapters. Each adapter fetches quotes from one external
//! provider and normalizes them into `"FROM_TO" -> RawQuote`.

pub mod coingecko;
pub mod exchangerate;

use crate::config::AppConfig;
use crate::error::RateError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

pub const USER_AGENT: &str = concat!("ratehub/", env!("CARGO_PKG_VERSION"));

/// A provider quote before it is stamped and merged: the rate plus
/// provider-specific metadata carried into the audit history.
#[derive(Debug, Clone)]
pub struct RawQuote {
    pub rate: f64,
    pub meta: serde_json::Value,
}

/// One external quote provider. A single fetch attempt per cycle; retry
/// policy belongs to the caller.
#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a non-empty pair map on success, `SourceUnavailable` when
    /// the network call fails, the response cannot be parsed, or no usable
    /// pairs remain after filtering to the configured currency set.
    async fn fetch_rates(&self) -> Result<HashMap<String, RawQuote>, RateError>;
}

/// Canonical source name: lowercased, with known aliases folded.
pub fn normalize_source_name(name: &str) -> String {
    let normalized = name.trim().to_lowercase();
    match normalized.as_str() {
        "exchangerate-api" => "exchangerate".to_string(),
        _ => normalized,
    }
}

/// Builds the configured source set. Sources are constructed in a fixed
/// order; the merge step resolves conflicts by recency, not by this order.
pub fn build_sources(config: &AppConfig) -> Vec<Box<dyn RateSource>> {
    let timeout = Duration::from_secs(config.request_timeout_seconds);
    let mut sources: Vec<Box<dyn RateSource>> = Vec::new();

    let gecko_cfg = config.providers.coingecko.clone().unwrap_or_default();
    sources.push(Box::new(coingecko::CoinGeckoSource::new(
        &gecko_cfg.base_url,
        &config.crypto_currencies,
        &gecko_cfg.id_map,
        timeout,
    )));

    let xr_cfg = config.providers.exchangerate.clone().unwrap_or_default();
    let api_key = config.exchangerate_api_key();
    if api_key.is_none() {
        warn!("No ExchangeRate-API key configured; fiat source will report as unavailable");
    }
    sources.push(Box::new(exchangerate::ExchangeRateSource::new(
        &xr_cfg.base_url,
        api_key,
        &config.fiat_currencies,
        timeout,
    )));

    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_source_name() {
        assert_eq!(normalize_source_name("CoinGecko"), "coingecko");
        assert_eq!(normalize_source_name("exchangerate-api"), "exchangerate");
        assert_eq!(normalize_source_name(" ExchangeRate "), "exchangerate");
    }

    #[test]
    fn test_build_sources_from_default_config() {
        let config = AppConfig::default();
        let sources = build_sources(&config);
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["coingecko", "exchangerate"]);
    }
}
