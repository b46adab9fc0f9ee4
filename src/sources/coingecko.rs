//! CoinGecko adapter: crypto spot prices quoted in USD.

use super::{RateSource, RawQuote, USER_AGENT};
use crate::error::RateError;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const SOURCE_NAME: &str = "coingecko";

pub struct CoinGeckoSource {
    base_url: String,
    /// (currency code, CoinGecko asset id) for every configured asset.
    assets: Vec<(String, String)>,
    timeout: Duration,
}

impl CoinGeckoSource {
    pub fn new(
        base_url: &str,
        crypto_currencies: &[String],
        id_map: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        let assets = crypto_currencies
            .iter()
            .filter_map(|code| {
                let code = code.trim().to_uppercase();
                match id_map.get(&code) {
                    Some(id) => Some((code, id.clone())),
                    None => {
                        warn!("No CoinGecko id configured for {code}; skipping");
                        None
                    }
                }
            })
            .collect();
        CoinGeckoSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            assets,
            timeout,
        }
    }
}

#[async_trait]
impl RateSource for CoinGeckoSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "CoinGeckoFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<HashMap<String, RawQuote>, RateError> {
        if self.assets.is_empty() {
            return Err(RateError::source_unavailable(
                SOURCE_NAME,
                "no crypto assets configured",
            ));
        }

        let ids = self
            .assets
            .iter()
            .map(|(_, id)| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/api/v3/simple/price", self.base_url);
        debug!("Requesting crypto prices from {url}");

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| RateError::source_unavailable(SOURCE_NAME, e.to_string()))?;

        let response = client
            .get(&url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(|e| {
                RateError::source_unavailable(SOURCE_NAME, format!("request error: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(RateError::source_unavailable(
                SOURCE_NAME,
                format!("HTTP error: {}", response.status()),
            ));
        }

        let data: HashMap<String, HashMap<String, f64>> = response.json().await.map_err(|e| {
            RateError::source_unavailable(SOURCE_NAME, format!("malformed response: {e}"))
        })?;

        let mut rates = HashMap::new();
        for (code, id) in &self.assets {
            let Some(price) = data.get(id).and_then(|entry| entry.get("usd")) else {
                debug!("CoinGecko returned no USD price for {id}");
                continue;
            };
            if !price.is_finite() || *price <= 0.0 {
                warn!("Discarding non-positive CoinGecko price for {code}: {price}");
                continue;
            }
            rates.insert(
                format!("{code}_USD"),
                RawQuote {
                    rate: *price,
                    meta: json!({ "coingecko_id": id }),
                },
            );
        }

        if rates.is_empty() {
            return Err(RateError::source_unavailable(
                SOURCE_NAME,
                "returned no usable prices",
            ));
        }
        Ok(rates)
    }
}
