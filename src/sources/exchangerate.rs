//! ExchangeRate-API adapter: fiat rates quoted as units per USD.

use super::{RateSource, RawQuote, USER_AGENT};
use crate::error::RateError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const SOURCE_NAME: &str = "exchangerate";

pub struct ExchangeRateSource {
    base_url: String,
    api_key: Option<String>,
    fiat_currencies: Vec<String>,
    timeout: Duration,
}

impl ExchangeRateSource {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        fiat_currencies: &[String],
        timeout: Duration,
    ) -> Self {
        ExchangeRateSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            fiat_currencies: fiat_currencies
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    result: String,
    #[serde(rename = "error-type", default)]
    error_type: Option<String>,
    #[serde(default)]
    conversion_rates: HashMap<String, f64>,
    #[serde(default)]
    time_last_update_utc: Option<String>,
}

#[async_trait]
impl RateSource for ExchangeRateSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(name = "ExchangeRateFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<HashMap<String, RawQuote>, RateError> {
        let Some(api_key) = &self.api_key else {
            return Err(RateError::source_unavailable(
                SOURCE_NAME,
                "API key not configured",
            ));
        };

        let url = format!("{}/v6/{}/latest/USD", self.base_url, api_key);
        debug!("Requesting fiat rates from ExchangeRate-API");

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| RateError::source_unavailable(SOURCE_NAME, e.to_string()))?;

        let response = client.get(&url).send().await.map_err(|e| {
            RateError::source_unavailable(SOURCE_NAME, format!("request error: {e}"))
        })?;

        if !response.status().is_success() {
            return Err(RateError::source_unavailable(
                SOURCE_NAME,
                format!("HTTP error: {}", response.status()),
            ));
        }

        let payload: LatestResponse = response.json().await.map_err(|e| {
            RateError::source_unavailable(SOURCE_NAME, format!("malformed response: {e}"))
        })?;

        if payload.result != "success" {
            let reason = payload
                .error_type
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(RateError::source_unavailable(
                SOURCE_NAME,
                format!("provider error: {reason}"),
            ));
        }

        let mut rates = HashMap::new();
        for code in &self.fiat_currencies {
            let Some(rate) = payload.conversion_rates.get(code) else {
                debug!("ExchangeRate-API returned no rate for {code}");
                continue;
            };
            if !rate.is_finite() || *rate <= 0.0 {
                warn!("Discarding non-positive ExchangeRate-API rate for {code}: {rate}");
                continue;
            }
            // conversion_rates are units of `code` per USD, so the pair is
            // oriented USD -> code.
            rates.insert(
                format!("USD_{code}"),
                RawQuote {
                    rate: *rate,
                    meta: json!({ "api_timestamp": &payload.time_last_update_utc }),
                },
            );
        }

        if rates.is_empty() {
            return Err(RateError::source_unavailable(
                SOURCE_NAME,
                "returned no usable rates",
            ));
        }
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_for(server: &MockServer) -> ExchangeRateSource {
        ExchangeRateSource::new(
            &server.uri(),
            Some("test-key".to_string()),
            &["EUR".to_string(), "GBP".to_string()],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_successful_fetch_emits_usd_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/test-key/latest/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "result": "success",
                    "time_last_update_utc": "Wed, 15 Jan 2025 00:00:01 +0000",
                    "conversion_rates": {"EUR": 0.92, "GBP": 0.79, "JPY": 157.2}
                }"#,
            ))
            .mount(&server)
            .await;

        let rates = source_for(&server).fetch_rates().await.unwrap();
        // JPY is not in the configured set
        assert_eq!(rates.len(), 2);
        assert_eq!(rates["USD_EUR"].rate, 0.92);
        assert_eq!(rates["USD_GBP"].rate, 0.79);
        assert_eq!(
            rates["USD_EUR"].meta["api_timestamp"],
            "Wed, 15 Jan 2025 00:00:01 +0000"
        );
    }

    #[tokio::test]
    async fn test_provider_error_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/test-key/latest/USD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"result": "error", "error-type": "invalid-key"}"#),
            )
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("invalid-key"));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/test-key/latest/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("malformed response"));
    }

    #[tokio::test]
    async fn test_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/test-key/latest/USD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("HTTP error: 503"));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let source = ExchangeRateSource::new(
            "http://localhost:1",
            None,
            &["EUR".to_string()],
            Duration::from_secs(5),
        );
        let err = source.fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("API key not configured"));
    }

    #[tokio::test]
    async fn test_no_configured_codes_in_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/test-key/latest/USD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"result": "success", "conversion_rates": {"JPY": 157.2}}"#),
            )
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("no usable rates"));
    }
}
