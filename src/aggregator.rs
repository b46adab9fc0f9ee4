//! Orchestrates fetching from the configured rate sources, merges quotes
//! into the persisted cache by recency and records every fetched quote in
//! the audit history.

use crate::error::RateError;
use crate::sources::{RateSource, normalize_source_name};
use crate::store::rates::{CachedQuote, HistoryRecord, RateStore};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

/// Outcome of one aggregation cycle.
#[derive(Debug, Clone)]
pub struct UpdateSummary {
    /// Every quote fetched from a surviving source, merge winner or not.
    pub total_rates: usize,
    /// One human-readable entry per failed source.
    pub errors: Vec<String>,
    pub last_refresh: DateTime<Utc>,
}

pub struct Aggregator {
    sources: Vec<Box<dyn RateSource>>,
    store: RateStore,
}

/// True when `candidate` must replace `stored`. A quote without a usable
/// timestamp compares as older, so freshness never regresses.
fn is_strictly_newer(
    candidate: Option<DateTime<Utc>>,
    stored: Option<DateTime<Utc>>,
) -> bool {
    match (candidate, stored) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(new), Some(old)) => new > old,
    }
}

impl Aggregator {
    pub fn new(sources: Vec<Box<dyn RateSource>>, store: RateStore) -> Self {
        Aggregator { sources, store }
    }

    pub fn store(&self) -> &RateStore {
        &self.store
    }

    /// Runs one fetch-merge-persist cycle.
    ///
    /// `active` restricts the cycle to the named sources (unknown names are
    /// silently skipped). Per-source failures are collected into the
    /// summary; only when every selected source fails does the cycle return
    /// `AggregationFailed`, and in that case the persisted cache is left
    /// untouched.
    #[instrument(name = "RatesUpdate", skip_all)]
    pub async fn run_update(
        &self,
        active: Option<&[String]>,
    ) -> Result<UpdateSummary, RateError> {
        let selected: Option<HashSet<String>> = active.map(|names| {
            names
                .iter()
                .map(|name| normalize_source_name(name))
                .collect()
        });

        let mut candidates: BTreeMap<String, CachedQuote> = BTreeMap::new();
        let mut history: Vec<HistoryRecord> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut total_rates = 0usize;

        info!("Starting rates update");
        for source in &self.sources {
            let source_name = normalize_source_name(source.name());
            if let Some(selected) = &selected {
                if !selected.contains(&source_name) {
                    info!("Skipping source {source_name} (not selected)");
                    continue;
                }
            }

            info!("Fetching from {source_name}");
            let rates = match source.fetch_rates().await {
                Ok(rates) => rates,
                Err(e) => {
                    let message = format!("Failed to fetch from {source_name}: {e}");
                    error!("{message}");
                    errors.push(message);
                    continue;
                }
            };

            let stamp = Utc::now();
            total_rates += rates.len();
            info!("{source_name}: OK ({} rates)", rates.len());

            for (pair, quote) in rates {
                history.push(HistoryRecord {
                    id: format!("{pair}_{}", stamp.to_rfc3339()),
                    from_currency: pair
                        .split_once('_')
                        .map(|(from, _)| from.to_string())
                        .unwrap_or_else(|| pair.clone()),
                    to_currency: pair
                        .split_once('_')
                        .map(|(_, to)| to.to_string())
                        .unwrap_or_default(),
                    rate: quote.rate,
                    timestamp: quote
                        .meta
                        .get("api_timestamp")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| stamp.to_rfc3339()),
                    source: source_name.clone(),
                    meta: quote.meta,
                });

                let candidate = CachedQuote {
                    rate: quote.rate,
                    updated_at: Some(stamp),
                    source: source_name.clone(),
                };
                // Within one cycle the later-processed source wins ties;
                // an earlier candidate survives only if strictly newer.
                let keep_previous = candidates
                    .get(&pair)
                    .is_some_and(|prev| is_strictly_newer(prev.updated_at, candidate.updated_at));
                if !keep_previous {
                    candidates.insert(pair, candidate);
                }
            }
        }

        if candidates.is_empty() {
            warn!("No source returned data; leaving cache unmodified");
            return Err(RateError::AggregationFailed);
        }

        let mut cache = self.store.read_rates();
        for (pair, candidate) in candidates {
            let accepted = match cache.pairs.get(&pair) {
                Some(stored) => is_strictly_newer(candidate.updated_at, stored.updated_at),
                None => true,
            };
            if accepted {
                cache.pairs.insert(pair, candidate);
            }
        }

        let last_refresh = Utc::now();
        cache.last_refresh = Some(last_refresh);
        info!(
            "Writing {} pairs to {}",
            cache.pairs.len(),
            self.store.rates_path().display()
        );
        self.store.write_rates(&cache)?;
        self.store.append_history(&history)?;

        info!("Update finished: {total_rates} rates");
        if !errors.is_empty() {
            warn!("Completed with errors: {}", errors.join(" | "));
        }
        Ok(UpdateSummary {
            total_rates,
            errors,
            last_refresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RawQuote;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct StaticSource {
        name: &'static str,
        pairs: Vec<(&'static str, f64)>,
        fail_with: Option<&'static str>,
    }

    impl StaticSource {
        fn ok(name: &'static str, pairs: Vec<(&'static str, f64)>) -> Self {
            StaticSource {
                name,
                pairs,
                fail_with: None,
            }
        }

        fn failing(name: &'static str, reason: &'static str) -> Self {
            StaticSource {
                name,
                pairs: Vec::new(),
                fail_with: Some(reason),
            }
        }
    }

    #[async_trait]
    impl RateSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_rates(&self) -> Result<HashMap<String, RawQuote>, RateError> {
            if let Some(reason) = self.fail_with {
                return Err(RateError::source_unavailable(self.name, reason));
            }
            Ok(self
                .pairs
                .iter()
                .map(|(pair, rate)| {
                    (
                        pair.to_string(),
                        RawQuote {
                            rate: *rate,
                            meta: serde_json::Value::Null,
                        },
                    )
                })
                .collect())
        }
    }

    fn store_in(dir: &std::path::Path) -> RateStore {
        RateStore::with_paths(dir.join("rates.json"), dir.join("history.json"))
    }

    #[tokio::test]
    async fn test_successful_update_persists_pairs() {
        let dir = tempdir().unwrap();
        let aggregator = Aggregator::new(
            vec![Box::new(StaticSource::ok(
                "coingecko",
                vec![("BTC_USD", 60000.0), ("ETH_USD", 3000.0)],
            ))],
            store_in(dir.path()),
        );

        let summary = aggregator.run_update(None).await.unwrap();
        assert_eq!(summary.total_rates, 2);
        assert!(summary.errors.is_empty());

        let cache = aggregator.store().read_rates();
        assert_eq!(cache.pairs.len(), 2);
        assert_eq!(cache.pairs["BTC_USD"].rate, 60000.0);
        assert_eq!(cache.pairs["BTC_USD"].source, "coingecko");
        assert!(cache.pairs["BTC_USD"].updated_at.is_some());
        assert_eq!(cache.last_refresh, Some(summary.last_refresh));
    }

    #[tokio::test]
    async fn test_partial_failure_tolerated() {
        let dir = tempdir().unwrap();
        let aggregator = Aggregator::new(
            vec![
                Box::new(StaticSource::failing("coingecko", "connection refused")),
                Box::new(StaticSource::ok("exchangerate", vec![("USD_EUR", 0.92)])),
            ],
            store_in(dir.path()),
        );

        let summary = aggregator.run_update(None).await.unwrap();
        assert_eq!(summary.total_rates, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("coingecko"));
        assert!(summary.errors[0].contains("connection refused"));

        let cache = aggregator.store().read_rates();
        assert_eq!(cache.pairs.len(), 1);
        assert!(cache.pairs.contains_key("USD_EUR"));
    }

    #[tokio::test]
    async fn test_total_failure_preserves_cache_bytes() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        // Seed a cache so there is something to preserve.
        let seeding = Aggregator::new(
            vec![Box::new(StaticSource::ok("coingecko", vec![("BTC_USD", 60000.0)]))],
            store.clone(),
        );
        seeding.run_update(None).await.unwrap();
        let before = std::fs::read(store.rates_path()).unwrap();

        let aggregator = Aggregator::new(
            vec![
                Box::new(StaticSource::failing("coingecko", "down")),
                Box::new(StaticSource::failing("exchangerate", "down")),
            ],
            store.clone(),
        );
        let err = aggregator.run_update(None).await.unwrap_err();
        assert!(matches!(err, RateError::AggregationFailed));

        let after = std::fs::read(store.rates_path()).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_merge_never_regresses_freshness() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        // Stored quote dated far in the future must survive the merge.
        let future = Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap();
        let mut cache = crate::store::rates::RateCache::default();
        cache.pairs.insert(
            "BTC_USD".to_string(),
            CachedQuote {
                rate: 99999.0,
                updated_at: Some(future),
                source: "coingecko".to_string(),
            },
        );
        store.write_rates(&cache).unwrap();

        let aggregator = Aggregator::new(
            vec![Box::new(StaticSource::ok("coingecko", vec![("BTC_USD", 1.0)]))],
            store.clone(),
        );
        aggregator.run_update(None).await.unwrap();

        let merged = store.read_rates();
        assert_eq!(merged.pairs["BTC_USD"].rate, 99999.0);
        assert_eq!(merged.pairs["BTC_USD"].updated_at, Some(future));
        // last_refresh still advances on a successful cycle
        assert!(merged.last_refresh.is_some());
    }

    #[tokio::test]
    async fn test_stored_quote_without_timestamp_is_replaced() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let mut cache = crate::store::rates::RateCache::default();
        cache.pairs.insert(
            "BTC_USD".to_string(),
            CachedQuote {
                rate: 5.0,
                updated_at: None,
                source: "legacy".to_string(),
            },
        );
        store.write_rates(&cache).unwrap();

        let aggregator = Aggregator::new(
            vec![Box::new(StaticSource::ok("coingecko", vec![("BTC_USD", 60000.0)]))],
            store.clone(),
        );
        aggregator.run_update(None).await.unwrap();

        let merged = store.read_rates();
        assert_eq!(merged.pairs["BTC_USD"].rate, 60000.0);
        assert_eq!(merged.pairs["BTC_USD"].source, "coingecko");
    }

    #[tokio::test]
    async fn test_later_source_wins_same_pair_in_one_cycle() {
        let dir = tempdir().unwrap();
        let aggregator = Aggregator::new(
            vec![
                Box::new(StaticSource::ok("coingecko", vec![("BTC_USD", 60000.0)])),
                Box::new(StaticSource::ok("backup", vec![("BTC_USD", 61000.0)])),
            ],
            store_in(dir.path()),
        );

        let summary = aggregator.run_update(None).await.unwrap();
        // Both fetches are counted even though only one wins the merge.
        assert_eq!(summary.total_rates, 2);

        let cache = aggregator.store().read_rates();
        assert_eq!(cache.pairs["BTC_USD"].rate, 61000.0);
        assert_eq!(cache.pairs["BTC_USD"].source, "backup");
    }

    #[tokio::test]
    async fn test_source_filter_and_unknown_names() {
        let dir = tempdir().unwrap();
        let aggregator = Aggregator::new(
            vec![
                Box::new(StaticSource::ok("coingecko", vec![("BTC_USD", 60000.0)])),
                Box::new(StaticSource::ok("exchangerate", vec![("USD_EUR", 0.92)])),
            ],
            store_in(dir.path()),
        );

        // Alias resolves to the fiat source; "nonsense" is skipped silently.
        let active = vec!["ExchangeRate-API".to_string(), "nonsense".to_string()];
        let summary = aggregator.run_update(Some(&active)).await.unwrap();
        assert_eq!(summary.total_rates, 1);
        assert!(summary.errors.is_empty());

        let cache = aggregator.store().read_rates();
        assert_eq!(cache.pairs.len(), 1);
        assert!(cache.pairs.contains_key("USD_EUR"));
    }

    #[tokio::test]
    async fn test_filter_matching_nothing_fails_without_writing() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let aggregator = Aggregator::new(
            vec![Box::new(StaticSource::ok("coingecko", vec![("BTC_USD", 1.0)]))],
            store.clone(),
        );

        let active = vec!["unknown".to_string()];
        let err = aggregator.run_update(Some(&active)).await.unwrap_err();
        assert!(matches!(err, RateError::AggregationFailed));
        assert!(!store.rates_path().exists());
    }

    #[tokio::test]
    async fn test_history_logs_every_fetched_quote() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let aggregator = Aggregator::new(
            vec![
                Box::new(StaticSource::ok("coingecko", vec![("BTC_USD", 60000.0)])),
                Box::new(StaticSource::ok("backup", vec![("BTC_USD", 61000.0)])),
            ],
            store.clone(),
        );

        aggregator.run_update(None).await.unwrap();

        // Both quotes appear in history even though the cache holds one.
        let history = store.read_history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.from_currency == "BTC"));
        assert!(history.iter().all(|r| r.to_currency == "USD"));
        let sources: Vec<&str> = history.iter().map(|r| r.source.as_str()).collect();
        assert!(sources.contains(&"coingecko"));
        assert!(sources.contains(&"backup"));
    }

    #[test]
    fn test_is_strictly_newer_timestamp_rules() {
        let earlier = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        assert!(is_strictly_newer(Some(later), Some(earlier)));
        assert!(!is_strictly_newer(Some(earlier), Some(later)));
        // Equal timestamps never replace
        assert!(!is_strictly_newer(Some(later), Some(later)));
        // Missing timestamps compare as older
        assert!(!is_strictly_newer(None, Some(earlier)));
        assert!(!is_strictly_newer(None, None));
        assert!(is_strictly_newer(Some(earlier), None));
    }
}
