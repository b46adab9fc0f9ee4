//! The merged rate cache and its append-only update history.

use crate::config::AppConfig;
use crate::error::RateError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Serde helper for timestamps that must never take down the whole cache:
/// anything that is not a parseable ISO-8601 string deserializes to `None`.
pub(crate) mod lenient_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
        Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse))
    }

    /// RFC 3339 first; naive timestamps are assumed UTC.
    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// One source's most recent accepted quote for a currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuote {
    pub rate: f64,
    #[serde(default, with = "lenient_time")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: String,
}

/// The persisted rate table. The sole source of truth for conversions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateCache {
    #[serde(default)]
    pub pairs: BTreeMap<String, CachedQuote>,
    #[serde(default, with = "lenient_time")]
    pub last_refresh: Option<DateTime<Utc>>,
}

impl RateCache {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Immutable audit record of one fetched quote, accepted into the cache
/// or not. The `timestamp` is kept as the provider reported it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
    pub timestamp: String,
    pub source: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Reads and writes the rate cache and the update history.
#[derive(Debug, Clone)]
pub struct RateStore {
    rates_path: PathBuf,
    history_path: PathBuf,
}

impl RateStore {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(RateStore {
            rates_path: config.rates_path()?,
            history_path: config.history_path()?,
        })
    }

    pub fn with_paths(rates_path: PathBuf, history_path: PathBuf) -> Self {
        RateStore {
            rates_path,
            history_path,
        }
    }

    pub fn rates_path(&self) -> &std::path::Path {
        &self.rates_path
    }

    /// Never fails: an absent or malformed cache file degrades to the
    /// empty cache.
    pub fn read_rates(&self) -> RateCache {
        if !self.rates_path.exists() {
            debug!("No rate cache at {}", self.rates_path.display());
            return RateCache::default();
        }
        match fs::read_to_string(&self.rates_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cache) => cache,
                Err(e) => {
                    warn!(
                        "Corrupt rate cache at {}: {e}; treating as empty",
                        self.rates_path.display()
                    );
                    RateCache::default()
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read rate cache at {}: {e}; treating as empty",
                    self.rates_path.display()
                );
                RateCache::default()
            }
        }
    }

    pub fn write_rates(&self, cache: &RateCache) -> Result<(), RateError> {
        debug!(
            "Writing {} pairs to {}",
            cache.pairs.len(),
            self.rates_path.display()
        );
        super::atomic_write_json(&self.rates_path, cache)
    }

    /// Read-modify-atomic-write of the history log. Malformed existing
    /// history is treated as empty rather than blocking the append.
    pub fn append_history(&self, records: &[HistoryRecord]) -> Result<(), RateError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut history = self.read_history();
        history.extend(records.iter().cloned());
        super::atomic_write_json(&self.history_path, &history)
    }

    pub fn read_history(&self) -> Vec<HistoryRecord> {
        if !self.history_path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.history_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(
                    "Corrupt history at {}: {e}; treating as empty",
                    self.history_path.display()
                );
                Vec::new()
            }),
            Err(e) => {
                warn!(
                    "Failed to read history at {}: {e}; treating as empty",
                    self.history_path.display()
                );
                Vec::new()
            }
        }
    }
}
