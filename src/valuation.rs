//! Pivot-table construction, currency conversion, staleness handling and
//! portfolio valuation. All cross-currency conversions route through USD.

use crate::aggregator::Aggregator;
use crate::error::RateError;
use crate::portfolio::{Portfolio, normalize_currency_code};
use crate::store::rates::{RateCache, RateStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const PIVOT_CURRENCY: &str = "USD";

/// Ephemeral `code -> rate to USD` mapping, rebuilt on demand from the
/// cache. Always contains `USD -> 1.0`.
pub type ConversionTable = HashMap<String, f64>;

/// Builds the pivot table. Pairs quoted against USD contribute directly;
/// pairs quoted from USD contribute their inverse; anything else is
/// ignored.
pub fn build_pivot_table(cache: &RateCache) -> ConversionTable {
    let mut table = ConversionTable::new();
    table.insert(PIVOT_CURRENCY.to_string(), 1.0);

    for (pair, quote) in &cache.pairs {
        if !quote.rate.is_finite() {
            continue;
        }
        let Some((from, to)) = pair.split_once('_') else {
            continue;
        };
        let from = from.to_uppercase();
        let to = to.to_uppercase();

        if to == PIVOT_CURRENCY {
            table.insert(from, quote.rate);
        } else if from == PIVOT_CURRENCY && quote.rate != 0.0 {
            table.insert(to, 1.0 / quote.rate);
        }
    }
    table
}

/// Converts an amount between two currencies through the USD pivot.
/// `from == to` is the identity and needs no table entry.
pub fn convert(
    amount: f64,
    from: &str,
    to: &str,
    table: &ConversionTable,
) -> Result<f64, RateError> {
    if from == to {
        return Ok(amount);
    }
    let from_rate = table
        .get(from)
        .ok_or_else(|| RateError::UnknownCurrency(from.to_string()))?;
    if to == PIVOT_CURRENCY {
        return Ok(amount * from_rate);
    }
    let to_rate = table
        .get(to)
        .ok_or_else(|| RateError::UnknownCurrency(to.to_string()))?;
    if *to_rate == 0.0 {
        return Err(RateError::InvalidRate(to.to_string()));
    }
    Ok(amount * from_rate / to_rate)
}

/// Whether the cache is within its TTL. A cache that has never been
/// refreshed is always stale.
pub fn is_fresh(cache: &RateCache, ttl_seconds: u64) -> bool {
    match cache.last_refresh {
        Some(last_refresh) => {
            Utc::now() - last_refresh <= Duration::seconds(ttl_seconds as i64)
        }
        None => false,
    }
}

/// An answered rate request, including how degraded the answer is.
#[derive(Debug, Clone)]
pub struct RateQuote {
    pub from_code: String,
    pub to_code: String,
    pub rate: f64,
    pub inverse_rate: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub warning: Option<String>,
}

/// A conversion table together with the freshness of the cache it was
/// built from.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub table: ConversionTable,
    pub last_refresh: Option<DateTime<Utc>>,
    pub stale: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WalletValue {
    pub currency_code: String,
    pub balance: f64,
    pub value_in_base: f64,
}

#[derive(Debug, Clone)]
pub struct PortfolioValuation {
    pub wallets: Vec<WalletValue>,
    pub base_currency: String,
    pub total: f64,
}

/// Values every wallet in the base currency. All-or-nothing: a single
/// missing pivot rate fails the whole valuation.
pub fn value_portfolio(
    portfolio: &Portfolio,
    base_currency: &str,
    table: &ConversionTable,
) -> Result<PortfolioValuation, RateError> {
    let base = normalize_currency_code(base_currency)?;
    if !table.contains_key(&base) {
        return Err(RateError::UnknownCurrency(base));
    }

    let mut wallets = Vec::new();
    let mut total = 0.0;
    for wallet in portfolio.wallets() {
        let value_in_base = convert(wallet.balance(), &wallet.currency_code, &base, table)?;
        total += value_in_base;
        wallets.push(WalletValue {
            currency_code: wallet.currency_code.clone(),
            balance: wallet.balance(),
            value_in_base,
        });
    }

    Ok(PortfolioValuation {
        wallets,
        base_currency: base,
        total,
    })
}

/// Serves rate requests against the cache, refreshing through the
/// aggregator when the cache has gone stale and degrading gracefully when
/// the refresh fails.
pub struct RateService {
    aggregator: Aggregator,
    store: RateStore,
    ttl_seconds: u64,
}

impl RateService {
    pub fn new(aggregator: Aggregator, store: RateStore, ttl_seconds: u64) -> Self {
        RateService {
            aggregator,
            store,
            ttl_seconds,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Builds a conversion table from the cache, refreshing first if the
    /// cache is stale. A failed refresh over a non-empty cache degrades to
    /// the stale table with a warning; over an empty cache it is a hard
    /// error.
    pub async fn conversion_table(&self) -> Result<TableSnapshot, RateError> {
        let mut cache = self.store.read_rates();
        let mut stale = false;
        let mut warning = None;

        if !is_fresh(&cache, self.ttl_seconds) {
            debug!("Rate cache is stale; attempting refresh");
            match self.aggregator.run_update(None).await {
                Ok(summary) => {
                    info!(
                        "Refreshed {} rates before conversion",
                        summary.total_rates
                    );
                    cache = self.store.read_rates();
                }
                Err(e) if cache.is_empty() => {
                    warn!("Refresh failed with no cached data to fall back on: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!("Refresh failed; falling back to stale cache: {e}");
                    stale = true;
                    warning = Some(format!("rates may be out of date: refresh failed ({e})"));
                }
            }
        }

        if cache.is_empty() {
            return Err(RateError::NoRateData);
        }

        Ok(TableSnapshot {
            table: build_pivot_table(&cache),
            last_refresh: cache.last_refresh,
            stale,
            warning,
        })
    }

    /// The externally visible rate lookup. Same-currency requests answer
    /// immediately with rate 1 and no staleness flag.
    pub async fn get_rate(&self, from: &str, to: &str) -> Result<RateQuote, RateError> {
        let from_code = normalize_currency_code(from)?;
        let to_code = normalize_currency_code(to)?;

        if from_code == to_code {
            return Ok(RateQuote {
                from_code,
                to_code,
                rate: 1.0,
                inverse_rate: Some(1.0),
                updated_at: None,
                stale: false,
                warning: None,
            });
        }

        let snapshot = self.conversion_table().await?;
        let rate = convert(1.0, &from_code, &to_code, &snapshot.table)?;
        let inverse_rate = (rate != 0.0).then(|| 1.0 / rate);

        Ok(RateQuote {
            from_code,
            to_code,
            rate,
            inverse_rate,
            updated_at: snapshot.last_refresh,
            stale: snapshot.stale,
            warning: snapshot.warning,
        })
    }
}
