//! Buy/sell operations against a user's portfolio, priced through the
//! current pivot table for reporting.

use crate::error::RateError;
use crate::portfolio::{normalize_currency_code, validate_positive_amount};
use crate::store::portfolios::PortfolioStore;
use crate::valuation::{PIVOT_CURRENCY, RateService};
use tracing::{info, warn};

/// What a completed trade looked like, including the best-effort valuation
/// of the traded amount in the base currency.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub currency_code: String,
    pub amount: f64,
    pub previous_balance: f64,
    pub new_balance: f64,
    pub rate_to_usd: Option<f64>,
    pub rate_to_base: Option<f64>,
    pub estimated_value_base: Option<f64>,
    pub base_currency: String,
}

pub async fn buy(
    portfolios: &PortfolioStore,
    rates: &RateService,
    user_id: u32,
    currency_code: &str,
    amount: f64,
    base_currency: &str,
) -> Result<TradeOutcome, RateError> {
    let code = normalize_currency_code(currency_code)?;
    let amount = validate_positive_amount(amount)?;

    let mut portfolio = portfolios.load(user_id);
    let wallet = portfolio.wallet_or_insert(&code)?;
    let previous_balance = wallet.balance();
    wallet.deposit(amount)?;
    let new_balance = wallet.balance();
    portfolios.save(&portfolio)?;

    info!(user_id, %code, amount, "BUY completed");
    price_trade(rates, code, amount, previous_balance, new_balance, base_currency).await
}

pub async fn sell(
    portfolios: &PortfolioStore,
    rates: &RateService,
    user_id: u32,
    currency_code: &str,
    amount: f64,
    base_currency: &str,
) -> Result<TradeOutcome, RateError> {
    let code = normalize_currency_code(currency_code)?;
    let amount = validate_positive_amount(amount)?;

    let mut portfolio = portfolios.load(user_id);
    let wallet = portfolio
        .wallet_mut(&code)
        .ok_or_else(|| RateError::UnknownCurrency(code.clone()))?;
    let previous_balance = wallet.balance();
    wallet.withdraw(amount)?;
    let new_balance = wallet.balance();
    portfolios.save(&portfolio)?;

    info!(user_id, %code, amount, "SELL completed");
    price_trade(rates, code, amount, previous_balance, new_balance, base_currency).await
}

/// Valuation of the traded amount is best-effort: the trade itself has
/// already been persisted, so missing rates degrade to empty fields.
async fn price_trade(
    rates: &RateService,
    code: String,
    amount: f64,
    previous_balance: f64,
    new_balance: f64,
    base_currency: &str,
) -> Result<TradeOutcome, RateError> {
    let base = normalize_currency_code(base_currency)?;

    let (rate_to_usd, rate_to_base) = match rates.conversion_table().await {
        Ok(snapshot) => {
            let rate_to_usd = snapshot.table.get(&code).copied();
            let rate_to_base = match rate_to_usd {
                Some(to_usd) if base == PIVOT_CURRENCY => Some(to_usd),
                Some(to_usd) => snapshot
                    .table
                    .get(&base)
                    .copied()
                    .filter(|base_rate| *base_rate != 0.0)
                    .map(|base_rate| to_usd / base_rate),
                None => None,
            };
            (rate_to_usd, rate_to_base)
        }
        Err(e) => {
            warn!("Could not price trade in {base}: {e}");
            (None, None)
        }
    };

    Ok(TradeOutcome {
        currency_code: code,
        amount,
        previous_balance,
        new_balance,
        rate_to_usd,
        rate_to_base,
        estimated_value_base: rate_to_base.map(|rate| amount * rate),
        base_currency: base,
    })
}
