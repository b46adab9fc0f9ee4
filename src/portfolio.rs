//! Per-currency wallets and the portfolio that owns them.

use crate::error::RateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Uppercases and validates a currency code: 2-5 characters, no spaces.
pub fn normalize_currency_code(code: &str) -> Result<String, RateError> {
    let normalized = code.trim().to_uppercase();
    if normalized.len() < 2 || normalized.len() > 5 || normalized.contains(' ') {
        return Err(RateError::BadCurrencyCode(code.to_string()));
    }
    Ok(normalized)
}

/// Validates that an amount is a finite positive number.
pub fn validate_positive_amount(amount: f64) -> Result<f64, RateError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(RateError::InvalidAmount);
    }
    Ok(amount)
}

/// A single-currency balance owned by exactly one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub currency_code: String,
    balance: f64,
}

impl Wallet {
    pub fn new(currency_code: &str) -> Result<Self, RateError> {
        Ok(Wallet {
            currency_code: normalize_currency_code(currency_code)?,
            balance: 0.0,
        })
    }

    pub fn with_balance(currency_code: &str, balance: f64) -> Result<Self, RateError> {
        if !balance.is_finite() || balance < 0.0 {
            return Err(RateError::InvalidAmount);
        }
        let mut wallet = Wallet::new(currency_code)?;
        wallet.balance = balance;
        Ok(wallet)
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn deposit(&mut self, amount: f64) -> Result<(), RateError> {
        let value = validate_positive_amount(amount)?;
        self.balance += value;
        Ok(())
    }

    pub fn withdraw(&mut self, amount: f64) -> Result<(), RateError> {
        let value = validate_positive_amount(amount)?;
        if value > self.balance {
            return Err(RateError::InsufficientFunds {
                available: self.balance,
                required: value,
                code: self.currency_code.clone(),
            });
        }
        self.balance -= value;
        Ok(())
    }
}

/// All wallets of one user, keyed by normalized currency code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: u32,
    #[serde(default)]
    wallets: BTreeMap<String, Wallet>,
}

impl Portfolio {
    pub fn new(user_id: u32) -> Self {
        Portfolio {
            user_id,
            wallets: BTreeMap::new(),
        }
    }

    /// Adds an empty wallet for a currency not yet held.
    pub fn add_currency(&mut self, currency_code: &str) -> Result<&mut Wallet, RateError> {
        let normalized = normalize_currency_code(currency_code)?;
        if self.wallets.contains_key(&normalized) {
            return Err(RateError::BadCurrencyCode(format!(
                "wallet {normalized} already exists"
            )));
        }
        let wallet = Wallet::new(&normalized)?;
        Ok(self.wallets.entry(normalized).or_insert(wallet))
    }

    pub fn get_wallet(&self, currency_code: &str) -> Option<&Wallet> {
        let normalized = normalize_currency_code(currency_code).ok()?;
        self.wallets.get(&normalized)
    }

    pub fn wallet_mut(&mut self, currency_code: &str) -> Option<&mut Wallet> {
        let normalized = normalize_currency_code(currency_code).ok()?;
        self.wallets.get_mut(&normalized)
    }

    /// Wallet for the currency, creating it on first use.
    pub fn wallet_or_insert(&mut self, currency_code: &str) -> Result<&mut Wallet, RateError> {
        let normalized = normalize_currency_code(currency_code)?;
        Ok(self
            .wallets
            .entry(normalized.clone())
            .or_insert_with(|| Wallet {
                currency_code: normalized,
                balance: 0.0,
            }))
    }

    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.values()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_currency_code() {
        assert_eq!(normalize_currency_code(" btc ").unwrap(), "BTC");
        assert_eq!(normalize_currency_code("eur").unwrap(), "EUR");
        assert_eq!(normalize_currency_code("MATIC").unwrap(), "MATIC");
        assert!(normalize_currency_code("B").is_err());
        assert!(normalize_currency_code("TOOLONG").is_err());
        assert!(normalize_currency_code("").is_err());
        assert!(normalize_currency_code("A B").is_err());
    }

    #[test]
    fn test_wallet_deposit_and_withdraw() {
        let mut wallet = Wallet::new("btc").unwrap();
        assert_eq!(wallet.currency_code, "BTC");
        assert_eq!(wallet.balance(), 0.0);

        wallet.deposit(1.5).unwrap();
        assert_eq!(wallet.balance(), 1.5);

        wallet.withdraw(0.5).unwrap();
        assert_eq!(wallet.balance(), 1.0);

        assert!(matches!(
            wallet.deposit(-1.0),
            Err(RateError::InvalidAmount)
        ));
        assert!(matches!(wallet.deposit(0.0), Err(RateError::InvalidAmount)));
    }

    #[test]
    fn test_wallet_insufficient_funds() {
        let mut wallet = Wallet::with_balance("eth", 2.0).unwrap();
        let err = wallet.withdraw(3.0).unwrap_err();
        match err {
            RateError::InsufficientFunds {
                available,
                required,
                code,
            } => {
                assert_eq!(available, 2.0);
                assert_eq!(required, 3.0);
                assert_eq!(code, "ETH");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Balance untouched after a rejected withdrawal
        assert_eq!(wallet.balance(), 2.0);
    }

    #[test]
    fn test_portfolio_wallet_management() {
        let mut portfolio = Portfolio::new(1);
        assert!(portfolio.is_empty());
        assert!(portfolio.get_wallet("BTC").is_none());

        portfolio.add_currency("btc").unwrap();
        assert!(portfolio.get_wallet("BTC").is_some());
        assert!(portfolio.add_currency("BTC").is_err());

        portfolio.wallet_or_insert("eur").unwrap().deposit(100.0).unwrap();
        assert_eq!(portfolio.get_wallet("EUR").unwrap().balance(), 100.0);
        assert_eq!(portfolio.wallets().count(), 2);
    }
}
