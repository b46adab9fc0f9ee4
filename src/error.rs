use std::fmt;

/// Errors produced by the rate aggregation and valuation core.
///
/// `Display` and `std::error::Error` are implemented by hand because the
/// `SourceUnavailable` variant carries a provider name in a field named
/// `source`, which `thiserror`'s derive would otherwise treat as the error
/// chain source.
#[derive(Debug)]
pub enum RateError {
    /// One provider's fetch failed. Recoverable: other sources still run.
    SourceUnavailable { source: String, reason: String },

    /// Every selected source failed in a cycle. The persisted cache is left
    /// unmodified.
    AggregationFailed,

    UnknownCurrency(String),

    InvalidRate(String),

    BadCurrencyCode(String),

    InvalidAmount,

    InsufficientFunds {
        available: f64,
        required: f64,
        code: String,
    },

    NoRateData,

    Io(std::io::Error),

    Serde(serde_json::Error),
}

impl fmt::Display for RateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateError::SourceUnavailable { source, reason } => {
                write!(f, "source '{source}' unavailable: {reason}")
            }
            RateError::AggregationFailed => {
                write!(f, "no rate source returned data this cycle")
            }
            RateError::UnknownCurrency(code) => {
                write!(f, "no rate available for currency '{code}'")
            }
            RateError::InvalidRate(code) => {
                write!(f, "invalid rate for currency '{code}'")
            }
            RateError::BadCurrencyCode(code) => {
                write!(f, "currency code '{code}' must be 2-5 characters without spaces")
            }
            RateError::InvalidAmount => {
                write!(f, "amount must be a positive number")
            }
            RateError::InsufficientFunds {
                available,
                required,
                code,
            } => {
                write!(
                    f,
                    "insufficient funds: available {available:.4} {code}, required {required:.4} {code}"
                )
            }
            RateError::NoRateData => {
                write!(f, "rate cache is empty; run an update first")
            }
            RateError::Io(e) => fmt::Display::fmt(e, f),
            RateError::Serde(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for RateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RateError::Io(e) => e.source(),
            RateError::Serde(e) => e.source(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RateError {
    fn from(e: std::io::Error) -> Self {
        RateError::Io(e)
    }
}

impl From<serde_json::Error> for RateError {
    fn from(e: serde_json::Error) -> Self {
        RateError::Serde(e)
    }
}

impl RateError {
    pub fn source_unavailable(source: impl Into<String>, reason: impl Into<String>) -> Self {
        RateError::SourceUnavailable {
            source: source.into(),
            reason: reason.into(),
        }
    }
}
