//! Persistence for user portfolios, one record per user id.

use crate::config::AppConfig;
use crate::error::RateError;
use crate::portfolio::Portfolio;
use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PortfolioStore {
    path: PathBuf,
}

impl PortfolioStore {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(PortfolioStore {
            path: config.portfolios_path()?,
        })
    }

    pub fn with_path(path: PathBuf) -> Self {
        PortfolioStore { path }
    }

    /// Loads a user's portfolio; an absent file or unknown user yields an
    /// empty portfolio.
    pub fn load(&self, user_id: u32) -> Portfolio {
        self.read_all()
            .into_iter()
            .find(|p| p.user_id == user_id)
            .unwrap_or_else(|| Portfolio::new(user_id))
    }

    /// Replaces (or inserts) the user's record and writes the file
    /// atomically.
    pub fn save(&self, portfolio: &Portfolio) -> Result<(), RateError> {
        let mut all = self.read_all();
        match all.iter_mut().find(|p| p.user_id == portfolio.user_id) {
            Some(existing) => *existing = portfolio.clone(),
            None => all.push(portfolio.clone()),
        }
        super::atomic_write_json(&self.path, &all)
    }

    fn read_all(&self) -> Vec<Portfolio> {
        if !self.path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(
                    "Corrupt portfolios file at {}: {e}; treating as empty",
                    self.path.display()
                );
                Vec::new()
            }),
            Err(e) => {
                warn!(
                    "Failed to read portfolios at {}: {e}; treating as empty",
                    self.path.display()
                );
                Vec::new()
            }
        }
    }
}
