pub mod aggregator;
pub mod config;
pub mod error;
pub mod log;
pub mod portfolio;
pub mod report;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod trade;
pub mod ui;
pub mod valuation;

use crate::aggregator::Aggregator;
use crate::config::AppConfig;
use crate::store::portfolios::PortfolioStore;
use crate::store::rates::RateStore;
use crate::valuation::RateService;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

pub enum AppCommand {
    Update {
        sources: Vec<String>,
    },
    Watch {
        interval: Option<u64>,
        sources: Vec<String>,
    },
    Rate {
        from: String,
        to: String,
    },
    Portfolio {
        base: Option<String>,
        user: u32,
    },
    Buy {
        code: String,
        amount: f64,
        user: u32,
    },
    Sell {
        code: String,
        amount: f64,
        user: u32,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("ratehub starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let rate_store = RateStore::from_config(&config)?;
    let aggregator = Aggregator::new(sources::build_sources(&config), rate_store.clone());
    let service = RateService::new(aggregator, rate_store, config.rates_ttl_seconds);
    let portfolios = PortfolioStore::from_config(&config)?;

    match command {
        AppCommand::Update { sources } => {
            let active = (!sources.is_empty()).then_some(sources);
            let summary = service.aggregator().run_update(active.as_deref()).await?;
            println!("{}", report::render_update_summary(&summary));
        }
        AppCommand::Watch { interval, sources } => {
            let interval =
                Duration::from_secs(interval.unwrap_or(config.update_interval_seconds));
            let active = (!sources.is_empty()).then_some(sources);
            scheduler::run(service.aggregator(), interval, active.as_deref()).await?;
        }
        AppCommand::Rate { from, to } => {
            let quote = service.get_rate(&from, &to).await?;
            println!("{}", report::render_rate_quote(&quote));
        }
        AppCommand::Portfolio { base, user } => {
            let base = base.unwrap_or_else(|| config.base_currency.clone());
            let snapshot = service.conversion_table().await?;
            let portfolio = portfolios.load(user);
            let valuation = valuation::value_portfolio(&portfolio, &base, &snapshot.table)?;
            println!("{}", report::render_portfolio(&valuation, user));
            if let Some(warning) = &snapshot.warning {
                println!(
                    "{}",
                    ui::style_text(&format!("warning: {warning}"), ui::StyleType::Warning)
                );
            }
        }
        AppCommand::Buy { code, amount, user } => {
            let outcome = trade::buy(
                &portfolios,
                &service,
                user,
                &code,
                amount,
                &config.base_currency,
            )
            .await?;
            println!("{}", report::render_trade("Bought", &outcome));
        }
        AppCommand::Sell { code, amount, user } => {
            let outcome = trade::sell(
                &portfolios,
                &service,
                user,
                &code,
                amount,
                &config.base_currency,
            )
            .await?;
            println!("{}", report::render_trade("Sold", &outcome));
        }
    }
    Ok(())
}
