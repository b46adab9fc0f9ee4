//! Interval-driven update loop. Cycles never overlap: the next cycle
//! starts only after the previous `run_update` returns, and Ctrl-C is
//! observed only during the inter-cycle sleep so an in-flight update
//! always completes.

use crate::aggregator::Aggregator;
use anyhow::Result;
use console::style;
use std::time::{Duration, Instant};
use tracing::{error, info};

pub async fn run(
    aggregator: &Aggregator,
    interval: Duration,
    active_sources: Option<&[String]>,
) -> Result<()> {
    info!(
        "Scheduler started: interval={}s, sources={}",
        interval.as_secs(),
        active_sources
            .map(|s| s.join(","))
            .unwrap_or_else(|| "all".to_string())
    );

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    loop {
        let started = Instant::now();
        match aggregator.run_update(active_sources).await {
            Ok(summary) => {
                info!(
                    total_rates = summary.total_rates,
                    errors = summary.errors.len(),
                    last_refresh = %summary.last_refresh,
                    "Update OK"
                );
                let line = format!(
                    "[watch] OK: {} rates at {}{}",
                    summary.total_rates,
                    summary.last_refresh.format("%Y-%m-%d %H:%M:%S UTC"),
                    if summary.errors.is_empty() {
                        String::new()
                    } else {
                        format!(" ({} source(s) failed)", summary.errors.len())
                    }
                );
                println!("{line}");
                for err in &summary.errors {
                    println!("  {}", style(err).yellow());
                }
            }
            Err(e) => {
                error!("Update failed: {e}");
                println!("[watch] {}", style(format!("failed: {e}")).red());
            }
        }

        let sleep_for = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = &mut shutdown => {
                info!("Scheduler stopped by interrupt");
                println!("Scheduler stopped.");
                return Ok(());
            }
        }
    }
}
