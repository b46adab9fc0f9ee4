//! Terminal rendering for rate quotes, portfolio valuations, trades and
//! update summaries.

use crate::aggregator::UpdateSummary;
use crate::trade::TradeOutcome;
use crate::ui;
use crate::valuation::{PortfolioValuation, RateQuote};
use comfy_table::Cell;

pub fn render_rate_quote(quote: &RateQuote) -> String {
    let mut output = format!(
        "1 {} = {:.6} {}",
        quote.from_code, quote.rate, quote.to_code
    );
    if let Some(inverse) = quote.inverse_rate {
        output.push_str(&format!(
            "\n1 {} = {:.6} {}",
            quote.to_code, inverse, quote.from_code
        ));
    }
    if let Some(updated_at) = quote.updated_at {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!("as of {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC")),
                ui::StyleType::Subtle
            )
        ));
    }
    if quote.stale {
        let warning = quote
            .warning
            .as_deref()
            .unwrap_or("rates may be out of date");
        output.push_str(&format!(
            "\n{}",
            ui::style_text(&format!("warning: {warning}"), ui::StyleType::Warning)
        ));
    }
    output
}

pub fn render_portfolio(valuation: &PortfolioValuation, user_id: u32) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Currency"),
        ui::header_cell("Balance"),
        ui::header_cell(&format!("Value ({})", valuation.base_currency)),
    ]);

    for wallet in &valuation.wallets {
        table.add_row(vec![
            Cell::new(&wallet.currency_code),
            ui::amount_cell(format!("{:.4}", wallet.balance)),
            ui::amount_cell(format!("{:.2}", wallet.value_in_base)),
        ]);
    }

    let mut output = format!(
        "Portfolio: {}\n\n",
        ui::style_text(&format!("user {user_id}"), ui::StyleType::Title)
    );
    output.push_str(&table.to_string());
    output.push_str(&format!(
        "\n\nTotal ({}): {}",
        ui::style_text(&valuation.base_currency, ui::StyleType::TotalLabel),
        ui::style_text(&format!("{:.2}", valuation.total), ui::StyleType::TotalValue)
    ));
    output
}

pub fn render_trade(action: &str, outcome: &TradeOutcome) -> String {
    let mut output = format!(
        "{action} {:.4} {}: balance {:.4} -> {:.4}",
        outcome.amount, outcome.currency_code, outcome.previous_balance, outcome.new_balance
    );
    if let Some(estimated) = outcome.estimated_value_base {
        output.push_str(&format!(
            " (≈ {:.2} {})",
            estimated, outcome.base_currency
        ));
    }
    if let Some(rate) = outcome.rate_to_base {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!(
                    "rate: 1 {} = {:.6} {}",
                    outcome.currency_code, rate, outcome.base_currency
                ),
                ui::StyleType::Subtle
            )
        ));
    }
    output
}

pub fn render_update_summary(summary: &UpdateSummary) -> String {
    let mut output = format!(
        "Updated {} rates (last refresh {})",
        summary.total_rates,
        summary.last_refresh.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for error in &summary.errors {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(error, ui::StyleType::Warning)
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::WalletValue;
    use chrono::Utc;

    #[test]
    fn test_render_rate_quote_with_warning() {
        let quote = RateQuote {
            from_code: "BTC".to_string(),
            to_code: "USD".to_string(),
            rate: 60000.0,
            inverse_rate: Some(1.0 / 60000.0),
            updated_at: Some(Utc::now()),
            stale: true,
            warning: Some("refresh failed".to_string()),
        };
        let rendered = render_rate_quote(&quote);
        assert!(rendered.contains("1 BTC = 60000.000000 USD"));
        assert!(rendered.contains("refresh failed"));
    }

    #[test]
    fn test_render_portfolio_lists_wallets_and_total() {
        let valuation = PortfolioValuation {
            wallets: vec![
                WalletValue {
                    currency_code: "BTC".to_string(),
                    balance: 0.5,
                    value_in_base: 30000.0,
                },
                WalletValue {
                    currency_code: "USD".to_string(),
                    balance: 100.0,
                    value_in_base: 100.0,
                },
            ],
            base_currency: "USD".to_string(),
            total: 30100.0,
        };
        let rendered = render_portfolio(&valuation, 1);
        assert!(rendered.contains("BTC"));
        assert!(rendered.contains("0.5000"));
        assert!(rendered.contains("30100.00"));
    }
}
