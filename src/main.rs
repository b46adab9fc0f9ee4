use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ratehub::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for ratehub::AppCommand {
    fn from(cmd: Commands) -> ratehub::AppCommand {
        match cmd {
            Commands::Update { source } => ratehub::AppCommand::Update { sources: source },
            Commands::Watch { interval, source } => ratehub::AppCommand::Watch {
                interval,
                sources: source,
            },
            Commands::Rate { from, to } => ratehub::AppCommand::Rate { from, to },
            Commands::Portfolio { base, user } => ratehub::AppCommand::Portfolio { base, user },
            Commands::Buy { code, amount, user } => {
                ratehub::AppCommand::Buy { code, amount, user }
            }
            Commands::Sell { code, amount, user } => {
                ratehub::AppCommand::Sell { code, amount, user }
            }
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch rates from all or selected sources once
    Update {
        /// Restrict the update to the named sources
        #[arg(short, long)]
        source: Vec<String>,
    },
    /// Update rates repeatedly at a fixed interval
    Watch {
        /// Seconds between cycles (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
        /// Restrict updates to the named sources
        #[arg(short, long)]
        source: Vec<String>,
    },
    /// Show the exchange rate between two currencies
    Rate { from: String, to: String },
    /// Value the portfolio in a base currency
    Portfolio {
        /// Reporting currency (defaults to the configured base)
        #[arg(short, long)]
        base: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        user: u32,
    },
    /// Add an amount of a currency to the portfolio
    Buy {
        code: String,
        amount: f64,
        #[arg(short, long, default_value_t = 1)]
        user: u32,
    },
    /// Remove an amount of a currency from the portfolio
    Sell {
        code: String,
        amount: f64,
        #[arg(short, long, default_value_t = 1)]
        user: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => ratehub::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

fn setup() -> anyhow::Result<()> {
    use anyhow::Context;

    let path = ratehub::config::AppConfig::default_config_path()?;

    if path.exists() {
        anyhow::bail!("Configuration file already exists at {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let default_config = r#"---
base_currency: "USD"
fiat_currencies: ["EUR", "GBP", "RUB"]
crypto_currencies: ["BTC", "ETH", "SOL"]
rates_ttl_seconds: 300
update_interval_seconds: 300

providers:
  coingecko:
    base_url: "https://api.coingecko.com"
  exchangerate:
    base_url: "https://v6.exchangerate-api.com"
    # api_key: "..."  # or set RATEHUB_EXCHANGERATE_API_KEY
"#;

    std::fs::write(&path, default_config)
        .with_context(|| format!("Failed to write config file to {}", path.display()))?;

    tracing::info!("Created default configuration at {}", path.display());
    Ok(())
}
