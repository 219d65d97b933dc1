use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use portfolio_recon::config::EngineConfig;
use portfolio_recon::models::{PriceQuote, PriceRequest};
use portfolio_recon::normalizer::RawTradeRecord;
use portfolio_recon::oracle::{OracleError, PriceOracle, StaticPriceOracle};
use portfolio_recon::oracle_http::HttpPriceOracle;
use portfolio_recon::report::{self, PortfolioReport};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "portfolio-recon")]
#[command(about = "Rebuilds a trading account's position history and mark-to-market valuations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct InputArgs {
    /// Primary transaction export (JSON array of records)
    #[arg(long = "transactions", value_name = "PATH")]
    transactions: PathBuf,
    /// Optional second export merged with the primary one
    #[arg(long = "secondary", value_name = "PATH")]
    secondary: Option<PathBuf>,
    /// Historical close prices file; when absent, ORACLE_URL is used
    #[arg(long = "prices", value_name = "PATH")]
    prices: Option<PathBuf>,
    /// Override the TARGET_ACCOUNT setting
    #[arg(long)]
    account: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Full report: history, statistics, monthly buckets and series
    Report {
        #[command(flatten)]
        input: InputArgs,
        /// Write the report JSON here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Monthly mark-to-market snapshots only
    History {
        #[command(flatten)]
        input: InputArgs,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Realized trade statistics only (no oracle round-trips)
    Stats {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Report { input, output } => {
            let report = run_pipeline(&input, true).await?;
            emit_json(&report, output.as_deref())?;
        }
        Commands::History { input, output } => {
            let report = run_pipeline(&input, true).await?;
            emit_json(&report.history, output.as_deref())?;
        }
        Commands::Stats { input } => {
            let report = run_pipeline(&input, false).await?;
            emit_json(&report.stats, None)?;
        }
    }

    Ok(())
}

async fn run_pipeline(input: &InputArgs, with_oracle: bool) -> Result<PortfolioReport> {
    let settings: HashMap<String, String> = env::vars().collect();
    let config =
        EngineConfig::from_settings_map_with_account(&settings, input.account.as_deref())?;

    let primary = load_records(&input.transactions)?;
    let secondary = match input.secondary.as_deref() {
        Some(path) => load_records(path)?,
        None => Vec::new(),
    };
    info!(
        "Loaded {} raw record(s) for account {}",
        primary.len() + secondary.len(),
        config.target_account
    );

    let oracle = if with_oracle {
        resolve_oracle(input.prices.as_deref())?
    } else {
        AnyOracle::Unavailable
    };

    let progress = ProgressBar::new(0).with_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .expect("static progress template is valid"),
    );
    let mut on_progress = |done: usize, total: usize, label: &str| {
        progress.set_length(total as u64);
        progress.set_position(done as u64);
        progress.set_message(label.to_string());
    };

    let report = report::build_report(
        &primary,
        &secondary,
        &config,
        &oracle,
        Some(&mut on_progress),
        None,
    )
    .await;
    progress.finish_and_clear();

    Ok(report)
}

fn load_records(path: &Path) -> Result<Vec<RawTradeRecord>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read records from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of records", path.display()))
}

fn emit_json<T: serde::Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("failed to write output to {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Runtime oracle selection: a prices file wins, then ORACLE_URL, otherwise
/// the report degrades to its realized-only fallback.
enum AnyOracle {
    Static(StaticPriceOracle),
    Http(HttpPriceOracle),
    Unavailable,
}

impl PriceOracle for AnyOracle {
    async fn closing_prices(
        &self,
        requests: &[PriceRequest],
    ) -> Result<HashMap<String, PriceQuote>, OracleError> {
        match self {
            AnyOracle::Static(oracle) => oracle.closing_prices(requests).await,
            AnyOracle::Http(oracle) => oracle.closing_prices(requests).await,
            AnyOracle::Unavailable => Err(OracleError::Transport(
                "no price oracle configured (set ORACLE_URL or pass --prices)".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PriceFileEntry {
    symbol: String,
    date: NaiveDate,
    price: f64,
}

fn resolve_oracle(prices: Option<&Path>) -> Result<AnyOracle> {
    if let Some(path) = prices {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read prices from {}", path.display()))?;
        let entries: Vec<PriceFileEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON array of price entries", path.display()))?;
        let mut oracle = StaticPriceOracle::new();
        for entry in &entries {
            oracle.insert(entry.symbol.clone(), entry.date, entry.price);
        }
        if oracle.is_empty() {
            warn!(
                "{} contains no close prices; every month will fall back to exclusions",
                path.display()
            );
        } else {
            info!("Loaded {} close price(s) from {}", oracle.len(), path.display());
        }
        return Ok(AnyOracle::Static(oracle));
    }

    match env::var("ORACLE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let api_key = env::var("ORACLE_API_KEY").ok();
            let oracle = HttpPriceOracle::new(url.trim(), api_key.as_deref())?;
            Ok(AnyOracle::Http(oracle))
        }
        _ => Ok(AnyOracle::Unavailable),
    }
}
