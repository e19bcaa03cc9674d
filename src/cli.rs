//! Command-line interface definitions and command runners.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::dashboard::{self, DashboardState};
use crate::engine::ranking::RankingService;
use crate::engine::service::PredictionService;
use crate::types::Market;

/// AUGUR - multi-model stock price forecasting.
#[derive(Parser, Debug)]
#[command(name = "augur")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Predict one symbol and print the report as JSON
    Predict(PredictArgs),

    /// Show market-data source health
    Sources,

    /// Rank the watch-list by trading value
    Rankings,

    /// Run the HTTP API
    Serve(ServeArgs),
}

/// Arguments for the `predict` subcommand.
#[derive(Parser, Debug)]
pub struct PredictArgs {
    /// Ticker or exchange code, e.g. AAPL or 005930
    pub symbol: String,

    /// Listing market (KRX, KOSPI, KOSDAQ, NASDAQ, NYSE, AMEX)
    #[arg(short, long)]
    pub market: Market,
}

/// Arguments for the `serve` subcommand.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Override the configured port
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Dispatch a parsed command.
pub async fn run(cli: Cli, cfg: AppConfig) -> Result<()> {
    let service = PredictionService::from_config(&cfg)?;
    let rankings = RankingService::from_config(service.resolver(), &cfg.rankings);

    match cli.command {
        Commands::Predict(args) => {
            let report = service
                .predict(&args.symbol, args.market)
                .await
                .with_context(|| format!("Prediction failed for {} ({})", args.symbol, args.market))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Sources => {
            println!("{}", serde_json::to_string_pretty(&service.source_status())?);
        }
        Commands::Rankings => {
            let board = rankings.rankings(true).await;
            println!("{}", serde_json::to_string_pretty(&board)?);
        }
        Commands::Serve(args) => {
            let port = args.port.unwrap_or(cfg.dashboard.port);
            info!(service = %cfg.service.name, port, "Starting API server");
            let state = Arc::new(DashboardState::new(&cfg.service.name, service, rankings));
            dashboard::serve(state, port).await?;
        }
    }

    Ok(())
}
