//! AUGUR: resilient multi-model stock price forecasting
//!
//! Entry point. Parses the command line, loads configuration,
//! initialises structured logging and runs the requested command.

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use augur::cli::{self, Cli};
use augur::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args = Cli::parse();

    // A missing file means "all defaults"; a broken one is fatal.
    let config_found = args.config.exists();
    let cfg = if config_found {
        AppConfig::load(&args.config.to_string_lossy())?
    } else {
        AppConfig::default()
    };

    init_logging();

    if !config_found {
        warn!(path = %args.config.display(), "Config file not found, using defaults");
    }
    info!(
        service = %cfg.service.name,
        failure_threshold = cfg.sources.failure_threshold,
        predictor_timeout_secs = cfg.predictors.timeout_secs,
        cache_ttl_secs = cfg.cache.ttl_secs,
        "AUGUR starting up"
    );

    cli::run(args, cfg).await
}

/// Initialise the tracing subscriber with env filter and optional JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("augur=info"));

    let json_logging = std::env::var("AUGUR_LOG_JSON").is_ok();

    // Logs go to stderr so `predict` output on stdout stays pipeable.
    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
