//! Realtime market-data sources.
//!
//! Defines the `MarketDataSource` trait and the concrete clients that
//! implement it. Sources are interchangeable: the `FallbackResolver`
//! tries them in priority order until one answers.

pub mod alpha_vantage;
pub mod fallback;
pub mod yahoo;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{AppConfig, SourcesConfig};
use crate::types::{Market, RealtimeQuote};
use alpha_vantage::AlphaVantageSource;
use fallback::FallbackResolver;
use yahoo::YahooSource;

/// Abstraction over realtime quote providers.
///
/// Health tracking lives in the resolver, not here: an implementation only
/// answers whether it covers a market and tries to fetch.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Whether this source can quote symbols listed on `market`.
    fn supports_market(&self, market: Market) -> bool;

    /// Fetch the latest quote. `Ok(None)` means the source answered but had
    /// no data for the symbol.
    async fn fetch_realtime(&self, symbol: &str, market: Market) -> Result<Option<RealtimeQuote>>;
}

/// Build the resolver with every source the configuration allows.
///
/// Sources that cannot operate (disabled, or missing their API key) are
/// left out rather than registered in a disabled state.
pub fn build_resolver(cfg: &SourcesConfig) -> Result<FallbackResolver> {
    let mut resolver = FallbackResolver::new(
        cfg.failure_threshold,
        Duration::from_secs(cfg.call_timeout_secs),
    );

    if cfg.yahoo_enabled {
        resolver.register(yahoo::SOURCE_NAME, 1, Arc::new(YahooSource::new()?))?;
    }

    let av_key = cfg
        .alpha_vantage_key_env
        .as_deref()
        .and_then(|env| AppConfig::resolve_env(env).ok())
        .filter(|k| !k.is_empty());
    match av_key {
        Some(key) => {
            resolver.register(
                alpha_vantage::SOURCE_NAME,
                4,
                Arc::new(AlphaVantageSource::new(SecretString::new(key))?),
            )?;
        }
        None => info!("No Alpha Vantage key configured, source skipped"),
    }

    if resolver.is_empty() {
        warn!("No market-data sources registered; every quote will be synthetic");
    }

    Ok(resolver)
}
