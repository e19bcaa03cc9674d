//! Alpha Vantage realtime source (US listings only).
//!
//! API: `https://www.alphavantage.co/query?function=GLOBAL_QUOTE`
//! Auth: API key via `apikey` query param. Free tier is heavily
//! rate-limited, so this source sits last in the fallback chain.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::MarketDataSource;
use crate::types::{Market, RealtimeQuote};

pub const SOURCE_NAME: &str = "AlphaVantage";

const BASE_URL: &str = "https://www.alphavantage.co/query";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(default, rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    /// Present when the free-tier quota is exhausted.
    #[serde(default, rename = "Note")]
    note: Option<String>,
    #[serde(default, rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(default, rename = "05. price")]
    price: Option<String>,
    #[serde(default, rename = "06. volume")]
    volume: Option<String>,
    #[serde(default, rename = "08. previous close")]
    previous_close: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AlphaVantageSource {
    http: Client,
    api_key: SecretString,
}

impl AlphaVantageSource {
    pub fn new(api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build Alpha Vantage HTTP client")?;
        Ok(Self { http, api_key })
    }

    fn parse_quote(body: GlobalQuoteResponse) -> Result<Option<RealtimeQuote>> {
        if let Some(note) = body.note.or(body.information) {
            anyhow::bail!("Alpha Vantage throttled: {note}");
        }

        let Some(q) = body.global_quote else {
            return Ok(None);
        };

        let num = |s: &Option<String>| s.as_deref().and_then(|v| v.trim().parse::<f64>().ok());

        let current = num(&q.price).unwrap_or(0.0);
        if current <= 0.0 {
            return Ok(None);
        }
        let previous = num(&q.previous_close).unwrap_or(0.0);
        let volume = q
            .volume
            .as_deref()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        Ok(Some(RealtimeQuote::from_closes(SOURCE_NAME, current, previous, volume)))
    }
}

#[async_trait]
impl MarketDataSource for AlphaVantageSource {
    fn supports_market(&self, market: Market) -> bool {
        market.is_us()
    }

    async fn fetch_realtime(&self, symbol: &str, _market: Market) -> Result<Option<RealtimeQuote>> {
        debug!(symbol, "Alpha Vantage GLOBAL_QUOTE request");

        let response = self
            .http
            .get(BASE_URL)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", self.api_key.expose_secret().as_str()),
            ])
            .send()
            .await
            // The URL carries the API key.
            .map_err(reqwest::Error::without_url)
            .context("Alpha Vantage request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Alpha Vantage HTTP {status}");
        }

        let body: GlobalQuoteResponse = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to parse Alpha Vantage response")?;

        Self::parse_quote(body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
