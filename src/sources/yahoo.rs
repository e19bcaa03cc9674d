//! Yahoo Finance realtime source.
//!
//! Uses the public chart endpoint (no key). Covers every market: Korean
//! six-digit codes are suffixed `.KS` (KOSPI/KRX) or `.KQ` (KOSDAQ).
//!
//! API: `https://query1.finance.yahoo.com/v8/finance/chart/{symbol}`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::MarketDataSource;
use crate::types::{Market, RealtimeQuote};

pub const SOURCE_NAME: &str = "YahooFinance";

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct YahooSource {
    http: Client,
}

impl YahooSource {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build Yahoo Finance HTTP client")?;
        Ok(Self { http })
    }

    /// Map a bare exchange code to Yahoo's ticker format.
    pub fn format_symbol(symbol: &str, market: Market) -> String {
        if symbol.contains('.') {
            return symbol.to_string();
        }
        let is_krx_code = symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_digit());
        match market {
            Market::Kosdaq if is_krx_code => format!("{symbol}.KQ"),
            Market::Krx | Market::Kospi if is_krx_code => format!("{symbol}.KS"),
            _ => symbol.to_string(),
        }
    }

    /// Latest close, previous close and latest volume from a chart body.
    fn parse_chart(body: ChartResponse) -> Result<Option<RealtimeQuote>> {
        if let Some(err) = body.chart.error {
            anyhow::bail!("Yahoo chart error {}: {}", err.code, err.description);
        }

        let Some(series) = body
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .and_then(|r| r.indicators.quote.into_iter().next())
        else {
            return Ok(None);
        };

        // Trading days with a close; the trailing day may still be null.
        let rows: Vec<(f64, u64)> = series
            .close
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.map(|close| (close, series.volume.get(i).copied().flatten().unwrap_or(0)))
            })
            .collect();

        let Some(&(current, volume)) = rows.last() else {
            return Ok(None);
        };
        let previous = if rows.len() > 1 {
            rows[rows.len() - 2].0
        } else {
            current
        };

        Ok(Some(RealtimeQuote::from_closes(SOURCE_NAME, current, previous, volume)))
    }
}

#[async_trait]
impl MarketDataSource for YahooSource {
    fn supports_market(&self, _market: Market) -> bool {
        true
    }

    async fn fetch_realtime(&self, symbol: &str, market: Market) -> Result<Option<RealtimeQuote>> {
        let ticker = Self::format_symbol(symbol, market);
        let url = format!(
            "{CHART_URL}/{}?range=5d&interval=1d",
            urlencoding::encode(&ticker)
        );

        debug!(ticker = %ticker, "Yahoo chart request");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Yahoo chart request failed")?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("Yahoo chart HTTP {status}");
        }

        let body: ChartResponse = response
            .json()
            .await
            .context("Failed to parse Yahoo chart response")?;

        Self::parse_chart(body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
