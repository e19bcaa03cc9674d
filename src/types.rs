//! Shared types for the AUGUR engine.
//!
//! These types form the data model used across all modules. Sources,
//! predictors, and the engine depend on them without depending on
//! each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named forecast distance, e.g. `"1d"`, `"1w"`, `"1m"`.
pub type Horizon = String;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Exchange a symbol is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Krx,
    Kospi,
    Kosdaq,
    Nasdaq,
    Nyse,
    Amex,
}

impl Market {
    /// All known markets (useful for iteration).
    pub const ALL: &'static [Market] = &[
        Market::Krx,
        Market::Kospi,
        Market::Kosdaq,
        Market::Nasdaq,
        Market::Nyse,
        Market::Amex,
    ];

    /// Korea Exchange listings (KRX umbrella, KOSPI, KOSDAQ).
    pub fn is_korean(&self) -> bool {
        matches!(self, Market::Krx | Market::Kospi | Market::Kosdaq)
    }

    /// US listings.
    pub fn is_us(&self) -> bool {
        matches!(self, Market::Nasdaq | Market::Nyse | Market::Amex)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Market::Krx => "KRX",
            Market::Kospi => "KOSPI",
            Market::Kosdaq => "KOSDAQ",
            Market::Nasdaq => "NASDAQ",
            Market::Nyse => "NYSE",
            Market::Amex => "AMEX",
        };
        write!(f, "{s}")
    }
}

/// Case-insensitive parse.
impl std::str::FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "KRX" => Ok(Market::Krx),
            "KOSPI" => Ok(Market::Kospi),
            "KOSDAQ" => Ok(Market::Kosdaq),
            "NASDAQ" => Ok(Market::Nasdaq),
            "NYSE" => Ok(Market::Nyse),
            "AMEX" => Ok(Market::Amex),
            other => anyhow::bail!("Unknown market: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Realtime quote
// ---------------------------------------------------------------------------

/// Source name carried by placeholder quotes.
pub const SYNTHETIC_SOURCE: &str = "synthetic";

/// Latest trading snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeQuote {
    pub current_price: f64,
    pub market_cap: f64,
    pub trading_volume: u64,
    pub trading_value: f64,
    /// Percent change versus the previous close. May be negative.
    pub change_rate: f64,
    pub previous_close: f64,
    /// Name of the provider that answered, or `"synthetic"`.
    pub source: String,
    /// True when no provider answered and this is placeholder data.
    /// Never treat a synthetic quote as ground truth.
    pub synthetic: bool,
}

impl RealtimeQuote {
    /// Build a genuine quote from the current and previous close.
    pub fn from_closes(
        source: &str,
        current_price: f64,
        previous_close: f64,
        trading_volume: u64,
    ) -> Self {
        let change_rate = if previous_close > 0.0 {
            (current_price - previous_close) / previous_close * 100.0
        } else {
            0.0
        };
        Self {
            current_price,
            market_cap: 0.0,
            trading_volume,
            trading_value: current_price * trading_volume as f64,
            change_rate,
            previous_close,
            source: source.to_string(),
            synthetic: false,
        }
    }

    /// A payload is usable when it carries a positive price and no
    /// negative or non-finite amounts.
    pub fn is_well_formed(&self) -> bool {
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        self.current_price.is_finite()
            && self.current_price > 0.0
            && non_negative(self.market_cap)
            && non_negative(self.trading_value)
            && non_negative(self.previous_close)
            && self.change_rate.is_finite()
    }
}

impl fmt::Display for RealtimeQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} ({:+.2}%) vol {} via {}{}",
            self.current_price,
            self.change_rate,
            self.trading_volume,
            self.source,
            if self.synthetic { " [SYNTHETIC]" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Opinions
// ---------------------------------------------------------------------------

/// Directional view attached to a price opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Negative => write!(f, "negative"),
            Sentiment::Neutral => write!(f, "neutral"),
        }
    }
}

/// One predictor's view for one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodOpinion {
    /// Predicted price (> 0)
    pub price: f64,
    /// Non-empty rationale
    pub reason: String,
    pub sentiment: Sentiment,
}

/// Parsed output of one predictor for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPrediction {
    pub provider_name: String,
    pub opinions: BTreeMap<Horizon, PeriodOpinion>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProviderPrediction {
    /// A successful prediction. Callers guarantee `opinions` is non-empty.
    pub fn new(provider_name: &str, opinions: BTreeMap<Horizon, PeriodOpinion>) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            opinions,
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Placeholder for a predictor that timed out, errored, or produced
    /// unparseable output.
    pub fn failed(provider_name: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            opinions: BTreeMap::new(),
            success: false,
            timestamp: Utc::now(),
        }
    }

    /// Whether this prediction may take part in the ensemble.
    pub fn is_usable(&self) -> bool {
        self.success && !self.opinions.is_empty()
    }
}

/// Consensus for one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleOpinion {
    /// Mean price, rounded to 2 decimals
    pub price: f64,
    pub reason: String,
    pub sentiment: Sentiment,
    pub disagreement: bool,
    /// Sample standard deviation, rounded to 2 decimals
    pub std_dev: f64,
}

// ---------------------------------------------------------------------------
// Predictor wire result
// ---------------------------------------------------------------------------

/// Unparsed answer from a predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub model_identifier: String,
    pub raw_text: String,
    pub success: bool,
}

impl RawResponse {
    pub fn ok(model_identifier: &str, raw_text: String) -> Self {
        Self {
            model_identifier: model_identifier.to_string(),
            raw_text,
            success: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Everything produced by one pass through the prediction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionReport {
    pub request_id: uuid::Uuid,
    pub symbol: String,
    pub market: Market,
    pub quote: RealtimeQuote,
    /// Per-predictor results, including unsuccessful ones.
    pub predictions: BTreeMap<String, ProviderPrediction>,
    pub ensemble: BTreeMap<Horizon, EnsembleOpinion>,
    pub successful_predictors: usize,
    pub elapsed_ms: u64,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rankings
// ---------------------------------------------------------------------------

/// One row of the trading-value leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRanking {
    /// 1-based position by descending trading value.
    pub rank: usize,
    pub symbol: String,
    pub name: String,
    pub market: Market,
    pub current_price: f64,
    pub change_rate: f64,
    /// Traded amount in the listing currency.
    pub trading_value: f64,
    pub source: String,
}

/// A ranked snapshot of the watch-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingBoard {
    pub rankings: Vec<StockRanking>,
    pub count: usize,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Per-unit failures. These are absorbed where they happen and only
/// appear in logs.
#[derive(Debug, thiserror::Error)]
pub enum AugurError {
    #[error("Provider unavailable ({provider}): {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Predictor timed out ({predictor}) after {timeout_ms}ms")]
    PredictorTimeout { predictor: String, timeout_ms: u64 },

    #[error("Predictor failed ({predictor}): {message}")]
    PredictorFailure { predictor: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
