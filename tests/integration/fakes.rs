//! Deterministic in-memory sources and predictors for integration testing.
//!
//! Behaviour is switchable at runtime so a test can break a source, watch
//! the breaker trip, heal it and reset.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use augur::predictors::Predictor;
use augur::sources::MarketDataSource;
use augur::types::{Market, RawResponse, RealtimeQuote};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Which markets a fake source claims to cover.
#[derive(Debug, Clone, Copy)]
pub enum Coverage {
    All,
    Korean,
    Us,
}

pub struct FakeSource {
    name: String,
    price: f64,
    coverage: Coverage,
    healthy: AtomicBool,
    calls: AtomicU64,
}

impl FakeSource {
    pub fn new(name: &str, price: f64, coverage: Coverage) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            price,
            coverage,
            healthy: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        })
    }

    /// Starts down; answers 100.0 once healed.
    pub fn broken(name: &str, coverage: Coverage) -> Arc<Self> {
        let s = Self::new(name, 100.0, coverage);
        s.set_healthy(false);
        s
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for FakeSource {
    fn supports_market(&self, market: Market) -> bool {
        match self.coverage {
            Coverage::All => true,
            Coverage::Korean => market.is_korean(),
            Coverage::Us => market.is_us(),
        }
    }

    async fn fetch_realtime(&self, _symbol: &str, _market: Market) -> Result<Option<RealtimeQuote>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.healthy.load(Ordering::SeqCst) {
            bail!("{} is down", self.name);
        }
        Ok(Some(RealtimeQuote::from_closes(
            &self.name,
            self.price,
            self.price * 0.99,
            10_000,
        )))
    }
}

// ---------------------------------------------------------------------------
// Predictors
// ---------------------------------------------------------------------------

pub struct FakePredictor {
    name: String,
    answer: Option<String>,
    delay: Duration,
    calls: AtomicU64,
}

impl FakePredictor {
    /// Answers every prompt with `answer`.
    pub fn answering(name: &str, answer: String) -> Arc<Self> {
        Self::build(name, Some(answer), Duration::ZERO)
    }

    /// Answers after `delay`.
    pub fn slow(name: &str, answer: String, delay: Duration) -> Arc<Self> {
        Self::build(name, Some(answer), delay)
    }

    /// Always errors.
    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, None, Duration::ZERO)
    }

    fn build(name: &str, answer: Option<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            answer,
            delay,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Predictor for FakePredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }

    fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn predict(&self, _prompt: &str) -> Result<RawResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.answer {
            Some(text) => Ok(RawResponse::ok("fake-model", text.clone())),
            None => bail!("{} API error 503", self.name),
        }
    }
}

/// A well-formed answer covering the three default horizons.
pub fn answer(price: f64, sentiment: &str, reason: &str) -> String {
    serde_json::json!({
        "1d": { "price": price, "reason": reason, "sentiment": sentiment },
        "1w": { "price": price * 1.01, "reason": reason, "sentiment": sentiment },
        "1m": { "price": price * 1.05, "reason": reason, "sentiment": sentiment },
    })
    .to_string()
}
