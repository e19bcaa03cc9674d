//! The prediction pipeline.
//!
//! resolve quote → build prompts → fan out → parse → aggregate.
//!
//! Finished reports are kept in a small in-memory TTL cache keyed by
//! `(symbol, market)`. Reports built on a synthetic quote are never cached,
//! so a recovered source is picked up on the next request.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ensemble::{EnsembleAggregator, EnsembleError};
use super::fanout::FanOutOrchestrator;
use super::prompt::PromptBuilder;
use crate::config::AppConfig;
use crate::predictors::parser::parse_response;
use crate::predictors::{build_predictors, Predictor};
use crate::sources::build_resolver;
use crate::sources::fallback::{FallbackResolver, SourceStatus};
use crate::types::{Horizon, Market, PredictionReport, ProviderPrediction};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced to callers of `predict`.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
}

impl PredictError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::InvalidSymbol(_) => "InvalidSymbol",
            PredictError::Ensemble(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

type CacheKey = (String, Market);

struct ReportCache {
    entries: HashMap<CacheKey, CacheEntry>,
    ttl: ChronoDuration,
}

struct CacheEntry {
    report: PredictionReport,
    inserted_at: DateTime<Utc>,
}

impl ReportCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero()),
        }
    }

    fn enabled(&self) -> bool {
        self.ttl > ChronoDuration::zero()
    }

    fn get(&self, key: &CacheKey) -> Option<&PredictionReport> {
        self.entries.get(key).and_then(|entry| {
            if Utc::now() - entry.inserted_at < self.ttl {
                Some(&entry.report)
            } else {
                None
            }
        })
    }

    fn insert(&mut self, key: CacheKey, report: PredictionReport) {
        if !self.enabled() {
            return;
        }
        self.evict_expired();
        self.entries.insert(
            key,
            CacheEntry {
                report,
                inserted_at: Utc::now(),
            },
        );
    }

    fn evict_expired(&mut self) {
        let now = Utc::now();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.inserted_at < ttl);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct PredictionService {
    resolver: Arc<FallbackResolver>,
    orchestrator: FanOutOrchestrator,
    prompts: PromptBuilder,
    aggregator: EnsembleAggregator,
    predictor_timeout: Duration,
    cache: RwLock<ReportCache>,
}

impl PredictionService {
    pub fn new(
        resolver: FallbackResolver,
        predictors: Vec<Arc<dyn Predictor>>,
        aggregator: EnsembleAggregator,
        predictor_timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            orchestrator: FanOutOrchestrator::new(predictors),
            prompts: PromptBuilder::new(aggregator.horizons().to_vec()),
            aggregator,
            predictor_timeout,
            cache: RwLock::new(ReportCache::new(cache_ttl)),
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let resolver = build_resolver(&cfg.sources).context("Failed to build source resolver")?;
        let predictors =
            build_predictors(&cfg.predictors).context("Failed to build predictors")?;

        info!(
            sources = resolver.len(),
            predictors = predictors.len(),
            horizons = ?cfg.ensemble.horizons,
            "Prediction service ready"
        );

        Ok(Self::new(
            resolver,
            predictors,
            EnsembleAggregator::from_config(&cfg.ensemble),
            Duration::from_secs(cfg.predictors.timeout_secs),
            Duration::from_secs(cfg.cache.ttl_secs),
        ))
    }

    /// Run the full pipeline for one symbol.
    pub async fn predict(
        &self,
        symbol: &str,
        market: Market,
    ) -> Result<PredictionReport, PredictError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(PredictError::InvalidSymbol(symbol));
        }
        let key = (symbol.clone(), market);

        if let Some(report) = self.cache.read().await.get(&key) {
            debug!(symbol = %symbol, %market, request_id = %report.request_id, "Report cache hit");
            return Ok(report.clone());
        }

        let request_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%request_id, symbol = %symbol, %market, "Prediction started");

        let quote = self.resolver.resolve_realtime(&symbol, market).await;

        let prompts = self.prompts.build_all(
            &symbol,
            market,
            &quote,
            &self.orchestrator.predictor_names(),
        );
        let fanout = self
            .orchestrator
            .dispatch_all(&prompts, self.predictor_timeout)
            .await;

        let predictions: BTreeMap<String, ProviderPrediction> = fanout
            .results
            .iter()
            .map(|(name, raw)| {
                (
                    name.clone(),
                    parse_response(name, raw.as_ref(), self.aggregator.horizons()),
                )
            })
            .collect();
        let successful_predictors = predictions.values().filter(|p| p.is_usable()).count();

        let ensemble = self.aggregator.aggregate(&predictions).map_err(|e| {
            warn!(%request_id, symbol = %symbol, error = %e, "Aggregation failed");
            e
        })?;

        let report = PredictionReport {
            request_id,
            symbol,
            market,
            quote,
            predictions,
            ensemble,
            successful_predictors,
            elapsed_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
        };

        info!(
            %request_id,
            symbol = %report.symbol,
            synthetic = report.quote.synthetic,
            successful = report.successful_predictors,
            horizons = report.ensemble.len(),
            elapsed_ms = report.elapsed_ms,
            "Prediction complete"
        );

        if !report.quote.synthetic {
            self.cache.write().await.insert(key, report.clone());
        }

        Ok(report)
    }

    /// The resolver, for components that share its breakers.
    pub fn resolver(&self) -> Arc<FallbackResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.resolver.status()
    }

    /// Clear every source breaker and return the new status.
    pub fn reset_sources(&self) -> Vec<SourceStatus> {
        self.resolver.reset_all();
        self.resolver.status()
    }

    pub fn reset_source(&self, name: &str) -> bool {
        self.resolver.reset(name)
    }

    pub fn predictor_names(&self) -> Vec<String> {
        self.orchestrator.predictor_names()
    }

    pub fn horizons(&self) -> &[Horizon] {
        self.aggregator.horizons()
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
