//! Ensemble aggregation.
//!
//! Reduces per-predictor opinions into one consensus per horizon:
//! mean price, sample standard deviation, a disagreement flag, the
//! majority sentiment and a short consolidated rationale.
//!
//! Predictions are visited in `BTreeMap` order, i.e. lexicographically by
//! predictor name. Sentiment ties and reason ordering depend on it.

use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::config::EnsembleConfig;
use crate::types::{EnsembleOpinion, Horizon, PeriodOpinion, ProviderPrediction, Sentiment};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Ratio of std-dev to mean above which predictors disagree.
pub const DEFAULT_DISAGREEMENT_THRESHOLD: f64 = 0.2;

/// At most this many distinct reasons are quoted verbatim.
const MAX_REASONS: usize = 3;

const REASON_SEPARATOR: &str = " | ";

pub fn default_horizons() -> Vec<Horizon> {
    vec!["1d".to_string(), "1w".to_string(), "1m".to_string()]
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnsembleError {
    #[error("No successful predictions to aggregate")]
    NoValidPredictions,

    #[error("No horizon had any opinion to aggregate")]
    NoValidEnsemble,
}

impl EnsembleError {
    /// Stable machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EnsembleError::NoValidPredictions => "NoValidPredictions",
            EnsembleError::NoValidEnsemble => "NoValidEnsemble",
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnsembleAggregator {
    disagreement_threshold: f64,
    horizons: Vec<Horizon>,
}

impl Default for EnsembleAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_DISAGREEMENT_THRESHOLD, default_horizons())
    }
}

impl EnsembleAggregator {
    pub fn new(disagreement_threshold: f64, horizons: Vec<Horizon>) -> Self {
        Self {
            disagreement_threshold,
            horizons,
        }
    }

    pub fn from_config(cfg: &EnsembleConfig) -> Self {
        Self::new(cfg.disagreement_threshold, cfg.horizons.clone())
    }

    pub fn horizons(&self) -> &[Horizon] {
        &self.horizons
    }

    pub fn disagreement_threshold(&self) -> f64 {
        self.disagreement_threshold
    }

    /// Build one consensus per configured horizon.
    ///
    /// Horizons nobody answered are omitted. Pure and deterministic:
    /// the same input always yields bit-identical output.
    pub fn aggregate(
        &self,
        predictions: &BTreeMap<String, ProviderPrediction>,
    ) -> Result<BTreeMap<Horizon, EnsembleOpinion>, EnsembleError> {
        let usable: Vec<&ProviderPrediction> =
            predictions.values().filter(|p| p.is_usable()).collect();

        if usable.is_empty() {
            return Err(EnsembleError::NoValidPredictions);
        }

        let mut ensemble = BTreeMap::new();
        for horizon in &self.horizons {
            let opinions: Vec<&PeriodOpinion> = usable
                .iter()
                .filter_map(|p| p.opinions.get(horizon))
                .collect();

            if let Some(consensus) = self.combine(&opinions) {
                debug!(
                    horizon = %horizon,
                    voters = opinions.len(),
                    price = consensus.price,
                    std_dev = consensus.std_dev,
                    disagreement = consensus.disagreement,
                    "Horizon aggregated"
                );
                ensemble.insert(horizon.clone(), consensus);
            }
        }

        if ensemble.is_empty() {
            return Err(EnsembleError::NoValidEnsemble);
        }
        Ok(ensemble)
    }

    fn combine(&self, opinions: &[&PeriodOpinion]) -> Option<EnsembleOpinion> {
        if opinions.is_empty() {
            return None;
        }

        let prices: Vec<f64> = opinions.iter().map(|o| o.price).collect();
        let mean = mean(&prices);
        let std_dev = sample_std_dev(&prices, mean);

        // Unrounded values; rounding only affects what is reported.
        let disagreement = mean > 0.0 && std_dev / mean > self.disagreement_threshold;

        Some(EnsembleOpinion {
            price: round2(mean),
            reason: consolidate_reasons(opinions.iter().map(|o| o.reason.as_str())),
            sentiment: majority_sentiment(opinions.iter().map(|o| o.sentiment)),
            disagreement,
            std_dev: round2(std_dev),
        })
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample (n-1) standard deviation; zero for fewer than two values.
fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Most frequent sentiment. On a tie the value that reached the winning
/// count first wins.
///
/// Not first-seen order: `[neg, pos, pos, neg]` yields
/// positive (it hit two votes first), where a first-seen counter would
/// yield negative. Votes arrive in predictor name order.
fn majority_sentiment(votes: impl Iterator<Item = Sentiment>) -> Sentiment {
    let mut counts: Vec<(Sentiment, usize)> = Vec::with_capacity(3);
    let mut best: Option<(Sentiment, usize)> = None;

    for vote in votes {
        let count = match counts.iter_mut().find(|(s, _)| *s == vote) {
            Some((_, c)) => {
                *c += 1;
                *c
            }
            None => {
                counts.push((vote, 1));
                1
            }
        };
        if best.map_or(true, |(_, n)| count > n) {
            best = Some((vote, count));
        }
    }

    best.map(|(s, _)| s).unwrap_or(Sentiment::Neutral)
}

/// Exact-text dedupe in first-seen order, first three joined, with a
/// `(+N more)` marker for the rest.
fn consolidate_reasons<'a>(reasons: impl Iterator<Item = &'a str>) -> String {
    let mut seen = HashSet::new();
    let unique: Vec<&str> = reasons.filter(|r| seen.insert(*r)).collect();

    let mut joined = unique
        .iter()
        .take(MAX_REASONS)
        .copied()
        .collect::<Vec<_>>()
        .join(REASON_SEPARATOR);

    if unique.len() > MAX_REASONS {
        joined.push_str(&format!(" (+{} more)", unique.len() - MAX_REASONS));
    }
    joined
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
