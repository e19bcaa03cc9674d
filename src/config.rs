//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. Every section has defaults,
//! so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::Market;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub sources: SourcesConfig,
    pub predictors: PredictorsConfig,
    pub ensemble: EnsembleConfig,
    pub cache: CacheConfig,
    pub rankings: RankingsConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { name: "AUGUR-001".to_string() }
    }
}

/// Market-data sources and their circuit breakers.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    /// Consecutive failures before a source is disabled.
    pub failure_threshold: u32,
    /// Upper bound on a single source call.
    pub call_timeout_secs: u64,
    pub yahoo_enabled: bool,
    /// Env var holding the Alpha Vantage key. Source is skipped when unset.
    pub alpha_vantage_key_env: Option<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            call_timeout_secs: 5,
            yahoo_enabled: true,
            alpha_vantage_key_env: Some("ALPHA_VANTAGE_API_KEY".to_string()),
        }
    }
}

/// LLM predictors queried in parallel.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PredictorsConfig {
    /// Per-call timeout applied by the fan-out orchestrator. The default is
    /// generous because local CPU inference is slow.
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub openai: HostedPredictorConfig,
    pub anthropic: HostedPredictorConfig,
    pub gemini: HostedPredictorConfig,
    pub ollama: OllamaConfig,
}

impl Default for PredictorsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_tokens: 1000,
            openai: HostedPredictorConfig::default(),
            anthropic: HostedPredictorConfig::default(),
            gemini: HostedPredictorConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

/// A remote, key-authenticated predictor. Unset fields fall back to the
/// client's own defaults.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HostedPredictorConfig {
    pub enabled: bool,
    /// Registry name (e.g. "GPT"). Also the key used in prompt maps.
    pub name: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
}

impl Default for HostedPredictorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: None,
            model: None,
            api_key_env: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OllamaConfig {
    pub enabled: bool,
    pub host: String,
    pub models: Vec<OllamaModelConfig>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "http://localhost:11434".to_string(),
            models: vec![
                OllamaModelConfig {
                    name: "Gemma".to_string(),
                    model: "gemma3:1b".to_string(),
                },
                OllamaModelConfig {
                    name: "Qwen".to_string(),
                    model: "qwen3:8b".to_string(),
                },
            ],
        }
    }
}

/// One model served by the local Ollama host.
#[derive(Debug, Deserialize, Clone)]
pub struct OllamaModelConfig {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EnsembleConfig {
    /// stdDev / mean above which predictors are considered in disagreement.
    pub disagreement_threshold: f64,
    pub horizons: Vec<String>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            disagreement_threshold: 0.2,
            horizons: vec!["1d".to_string(), "1w".to_string(), "1m".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Report TTL. 0 disables caching.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

/// Trading-value leaderboard over a fixed watch-list.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RankingsConfig {
    /// Board TTL. 0 refetches on every request.
    pub ttl_secs: u64,
    /// Entries kept on the board.
    pub limit: usize,
    pub watchlist: Vec<WatchlistEntry>,
}

impl Default for RankingsConfig {
    fn default() -> Self {
        let entry = |symbol: &str, name: &str, market: Market| WatchlistEntry {
            symbol: symbol.to_string(),
            name: name.to_string(),
            market,
        };
        Self {
            ttl_secs: 60,
            limit: 10,
            watchlist: vec![
                entry("005930", "Samsung Electronics", Market::Kospi),
                entry("000660", "SK hynix", Market::Kospi),
                entry("035420", "NAVER", Market::Kospi),
                entry("051910", "LG Chem", Market::Kospi),
                entry("006400", "Samsung SDI", Market::Kospi),
                entry("035720", "Kakao", Market::Kospi),
                entry("005380", "Hyundai Motor", Market::Kospi),
                entry("068270", "Celltrion", Market::Kospi),
                entry("207940", "Samsung Biologics", Market::Kospi),
                entry("005490", "POSCO Holdings", Market::Kospi),
                entry("373220", "LG Energy Solution", Market::Kospi),
                entry("096770", "SK Innovation", Market::Kospi),
                entry("247540", "EcoPro BM", Market::Kosdaq),
                entry("086520", "EcoPro", Market::Kosdaq),
                entry("196170", "Alteogen", Market::Kosdaq),
            ],
        }
    }
}

/// One symbol tracked by the rankings board.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WatchlistEntry {
    pub symbol: String,
    /// Display name.
    pub name: String,
    pub market: Market,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = self.ensemble.disagreement_threshold;
        if !t.is_finite() || t <= 0.0 {
            anyhow::bail!("ensemble.disagreement_threshold must be a positive number, got {t}");
        }
        if self.ensemble.horizons.is_empty() {
            anyhow::bail!("ensemble.horizons must not be empty");
        }
        if self.ensemble.horizons.iter().any(|h| h.trim().is_empty()) {
            anyhow::bail!("ensemble.horizons must not contain blank names");
        }
        if self.sources.failure_threshold == 0 {
            anyhow::bail!("sources.failure_threshold must be at least 1");
        }
        if self.predictors.timeout_secs == 0 {
            anyhow::bail!("predictors.timeout_secs must be at least 1");
        }
        if self.rankings.limit == 0 {
            anyhow::bail!("rankings.limit must be at least 1");
        }
        if self.rankings.watchlist.iter().any(|w| w.symbol.trim().is_empty()) {
            anyhow::bail!("rankings.watchlist must not contain blank symbols");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
