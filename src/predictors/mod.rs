//! LLM price predictors.
//!
//! Defines the `Predictor` trait and provides implementations for
//! GPT (OpenAI), Claude (Anthropic), Gemini (Google), and local models
//! served by Ollama. Each predictor returns raw text; `parser` turns that
//! text into structured per-horizon opinions.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod parser;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, HostedPredictorConfig, PredictorsConfig};
use crate::types::RawResponse;
use anthropic::AnthropicPredictor;
use gemini::GeminiPredictor;
use ollama::OllamaPredictor;
use openai::OpenAiPredictor;

// ---------------------------------------------------------------------------
// Shared configuration
// ---------------------------------------------------------------------------

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

/// Sampling temperature used by every predictor.
pub const TEMPERATURE: f32 = 0.7;

/// System instruction shared by chat-style APIs.
pub const SYSTEM_PROMPT: &str = "You are an equity market analyst. Using only the data provided, \
     predict future prices and answer strictly in the requested JSON format.";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over LLM price predictors.
///
/// Implementors send a fully-built prompt to a model and return its raw
/// answer. Timeouts are applied by the caller, not here.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Registry name (e.g. "GPT", "Gemma"). Unique per deployment.
    fn name(&self) -> &str;

    /// Model identifier string sent to the provider.
    fn model_name(&self) -> &str;

    /// Number of successful API calls so far.
    fn total_calls(&self) -> u64;

    /// Ask the model for a prediction.
    async fn predict(&self, prompt: &str) -> Result<RawResponse>;
}

// ---------------------------------------------------------------------------
// Registry construction
// ---------------------------------------------------------------------------

/// Build every predictor the configuration enables and has credentials for.
///
/// Hosted predictors without an API key are skipped (absent, not failed).
/// Ollama models are always registered when enabled; an unreachable local
/// server shows up later as per-call failures.
pub fn build_predictors(cfg: &PredictorsConfig) -> Result<Vec<Arc<dyn Predictor>>> {
    let mut predictors: Vec<Arc<dyn Predictor>> = Vec::new();
    let request_timeout = Duration::from_secs(cfg.timeout_secs);

    if let Some(key) = hosted_key(&cfg.openai, openai::DEFAULT_KEY_ENV) {
        predictors.push(Arc::new(OpenAiPredictor::new(
            key,
            cfg.openai.name.clone(),
            cfg.openai.model.clone(),
            Some(cfg.max_tokens),
        )?
        .with_timeout(request_timeout)));
    }

    if let Some(key) = hosted_key(&cfg.anthropic, anthropic::DEFAULT_KEY_ENV) {
        predictors.push(Arc::new(AnthropicPredictor::new(
            key,
            cfg.anthropic.name.clone(),
            cfg.anthropic.model.clone(),
            Some(cfg.max_tokens),
        )?
        .with_timeout(request_timeout)));
    }

    if let Some(key) = hosted_key(&cfg.gemini, gemini::DEFAULT_KEY_ENV) {
        predictors.push(Arc::new(GeminiPredictor::new(
            key,
            cfg.gemini.name.clone(),
            cfg.gemini.model.clone(),
            Some(cfg.max_tokens),
        )?
        .with_timeout(request_timeout)));
    }

    if cfg.ollama.enabled {
        for m in &cfg.ollama.models {
            predictors.push(Arc::new(OllamaPredictor::new(
                &cfg.ollama.host,
                &m.name,
                &m.model,
                Some(cfg.max_tokens),
            )?
            .with_timeout(request_timeout)));
        }
    }

    for p in &predictors {
        info!(predictor = p.name(), model = p.model_name(), "Predictor registered");
    }
    if predictors.is_empty() {
        warn!("No predictors registered; every prediction will fail");
    }

    Ok(predictors)
}

fn hosted_key(cfg: &HostedPredictorConfig, default_env: &str) -> Option<SecretString> {
    if !cfg.enabled {
        return None;
    }
    let env = cfg.api_key_env.as_deref().unwrap_or(default_env);
    match AppConfig::resolve_env(env) {
        Ok(key) if !key.is_empty() => Some(SecretString::new(key)),
        _ => {
            info!(env, "API key not set, predictor skipped");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helper
// ---------------------------------------------------------------------------

/// Apply the per-request deadline, if one is set.
pub(crate) fn with_deadline(builder: RequestBuilder, timeout: Option<Duration>) -> RequestBuilder {
    match timeout {
        Some(t) => builder.timeout(t),
        None => builder,
    }
}

/// Send a request with retry + exponential backoff.
///
/// `build` is called once per attempt. 429 and 5xx responses and transport
/// errors are retried; any other non-success status fails immediately.
pub(crate) async fn send_with_retry<F>(provider: &str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder + Send + Sync,
{
    let mut last_error = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
            debug!(provider, attempt, delay_ms = delay, "Retrying API call");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response);
                }

                // Retryable errors: 429 (rate limit), 500+
                if status.as_u16() == 429 || status.is_server_error() {
                    let error_text = response.text().await.unwrap_or_default();
                    warn!(provider, status = %status, attempt, error = %error_text, "Retryable API error");
                    last_error = Some(format!("HTTP {status}: {error_text}"));
                    continue;
                }

                let error_text = response.text().await.unwrap_or_default();
                anyhow::bail!("{provider} API error {status}: {error_text}");
            }
            Err(e) => {
                // Request URLs may carry credentials.
                let e = e.without_url();
                warn!(provider, attempt, error = %e, "API request failed");
                last_error = Some(format!("Request error: {e}"));
            }
        }
    }

    anyhow::bail!(
        "{provider} API failed after {MAX_RETRIES} retries: {}",
        last_error.unwrap_or_default()
    )
}
