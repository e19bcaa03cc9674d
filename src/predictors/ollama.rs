//! Local models served by Ollama (`/api/generate`).
//!
//! One `OllamaPredictor` per configured model, so Gemma and Qwen appear as
//! separate predictors in the fan-out even though they share a host.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{send_with_retry, with_deadline, Predictor, SYSTEM_PROMPT, TEMPERATURE};
use crate::types::RawResponse;

const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    response: String,
}

pub struct OllamaPredictor {
    http: Client,
    endpoint: String,
    name: String,
    model: String,
    max_tokens: u32,
    request_timeout: Option<Duration>,
    total_calls: AtomicU64,
}

impl OllamaPredictor {
    pub fn new(host: &str, name: &str, model: &str, max_tokens: Option<u32>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build Ollama HTTP client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/api/generate", host.trim_end_matches('/')),
            name: name.to_string(),
            model: model.to_string(),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            request_timeout: None,
            total_calls: AtomicU64::new(0),
        })
    }

    /// Bound every HTTP request. Local inference on CPU can be slow, so this
    /// is normally the configured predictor timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            prompt,
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: TEMPERATURE,
                num_predict: self.max_tokens,
            },
        }
    }

    fn http_request(&self, body: &GenerateRequest<'_>) -> RequestBuilder {
        with_deadline(self.http.post(&self.endpoint).json(body), self.request_timeout)
    }
}

#[async_trait]
impl Predictor for OllamaPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    async fn predict(&self, prompt: &str) -> Result<RawResponse> {
        let request = self.build_request(prompt);

        debug!(predictor = %self.name, model = %self.model, endpoint = %self.endpoint, "Ollama prediction request");

        let response = send_with_retry("Ollama", || self.http_request(&request)).await?;

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        if body.response.trim().is_empty() {
            anyhow::bail!("Ollama model {} returned an empty response", self.model);
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let model = body.model.unwrap_or_else(|| self.model.clone());
        info!(predictor = %self.name, model = %model, chars = body.response.len(), "Ollama prediction complete");

        Ok(RawResponse::ok(&model, body.response))
    }
}
