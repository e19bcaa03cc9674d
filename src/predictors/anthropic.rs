//! Anthropic Claude predictor.
//!
//! Uses the Messages API with the shared system prompt.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{send_with_retry, with_deadline, Predictor, SYSTEM_PROMPT, TEMPERATURE};
use crate::types::RawResponse;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_NAME: &str = "Claude";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 1000;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AnthropicPredictor {
    http: Client,
    api_key: SecretString,
    name: String,
    model: String,
    max_tokens: u32,
    request_timeout: Option<Duration>,
    total_calls: AtomicU64,
}

impl AnthropicPredictor {
    pub fn new(
        api_key: SecretString,
        name: Option<String>,
        model: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build Anthropic HTTP client")?;

        Ok(Self {
            http,
            api_key,
            name: name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            request_timeout: None,
            total_calls: AtomicU64::new(0),
        })
    }

    /// Bound every HTTP request, normally by the configured predictor timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn build_request(&self, prompt: &str) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }

    fn http_request(&self, body: &MessagesRequest) -> RequestBuilder {
        let builder = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        with_deadline(builder, self.request_timeout)
    }

    /// Concatenate every text block.
    fn extract_text(body: &MessagesResponse) -> String {
        body.content
            .iter()
            .filter(|b| b.content_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[async_trait]
impl Predictor for AnthropicPredictor {
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

        debug!(predictor = %self.name, model = %self.model, "Anthropic prediction request");

        let response = send_with_retry("Anthropic", || self.http_request(&request)).await?;

        let body: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        let text = Self::extract_text(&body);
        if text.trim().is_empty() {
            anyhow::bail!(
                "Anthropic returned no text (stop_reason={})",
                body.stop_reason.as_deref().unwrap_or("unknown")
            );
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let model = body.model.unwrap_or_else(|| self.model.clone());
        info!(predictor = %self.name, model = %model, chars = text.len(), "Anthropic prediction complete");

        Ok(RawResponse::ok(&model, text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
