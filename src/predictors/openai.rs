//! OpenAI GPT predictor.
//!
//! Targets the Chat Completions API with JSON-object response format so
//! the answer parses directly.

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

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_NAME: &str = "GPT";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 1000;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiPredictor {
    http: Client,
    api_key: SecretString,
    name: String,
    model: String,
    max_tokens: u32,
    request_timeout: Option<Duration>,
    total_calls: AtomicU64,
}

impl OpenAiPredictor {
    pub fn new(
        api_key: SecretString,
        name: Option<String>,
        model: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build OpenAI HTTP client")?;

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

    fn build_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(prompt.to_string()),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        }
    }

    fn http_request(&self, body: &ChatRequest) -> RequestBuilder {
        let builder = self
            .http
            .post(OPENAI_API_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(body);
        with_deadline(builder, self.request_timeout)
    }

    fn extract_text(body: ChatResponse) -> Option<String> {
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|t| !t.trim().is_empty())
    }
}

#[async_trait]
impl Predictor for OpenAiPredictor {
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

        debug!(predictor = %self.name, model = %self.model, "OpenAI prediction request");

        let response = send_with_retry("OpenAI", || self.http_request(&request)).await?;

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let model = body.model.clone().unwrap_or_else(|| self.model.clone());
        let text = Self::extract_text(body)
            .ok_or_else(|| anyhow::anyhow!("OpenAI returned an empty completion"))?;

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        info!(predictor = %self.name, model = %model, chars = text.len(), "OpenAI prediction complete");

        Ok(RawResponse::ok(&model, text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
