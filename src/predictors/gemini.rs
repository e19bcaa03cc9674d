//! Google Gemini predictor via `generateContent`.

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

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const API_KEY_HEADER: &str = "x-goog-api-key";
pub const DEFAULT_NAME: &str = "Gemini";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_KEY_ENV: &str = "GOOGLE_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 1000;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GeminiPredictor {
    http: Client,
    api_key: SecretString,
    name: String,
    model: String,
    max_tokens: u32,
    request_timeout: Option<Duration>,
    total_calls: AtomicU64,
}

impl GeminiPredictor {
    pub fn new(
        api_key: SecretString,
        name: Option<String>,
        model: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build Gemini HTTP client")?;

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

    fn endpoint(&self) -> String {
        format!(
            "{GEMINI_API_BASE}/{}:generateContent",
            urlencoding::encode(&self.model)
        )
    }

    fn build_request(&self, prompt: &str) -> GenerateRequest {
        let text_content = |role: Option<&str>, text: &str| Content {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        };
        GenerateRequest {
            system_instruction: text_content(None, SYSTEM_PROMPT),
            contents: vec![text_content(Some("user"), prompt)],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: self.max_tokens,
                response_mime_type: "application/json",
            },
        }
    }

    /// The key travels in a header so it never shows up in request URLs.
    fn http_request(&self, url: &str, body: &GenerateRequest) -> RequestBuilder {
        let builder = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(body);
        with_deadline(builder, self.request_timeout)
    }

    fn extract_text(body: GenerateResponse) -> String {
        body.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Predictor for GeminiPredictor {
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
        let url = self.endpoint();

        debug!(predictor = %self.name, model = %self.model, "Gemini prediction request");

        let response = send_with_retry("Gemini", || self.http_request(&url, &request)).await?;

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let model = body.model_version.clone().unwrap_or_else(|| self.model.clone());
        let text = Self::extract_text(body);
        if text.trim().is_empty() {
            anyhow::bail!("Gemini returned no candidates");
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        info!(predictor = %self.name, model = %model, chars = text.len(), "Gemini prediction complete");

        Ok(RawResponse::ok(&model, text))
    }
}
