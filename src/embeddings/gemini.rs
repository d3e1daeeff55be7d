//! Gemini embedding provider.
//!
//! Thin blocking client for the `embedContent` endpoint. Transient HTTP
//! failures surface as errors; retrying is the worker pool's job, and the
//! circuit breaker sits between the two via [`super::ResilientEmbedder`].

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::vector::vector_to_bytes;
use super::Embedder;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "text-embedding-004";

pub struct GeminiEmbedder {
    http: HttpClient,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    pub fn with_model(api_key: String, model: String) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            api_key,
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

impl Embedder for GeminiEmbedder {
    fn generate_embedding(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = EmbedRequest {
            model: format!("models/{}", self.model),
            content: Content {
                parts: vec![Part { text }],
            },
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .context("embedding request failed to send")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("embedding request returned {status}: {body}");
        }

        let parsed: EmbedResponse = response
            .json()
            .context("failed to parse embedding response")?;
        if parsed.embedding.values.is_empty() {
            bail!("embedding response contained no values");
        }

        Ok(vector_to_bytes(&parsed.embedding.values))
    }
}

/// Whether an HTTP status is worth retrying. Rate limits, timeouts and
/// server-side errors are transient; everything else is a caller bug.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
