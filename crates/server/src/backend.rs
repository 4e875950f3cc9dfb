// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AI generation backend: an opaque `GenerateResponse` collaborator with a
//! retrying HTTP client implementation (§5, §7 retry policy).

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub tokens: u32,
}

/// The AI generation backend, treated as an opaque collaborator outside
/// this crate's core.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ChatError>;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(5) }
    }
}

#[derive(Serialize)]
struct HttpGenerateRequest<'a> {
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct HttpGenerateResponse {
    content: String,
    #[serde(default)]
    tokens: u32,
}

/// HTTP-backed AI generation client. Retries 429/5xx and network errors
/// with exponential backoff and jitter; honors the retry policy only here
/// — transport and session operations never retry internally (§7).
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, retry: RetryConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChatError::configuration("backend_client_build", e.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into(), retry })
    }

    async fn generate_once(&self, req: &GenerateRequest) -> Result<GenerateResponse, ChatError> {
        let body = HttpGenerateRequest { prompt: &req.prompt, temperature: req.temperature, max_tokens: req.max_tokens };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::transport("generate", e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let parsed: HttpGenerateResponse =
                resp.json().await.map_err(|e| ChatError::internal("generate", e.to_string()))?;
            return Ok(GenerateResponse { content: parsed.content, tokens: parsed.tokens });
        }

        let retryable = status.as_u16() == 429 || status.is_server_error();
        let message = format!("backend returned {status}");
        let mut err = ChatError::transport("generate", message);
        if retryable {
            err = err.with_code(crate::error::ErrorCode::RateLimited);
        }
        Err(err)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.retry.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let capped = exp.min(self.retry.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=(capped.as_millis() as u64 / 4).max(1));
        capped + Duration::from_millis(jitter_ms)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ChatError> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match self.generate_once(&req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, err = %e, "backend call failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ChatError::internal("generate", "exhausted retries with no recorded error")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_capped_at_max_delay_plus_jitter() {
        let backend = HttpBackend {
            client: reqwest::Client::new(),
            endpoint: "http://example.invalid".into(),
            retry: RetryConfig { max_attempts: 5, base_delay: Duration::from_millis(100), max_delay: Duration::from_millis(300) },
        };
        for attempt in 0..10 {
            let delay = backend.backoff_delay(attempt);
            assert!(delay <= Duration::from_millis(300) + Duration::from_millis(75));
        }
    }
}
