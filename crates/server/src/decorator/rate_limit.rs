// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate-limit decorator (§4.5): per-client sliding-window limiting in
//! front of any [`Transport`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};

use crate::error::ChatError;
use crate::session::RateLimiter;
use crate::transport::{CapabilitySet, ChatContext, Transport, TransportState};

const SESSION_HEADER: &str = "x-session-id";
const SESSION_COOKIE: &str = "session_id";
const SESSION_QUERY_PARAM: &str = "session_id";
const INFRA_RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";

#[derive(Clone)]
struct RateLimitState {
    limiter: Arc<dyn RateLimiter>,
    limit: u32,
    defer_to_infrastructure: bool,
}

pub(crate) fn extract_client_id(req: &Request) -> Option<String> {
    if let Some(header) = req.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(header.to_owned());
    }
    if let Some(cookie_header) = req.headers().get(axum::http::header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookie_header.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix(&format!("{SESSION_COOKIE}=")) {
                return Some(value.to_owned());
            }
        }
    }
    req.uri().query().and_then(|q| {
        url_query_value(q, SESSION_QUERY_PARAM)
    })
}

fn url_query_value(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next().unwrap_or("");
        if k == key {
            Some(v.to_owned())
        } else {
            None
        }
    })
}

async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    if state.defer_to_infrastructure && req.headers().contains_key(INFRA_RATE_LIMIT_HEADER) {
        tracing::debug!("rate limit deferred to infrastructure");
        return next.run(req).await;
    }

    let client_id = extract_client_id(&req).unwrap_or_else(|| "anonymous".to_owned());
    let decision = state.limiter.allow(&client_id).await;

    if !decision.allowed {
        let mut resp = (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
        insert_header(&mut resp, "Retry-After", &decision.reset_after_secs.to_string());
        insert_header(&mut resp, "X-RateLimit-Limit", &state.limit.to_string());
        return resp;
    }

    let mut resp = next.run(req).await;
    insert_header(&mut resp, "X-RateLimit-Limit", &state.limit.to_string());
    insert_header(&mut resp, "X-RateLimit-Remaining", &decision.remaining.to_string());
    resp
}

pub(crate) fn insert_header(resp: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = axum::http::HeaderValue::from_str(value) {
        resp.headers_mut().insert(name, value);
    }
}

pub struct RateLimitTransport {
    inner: Arc<dyn Transport>,
    limiter: Arc<dyn RateLimiter>,
    limit: u32,
    defer_to_infrastructure: bool,
}

impl RateLimitTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        limiter: Arc<dyn RateLimiter>,
        limit: u32,
        defer_to_infrastructure: bool,
    ) -> Self {
        Self { inner, limiter, limit, defer_to_infrastructure }
    }
}

#[async_trait]
impl Transport for RateLimitTransport {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn description(&self) -> &str {
        self.inner.description()
    }
    fn priority(&self) -> i32 {
        self.inner.priority()
    }
    fn capabilities(&self) -> CapabilitySet {
        self.inner.capabilities()
    }
    fn example(&self) -> &str {
        self.inner.example()
    }
    fn available(&self) -> bool {
        self.inner.available()
    }
    fn state(&self) -> TransportState {
        self.inner.state()
    }

    async fn initialize(&self, config: serde_json::Value) -> Result<(), ChatError> {
        self.inner.initialize(config).await
    }
    async fn start(&self) -> Result<(), ChatError> {
        self.inner.start().await
    }
    async fn stop(&self) -> Result<(), ChatError> {
        self.inner.stop().await
    }
    async fn health_check(&self) -> Result<(), ChatError> {
        self.inner.health_check().await
    }

    fn create_handler(&self, ctx: Arc<dyn ChatContext>) -> axum::Router {
        let state = RateLimitState {
            limiter: self.limiter.clone(),
            limit: self.limit,
            defer_to_infrastructure: self.defer_to_infrastructure,
        };
        self.inner.create_handler(ctx).layer(middleware::from_fn_with_state(state, rate_limit_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_value_extracts_matching_key() {
        assert_eq!(url_query_value("a=1&session_id=abc&b=2", "session_id").as_deref(), Some("abc"));
        assert_eq!(url_query_value("a=1", "session_id"), None);
    }
}
