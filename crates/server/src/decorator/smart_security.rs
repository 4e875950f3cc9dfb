// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Smart-security decorator (§4.7): detects infrastructure-provided
//! security and selectively elides redundant decorators.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};

use crate::decorator::rate_limit::{extract_client_id, insert_header};
use crate::decorator::security::{apply_cors_headers, apply_security_headers, preflight_response, CorsConfig, SecurityConfig};
use crate::error::ChatError;
use crate::session::RateLimiter;
use crate::transport::{CapabilitySet, ChatContext, Transport, TransportState};

const GATEWAY_ENV_VARS: &[&str] = &[
    "API_GATEWAY_ENABLED",
    "KONG_PROXY",
    "AWS_API_GATEWAY_ID",
    "AZURE_API_MANAGEMENT",
    "GCP_API_GATEWAY",
    "ISTIO_PROXY",
    "ENVOY_PROXY",
    "NGINX_INGRESS",
    "TRAEFIK_ENABLED",
];

const GATEWAY_HEADERS: &[&str] = &[
    "x-amzn-trace-id",
    "x-kong-proxy",
    "x-azure-ref",
    "x-envoy-external-address",
    "x-b3-traceid",
    "l5d-ctx-trace",
];

fn env_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => !v.is_empty() && v != "false" && v != "0",
        Err(_) => false,
    }
}

pub fn gateway_detected(req: &Request) -> bool {
    GATEWAY_ENV_VARS.iter().any(|v| env_truthy(v)) || GATEWAY_HEADERS.iter().any(|h| req.headers().contains_key(*h))
}

fn rate_limit_covered(req: &Request) -> bool {
    env_truthy("RATE_LIMITING_ENABLED") || req.headers().contains_key("x-ratelimit-limit")
}

fn cors_covered() -> bool {
    env_truthy("CORS_ENABLED")
}

#[derive(Clone)]
struct SmartState {
    limiter: Option<Arc<dyn RateLimiter>>,
    rate_limit_max: u32,
    security: Arc<SecurityConfig>,
    cors: Option<CorsConfig>,
}

async fn smart_middleware(State(state): State<SmartState>, req: Request, next: Next) -> Response {
    if gateway_detected(&req) {
        tracing::debug!("infrastructure gateway detected, bypassing all security decorators");
        return next.run(req).await;
    }

    let origin = req
        .headers()
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let rl_covered = rate_limit_covered(&req);
    let cors_skip = cors_covered();

    if req.method() == Method::OPTIONS && !cors_skip {
        if let (Some(cors), Some(origin)) = (&state.cors, origin.as_deref()) {
            if let Some(resp) = preflight_response(cors, origin) {
                return resp;
            }
        }
    }

    if !rl_covered {
        if let Some(limiter) = &state.limiter {
            let client_id = extract_client_id(&req).unwrap_or_else(|| "anonymous".to_owned());
            let decision = limiter.allow(&client_id).await;
            if !decision.allowed {
                let mut resp = (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
                insert_header(&mut resp, "Retry-After", &decision.reset_after_secs.to_string());
                insert_header(&mut resp, "X-RateLimit-Limit", &state.rate_limit_max.to_string());
                return resp;
            }
        }
    }

    let mut resp = next.run(req).await;

    if !rl_covered && state.limiter.is_some() {
        insert_header(&mut resp, "X-RateLimit-Limit", &state.rate_limit_max.to_string());
    }
    if !cors_skip {
        apply_security_headers(&mut resp, &state.security);
        if let (Some(cors), Some(origin)) = (&state.cors, origin.as_deref()) {
            apply_cors_headers(&mut resp, cors, origin);
        }
    }
    resp
}

/// Auto-selects among the circuit-breaker-independent decorators based on
/// runtime infrastructure detection, instead of applying each unconditionally.
pub struct SmartSecurityTransport {
    inner: Arc<dyn Transport>,
    limiter: Option<Arc<dyn RateLimiter>>,
    rate_limit_max: u32,
    security: SecurityConfig,
    cors: Option<CorsConfig>,
}

impl SmartSecurityTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        limiter: Option<Arc<dyn RateLimiter>>,
        rate_limit_max: u32,
        security: SecurityConfig,
        cors: Option<CorsConfig>,
    ) -> Self {
        Self { inner, limiter, rate_limit_max, security, cors }
    }
}

#[async_trait]
impl Transport for SmartSecurityTransport {
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
        let state = SmartState {
            limiter: self.limiter.clone(),
            rate_limit_max: self.rate_limit_max,
            security: Arc::new(self.security.clone()),
            cors: self.cors.clone(),
        };
        self.inner.create_handler(ctx).layer(middleware::from_fn_with_state(state, smart_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_truthy_rejects_false_and_zero() {
        std::env::set_var("CHATMUX_TEST_FLAG", "false");
        assert!(!env_truthy("CHATMUX_TEST_FLAG"));
        std::env::set_var("CHATMUX_TEST_FLAG", "0");
        assert!(!env_truthy("CHATMUX_TEST_FLAG"));
        std::env::set_var("CHATMUX_TEST_FLAG", "1");
        assert!(env_truthy("CHATMUX_TEST_FLAG"));
        std::env::remove_var("CHATMUX_TEST_FLAG");
        assert!(!env_truthy("CHATMUX_TEST_FLAG"));
    }
}
