// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security-headers/CORS decorator (§4.6).

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};

use crate::error::ChatError;
use crate::transport::{CapabilitySet, ChatContext, Transport, TransportState};

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allow_credentials: false,
            allowed_methods: vec!["GET".into(), "POST".into(), "OPTIONS".into()],
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            max_age_secs: 3600,
        }
    }
}

/// `"*"` matches any origin; exact string match; `*.example.com` matches
/// `x.example.com` and `x.y.example.com` but NOT `example.com` itself.
pub fn origin_matches(allowed: &str, origin: &str) -> bool {
    if allowed == "*" {
        return true;
    }
    if allowed == origin {
        return true;
    }
    if let Some(suffix) = allowed.strip_prefix("*.") {
        return origin.ends_with(suffix) && origin.len() > suffix.len() && origin.as_bytes()[origin.len() - suffix.len() - 1] == b'.';
    }
    false
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub headers: Vec<(String, String)>,
    pub only_set_missing: bool,
    pub cors: Option<CorsConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            headers: vec![
                ("X-Content-Type-Options".into(), "nosniff".into()),
                ("X-Frame-Options".into(), "DENY".into()),
                ("X-XSS-Protection".into(), "0".into()),
                (
                    "Strict-Transport-Security".into(),
                    "max-age=31536000; includeSubDomains".into(),
                ),
                ("Referrer-Policy".into(), "strict-origin-when-cross-origin".into()),
            ],
            only_set_missing: true,
            cors: None,
        }
    }
}

fn infra_already_secured(resp: &Response) -> bool {
    resp.headers().contains_key("x-content-type-options") || resp.headers().contains_key("x-frame-options")
}

pub(crate) fn apply_security_headers(resp: &mut Response, config: &SecurityConfig) {
    if infra_already_secured(resp) {
        return;
    }
    for (name, value) in &config.headers {
        let exists = resp.headers().contains_key(name.as_str());
        if exists && config.only_set_missing {
            continue;
        }
        if let Ok(value) = HeaderValue::from_str(value) {
            if let Ok(name) = axum::http::HeaderName::from_bytes(name.as_bytes()) {
                resp.headers_mut().insert(name, value);
            }
        }
    }
}

pub(crate) fn apply_cors_headers(resp: &mut Response, cors: &CorsConfig, origin: &str) {
    if !cors.allowed_origins.iter().any(|allowed| origin_matches(allowed, origin)) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(origin) {
        resp.headers_mut().insert("Access-Control-Allow-Origin", value);
    }
    if cors.allow_credentials {
        resp.headers_mut().insert("Access-Control-Allow-Credentials", HeaderValue::from_static("true"));
    }
}

pub(crate) fn preflight_response(cors: &CorsConfig, origin: &str) -> Option<Response> {
    if !cors.allowed_origins.iter().any(|allowed| origin_matches(allowed, origin)) {
        return None;
    }
    let mut resp = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(origin) {
        resp.headers_mut().insert("Access-Control-Allow-Origin", value);
    }
    resp.headers_mut().insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_str(&cors.allowed_methods.join(", ")).unwrap_or(HeaderValue::from_static("")),
    );
    resp.headers_mut().insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_str(&cors.allowed_headers.join(", ")).unwrap_or(HeaderValue::from_static("")),
    );
    resp.headers_mut().insert(
        "Access-Control-Max-Age",
        HeaderValue::from_str(&cors.max_age_secs.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
    if cors.allow_credentials {
        resp.headers_mut().insert("Access-Control-Allow-Credentials", HeaderValue::from_static("true"));
    }
    Some(resp)
}

async fn security_middleware(State(config): State<Arc<SecurityConfig>>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if req.method() == Method::OPTIONS {
        if let (Some(cors), Some(origin)) = (&config.cors, origin.as_deref()) {
            if let Some(resp) = preflight_response(cors, origin) {
                return resp;
            }
        }
    }

    let mut resp = next.run(req).await;
    apply_security_headers(&mut resp, &config);
    if let (Some(cors), Some(origin)) = (&config.cors, origin.as_deref()) {
        apply_cors_headers(&mut resp, cors, origin);
    }
    resp
}

pub struct SecurityTransport {
    inner: Arc<dyn Transport>,
    config: Arc<SecurityConfig>,
}

impl SecurityTransport {
    pub fn new(inner: Arc<dyn Transport>, config: SecurityConfig) -> Self {
        Self { inner, config: Arc::new(config) }
    }
}

#[async_trait]
impl Transport for SecurityTransport {
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
        self.inner.create_handler(ctx).layer(middleware::from_fn_with_state(self.config.clone(), security_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_subdomain_matches_subdomains_not_bare_domain() {
        assert!(origin_matches("*.example.com", "x.example.com"));
        assert!(origin_matches("*.example.com", "x.y.example.com"));
        assert!(!origin_matches("*.example.com", "example.com"));
        assert!(!origin_matches("*.example.com", "evilexample.com"));
    }

    #[test]
    fn star_matches_any_origin() {
        assert!(origin_matches("*", "https://anything.test"));
    }

    #[test]
    fn exact_match_required_without_wildcard() {
        assert!(origin_matches("https://example.com", "https://example.com"));
        assert!(!origin_matches("https://example.com", "https://example.com.evil.test"));
    }
}
