// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit-breaker decorator (§4.4): wraps any [`Transport`], fast-failing
//! while open and classifying 5xx responses as breaker failures.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::ChatError;
use crate::transport::{CapabilitySet, ChatContext, Transport, TransportState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Injected breaker contract. The decorator holds no state of its own; the
/// concrete implementation owns all concurrency control.
pub trait CircuitBreaker: Send + Sync {
    fn can_execute(&self) -> bool;
    fn record_success(&self);
    fn record_failure(&self);
    fn state(&self) -> CircuitState;
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_probes_issued: u32,
}

/// Standard closed → open → half-open → closed state machine.
pub struct StandardCircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    max_half_open_probes: u32,
}

impl StandardCircuitBreaker {
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        open_timeout: Duration,
        max_half_open_probes: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_probes_issued: 0,
            }),
            failure_threshold,
            success_threshold,
            open_timeout,
            max_half_open_probes,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CircuitBreaker for StandardCircuitBreaker {
    fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.half_open_probes_issued = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes_issued < self.max_half_open_probes {
                    inner.half_open_probes_issued += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.half_open_probes_issued = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.half_open_probes_issued = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn state(&self) -> CircuitState {
        self.lock().state
    }
}

#[derive(Serialize)]
struct OpenBody {
    error: &'static str,
    message: String,
    state: &'static str,
    retry: bool,
}

fn open_response(state: CircuitState) -> Response {
    let body = OpenBody {
        error: "circuit_open",
        message: "circuit breaker is open".to_owned(),
        state: state.as_str(),
        retry: true,
    };
    let mut resp = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    resp.headers_mut().insert("X-Circuit-Breaker", axum::http::HeaderValue::from_static("open"));
    if let Ok(value) = axum::http::HeaderValue::from_str(state.as_str()) {
        resp.headers_mut().insert("X-Circuit-State", value);
    }
    resp
}

async fn breaker_middleware(
    State(breaker): State<Arc<dyn CircuitBreaker>>,
    req: Request,
    next: Next,
) -> Response {
    if !breaker.can_execute() {
        return open_response(breaker.state());
    }
    let response = next.run(req).await;
    if response.status().is_server_error() {
        breaker.record_failure();
    } else {
        breaker.record_success();
    }
    response
}

/// Wraps a [`Transport`], delegating all methods with breaker protection.
pub struct CircuitBreakerTransport {
    inner: Arc<dyn Transport>,
    breaker: Arc<dyn CircuitBreaker>,
}

impl CircuitBreakerTransport {
    pub fn new(inner: Arc<dyn Transport>, breaker: Arc<dyn CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl Transport for CircuitBreakerTransport {
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
        self.inner.available() && self.breaker.can_execute()
    }
    fn state(&self) -> TransportState {
        self.inner.state()
    }

    async fn initialize(&self, config: serde_json::Value) -> Result<(), ChatError> {
        self.inner.initialize(config).await
    }

    async fn start(&self) -> Result<(), ChatError> {
        if !self.breaker.can_execute() {
            return Err(ChatError::transport("start", "circuit breaker open"));
        }
        match self.inner.start().await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    /// Always bypasses the breaker: stopping must not be blocked by open state.
    async fn stop(&self) -> Result<(), ChatError> {
        self.inner.stop().await
    }

    async fn health_check(&self) -> Result<(), ChatError> {
        if !self.breaker.can_execute() {
            return Err(ChatError::transport("health_check", "circuit breaker open"));
        }
        match self.inner.health_check().await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    fn create_handler(&self, ctx: Arc<dyn ChatContext>) -> axum::Router {
        self.inner
            .create_handler(ctx)
            .layer(middleware::from_fn_with_state(self.breaker.clone(), breaker_middleware))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = StandardCircuitBreaker::new(3, 1, Duration::from_millis(50), 1);
        assert!(breaker.can_execute());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_closes_on_success_reopens_on_failure() {
        let breaker = StandardCircuitBreaker::new(1, 1, Duration::from_millis(10), 2);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_reopens_on_any_failure() {
        let breaker = StandardCircuitBreaker::new(1, 2, Duration::from_millis(10), 2);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
