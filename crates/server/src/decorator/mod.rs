// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decorator chain for fault tolerance and security (§4.4-§4.7).
//!
//! Composition order, outermost to innermost: smart → headers/CORS →
//! rate-limit → circuit-breaker → base transport. See [`compose`].

pub mod circuit_breaker;
pub mod rate_limit;
pub mod security;
pub mod smart_security;

use std::sync::Arc;

use crate::session::RateLimiter;
use crate::transport::Transport;

use circuit_breaker::CircuitBreaker;
use security::{CorsConfig, SecurityConfig};

/// Which decorators to apply and in what configuration. `None` skips that
/// layer entirely; `smart` takes precedence and subsumes rate-limit and
/// security/CORS when enabled (§4.7).
#[derive(Default)]
pub struct DecoratorChainConfig {
    pub circuit_breaker: Option<Arc<dyn CircuitBreaker>>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub rate_limit_max: u32,
    pub defer_rate_limit_to_infrastructure: bool,
    pub security: Option<SecurityConfig>,
    pub cors: Option<CorsConfig>,
    pub smart: bool,
}

/// Wraps `base` per the fixed composition order. Layers whose config is
/// absent are skipped transparently.
pub fn compose(base: Arc<dyn Transport>, config: DecoratorChainConfig) -> Arc<dyn Transport> {
    let mut transport = base;

    if let Some(breaker) = config.circuit_breaker {
        transport = Arc::new(circuit_breaker::CircuitBreakerTransport::new(transport, breaker));
    }

    if config.smart {
        transport = Arc::new(smart_security::SmartSecurityTransport::new(
            transport,
            config.rate_limiter,
            config.rate_limit_max,
            config.security.unwrap_or_default(),
            config.cors,
        ));
        return transport;
    }

    if let Some(limiter) = config.rate_limiter {
        transport = Arc::new(rate_limit::RateLimitTransport::new(
            transport,
            limiter,
            config.rate_limit_max,
            config.defer_rate_limit_to_infrastructure,
        ));
    }

    if let Some(mut security) = config.security {
        security.cors = config.cors;
        transport = Arc::new(security::SecurityTransport::new(transport, security));
    }

    transport
}
