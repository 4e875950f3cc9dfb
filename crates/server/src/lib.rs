// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core of a pluggable multi-transport chat-agent serving framework:
//! transport registry/lifecycle, distributed session store, a
//! fault-tolerance/security decorator chain, and the chat orchestrator
//! that wires them together.

pub mod backend;
pub mod config;
pub mod decorator;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::backend::{HttpBackend, RetryConfig};
use crate::config::ServerConfig;
use crate::decorator::circuit_breaker::StandardCircuitBreaker;
use crate::decorator::security::{CorsConfig, SecurityConfig};
use crate::orchestrator::{ChatOrchestrator, DecoratorOptions};
use crate::session::memory::MemorySessionStore;
use crate::session::redis_store::RedisSessionStore;
use crate::session::rate_limit::{LocalRateLimiter, SlidingWindowRateLimiter};
use crate::session::{RateLimiter, SessionStore};
use crate::transport::registry::Registry;
use crate::transport::sse::SseTransport;
use crate::transport::websocket::WebSocketTransport;

async fn build_session_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn SessionStore>> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisSessionStore::connect(url, config.session_store_config()).await?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemorySessionStore::new(config.session_store_config()))),
    }
}

async fn build_rate_limiter(config: &ServerConfig) -> anyhow::Result<Arc<dyn RateLimiter>> {
    match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let conn = redis::aio::ConnectionManager::new(client).await?;
            Ok(Arc::new(SlidingWindowRateLimiter::new(conn, config.rate_limit_max, config.rate_limit_window_secs)))
        }
        None => Ok(LocalRateLimiter::new(config.rate_limit_max, config.rate_limit_window_secs)),
    }
}

/// Builds and runs the service until the process receives a shutdown
/// signal, then performs graceful shutdown and returns.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let registry = Arc::new(Registry::new());
    registry.must_register(Arc::new(SseTransport::new(10)));
    registry.must_register(Arc::new(WebSocketTransport::new(5)));

    let store = build_session_store(&config).await?;
    let rate_limiter = build_rate_limiter(&config).await?;

    let backend = Arc::new(HttpBackend::new(config.backend_endpoint.clone(), RetryConfig::default())?);

    let circuit_breaker: Option<Arc<dyn crate::decorator::circuit_breaker::CircuitBreaker>> =
        if config.circuit_breaker_enabled {
            Some(StandardCircuitBreaker::new(
                config.circuit_failure_threshold,
                config.circuit_success_threshold,
                config.circuit_open_timeout(),
                config.circuit_max_half_open_probes,
            ))
        } else {
            None
        };

    let security = config.security_headers_enabled.then(SecurityConfig::default);
    let cors = (!config.cors_allowed_origins.is_empty()).then(|| CorsConfig {
        allowed_origins: config.cors_allowed_origins.clone(),
        allow_credentials: config.cors_allow_credentials,
        ..CorsConfig::default()
    });

    let decorators = DecoratorOptions {
        circuit_breaker,
        rate_limiter: Some(rate_limiter),
        defer_rate_limit_to_infrastructure: config.defer_rate_limit_to_infrastructure,
        security,
        cors,
        smart: config.smart_security_enabled,
    };

    let orchestrator = ChatOrchestrator::new(registry, store.clone(), backend, config.orchestrator_config(), decorators);
    orchestrator.initialize().await;
    let health_monitor = orchestrator.spawn_health_monitor();

    let shutdown = CancellationToken::new();
    let sweeper = session::sweeper::spawn_sweeper(store, config.sweep_interval_secs, shutdown.clone());

    let app = orchestrator.router().layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "chatmux listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    orchestrator.stop().await;
    health_monitor.abort();
    let _ = sweeper.await;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    shutdown.cancel();
}
