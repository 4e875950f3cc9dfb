// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat orchestrator (§4.8): binds transports to sessions and the AI
//! backend, exposes discovery/health endpoints, streams responses, and
//! performs graceful shutdown.

pub mod events;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::Json;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, GenerateRequest};
use crate::decorator::circuit_breaker::CircuitBreaker;
use crate::decorator::security::{CorsConfig, SecurityConfig};
use crate::decorator::{compose, DecoratorChainConfig};
use crate::error::ChatError;
use crate::orchestrator::events::ChatEvent;
use crate::session::{Message, RateLimiter, Role, SessionStore};
use crate::transport::manager::{HEALTH_CHECK_TIMEOUT, STOP_TIMEOUT};
use crate::transport::registry::Registry;
use crate::transport::{ChatContext, Transport};

const HEALTH_MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_MONITOR_TIMEOUT: Duration = Duration::from_secs(5);
const PROMPT_WINDOW: i64 = 10;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub rate_limit_max: u32,
    pub max_message_size: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub transport_defaults: HashMap<String, serde_json::Value>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: 60,
            max_message_size: 8192,
            temperature: 0.7,
            max_tokens: 1024,
            transport_defaults: HashMap::new(),
        }
    }
}

/// Decorator dependencies injected at construction. Every field is
/// optional; an absent value means that layer is skipped for every
/// transport (§9 dependency injection over singletons).
#[derive(Default)]
pub struct DecoratorOptions {
    pub circuit_breaker: Option<Arc<dyn CircuitBreaker>>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub defer_rate_limit_to_infrastructure: bool,
    pub security: Option<SecurityConfig>,
    pub cors: Option<CorsConfig>,
    pub smart: bool,
}

pub struct ChatOrchestrator {
    registry: Arc<Registry>,
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn Backend>,
    config: OrchestratorConfig,
    decorators: DecoratorOptions,
    mounted: RwLock<HashMap<String, Arc<dyn Transport>>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl ChatOrchestrator {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn Backend>,
        config: OrchestratorConfig,
        decorators: DecoratorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            backend,
            config,
            decorators,
            mounted: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Iterates available transports, initializes, decorates, and starts
    /// each with a 5-second deadline. One transport's failure is logged
    /// and skipped; it never aborts the others.
    pub async fn initialize(&self) {
        for transport in self.registry.list_available() {
            let name = transport.name().to_owned();
            let config_json = self.config.transport_defaults.get(&name).cloned().unwrap_or(serde_json::json!({}));

            if let Err(e) = transport.initialize(config_json).await {
                tracing::warn!(transport = %name, err = %e, "transport auto-configuration failed, skipping");
                continue;
            }

            let decorated = compose(
                transport,
                DecoratorChainConfig {
                    circuit_breaker: self.decorators.circuit_breaker.clone(),
                    rate_limiter: self.decorators.rate_limiter.clone(),
                    rate_limit_max: self.config.rate_limit_max,
                    defer_rate_limit_to_infrastructure: self.decorators.defer_rate_limit_to_infrastructure,
                    security: self.decorators.security.clone(),
                    cors: self.decorators.cors.clone(),
                    smart: self.decorators.smart,
                },
            );

            match tokio::time::timeout(crate::transport::manager::START_TIMEOUT, decorated.start()).await {
                Ok(Ok(())) => {
                    self.mounted.write().unwrap_or_else(|e| e.into_inner()).insert(name.clone(), decorated);
                    tracing::info!(transport = %name, "chat_{} registered at /chat/{}", name, name);
                }
                Ok(Err(e)) => tracing::warn!(transport = %name, err = %e, "transport start failed, skipping"),
                Err(_) => tracing::warn!(transport = %name, "transport start timed out, skipping"),
            }
        }
    }

    /// Builds the mux router: fixed discovery/health endpoints plus one
    /// nested router per successfully-started transport.
    pub fn router(self: &Arc<Self>) -> axum::Router {
        let mut router = axum::Router::new()
            .route("/chat/transports", get(transports_handler))
            .route("/chat/health", get(health_handler))
            .with_state(self.clone());

        let handlers: Vec<(String, axum::Router)> = {
            let guard = self.mounted.read().unwrap_or_else(|e| e.into_inner());
            let ctx: Arc<dyn ChatContext> = self.clone();
            guard.iter().map(|(name, t)| (name.clone(), t.create_handler(ctx.clone()))).collect()
        };
        for (name, handler) in handlers {
            router = router.nest(&format!("/chat/{name}"), handler);
        }
        router
    }

    /// Graceful shutdown (§4.8): idempotent, cancels background workers,
    /// stops every transport in parallel with a 10-second deadline, then
    /// closes the session store.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let transports: Vec<Arc<dyn Transport>> =
            self.mounted.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect();
        let stops = transports.into_iter().map(|t| async move {
            let name = t.name().to_owned();
            match tokio::time::timeout(STOP_TIMEOUT, t.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(transport = %name, err = %e, "transport stop failed"),
                Err(_) => tracing::warn!(transport = %name, "transport stop deadline exceeded, forcing shutdown"),
            }
        });
        futures_util::future::join_all(stops).await;

        if let Err(e) = self.store.close().await {
            tracing::warn!(err = %e, "session store close failed");
        }
    }

    /// Ticks every 30 seconds; failures are logged, never mutate state.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(HEALTH_MONITOR_INTERVAL);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = orchestrator.shutdown.cancelled() => break,
                    _ = timer.tick() => {
                        let transports: Vec<Arc<dyn Transport>> = orchestrator
                            .mounted
                            .read()
                            .unwrap_or_else(|e| e.into_inner())
                            .values()
                            .cloned()
                            .collect();
                        for t in transports {
                            match tokio::time::timeout(HEALTH_MONITOR_TIMEOUT, t.health_check()).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => tracing::warn!(transport = t.name(), err = %e, "health check failed"),
                                Err(_) => tracing::warn!(transport = t.name(), "health check timed out"),
                            }
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ChatContext for ChatOrchestrator {
    async fn stream_response(
        &self,
        session_id: Option<String>,
        message: String,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
        if message.len() > self.config.max_message_size {
            return Err(ChatError::message_too_large("stream_response", message.len(), self.config.max_message_size));
        }

        let session = match session_id {
            Some(id) => match self.store.get(&id).await? {
                Some(s) => s,
                None => self.store.create(HashMap::new()).await?,
            },
            None => self.store.create(HashMap::new()).await?,
        };
        let session_id = session.id;

        let estimated_tokens = (message.len() / 4) as u32;
        let user_msg = Message::new(&session_id, Role::User, message, estimated_tokens);
        self.store.add_message(&session_id, user_msg).await?;

        let (tx, rx) = mpsc::channel(16);
        let store = self.store.clone();
        let backend = self.backend.clone();
        let temperature = self.config.temperature;
        let max_tokens = self.config.max_tokens;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let session_id_for_worker = session_id.clone();
            let worker = async move {
                let history = store.get_messages(&session_id_for_worker, PROMPT_WINDOW).await?;
                let mut prompt = String::new();
                for m in &history {
                    let prefix = match m.role {
                        Role::User => "User",
                        Role::Assistant => "Assistant",
                        Role::System => "System",
                    };
                    prompt.push_str(prefix);
                    prompt.push_str(": ");
                    prompt.push_str(&m.content);
                    prompt.push('\n');
                }

                let response = backend.generate(GenerateRequest { prompt, temperature, max_tokens }).await?;
                let assistant_msg =
                    Message::new(&session_id_for_worker, Role::Assistant, response.content.clone(), response.tokens);
                store.add_message(&session_id_for_worker, assistant_msg).await?;
                Ok::<String, ChatError>(response.content)
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = tx.send(ChatEvent::error("stream cancelled by shutdown")).await;
                }
                result = worker => {
                    match result {
                        Ok(content) => {
                            let _ = tx.send(ChatEvent::message(content)).await;
                            let _ = tx.send(ChatEvent::done()).await;
                        }
                        Err(e) => {
                            let _ = tx.send(ChatEvent::error(e.to_string())).await;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Serialize)]
struct TransportEntry {
    name: String,
    endpoint: String,
    priority: i32,
    description: String,
    example: String,
    capabilities: Vec<crate::transport::Capability>,
}

#[derive(Serialize)]
struct ConfigSummary {
    rate_limit: u32,
    max_message_size: usize,
}

#[derive(Serialize)]
struct TransportsResponse {
    transports: Vec<TransportEntry>,
    config: ConfigSummary,
}

async fn transports_handler(State(orchestrator): State<Arc<ChatOrchestrator>>) -> Json<TransportsResponse> {
    let transports: Vec<TransportEntry> = {
        let guard = orchestrator.mounted.read().unwrap_or_else(|e| e.into_inner());
        guard
            .values()
            .map(|t| {
                let info = t.info();
                TransportEntry {
                    endpoint: format!("/chat/{}", info.name),
                    name: info.name,
                    priority: info.priority,
                    description: info.description,
                    example: info.example,
                    capabilities: info.capabilities,
                }
            })
            .collect()
    };
    Json(TransportsResponse {
        transports,
        config: ConfigSummary {
            rate_limit: orchestrator.config.rate_limit_max,
            max_message_size: orchestrator.config.max_message_size,
        },
    })
}

#[derive(Serialize)]
struct TransportHealth {
    available: bool,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    transports: HashMap<String, TransportHealth>,
}

async fn health_handler(State(orchestrator): State<Arc<ChatOrchestrator>>) -> Json<HealthResponse> {
    let snapshot: Vec<(String, Arc<dyn Transport>)> = {
        let guard = orchestrator.mounted.read().unwrap_or_else(|e| e.into_inner());
        guard.iter().map(|(name, t)| (name.clone(), t.clone())).collect()
    };

    let mut transports = HashMap::new();
    for (name, transport) in snapshot {
        let available = transport.available();
        let entry = match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, transport.health_check()).await {
            Ok(Ok(())) => TransportHealth { available, healthy: true, error: None },
            Ok(Err(e)) => TransportHealth { available, healthy: false, error: Some(e.to_string()) },
            Err(_) => TransportHealth { available, healthy: false, error: Some("health check timed out".to_owned()) },
        };
        transports.insert(name, entry);
    }

    Json(HealthResponse { status: "healthy", transports })
}
