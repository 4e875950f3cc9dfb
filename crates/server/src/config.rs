// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application configuration: command-line flags with environment
//! variable fallbacks, following the same `clap::Parser` convention used
//! throughout this codebase.

use std::time::Duration;

use clap::Parser;

use crate::orchestrator::OrchestratorConfig;
use crate::session::SessionStoreConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "chatmux", about = "Chat-agent serving framework core")]
pub struct ServerConfig {
    #[arg(long, default_value = "0.0.0.0:8080", env = "CHATMUX_BIND_ADDR")]
    pub bind_addr: String,

    /// Backing-store URL for the distributed session store and rate
    /// limiter. When unset, an in-memory store is used instead.
    #[arg(long, env = "CHATMUX_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, default_value_t = 3600, env = "CHATMUX_SESSION_TTL_SECS")]
    pub session_ttl_secs: i64,

    #[arg(long, default_value_t = 50, env = "CHATMUX_MAX_MESSAGES")]
    pub max_messages: usize,

    #[arg(long, default_value_t = 60, env = "CHATMUX_RATE_LIMIT_MAX")]
    pub rate_limit_max: u32,

    #[arg(long, default_value_t = 60, env = "CHATMUX_RATE_LIMIT_WINDOW_SECS")]
    pub rate_limit_window_secs: i64,

    #[arg(long, default_value_t = 60, env = "CHATMUX_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    #[arg(long, default_value_t = 8192, env = "CHATMUX_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,

    #[arg(long, default_value = "http://127.0.0.1:9000/generate", env = "CHATMUX_BACKEND_ENDPOINT")]
    pub backend_endpoint: String,

    #[arg(long, default_value_t = 0.7, env = "CHATMUX_BACKEND_TEMPERATURE")]
    pub backend_temperature: f32,

    #[arg(long, default_value_t = 1024, env = "CHATMUX_BACKEND_MAX_TOKENS")]
    pub backend_max_tokens: u32,

    #[arg(long, default_value_t = false, env = "CHATMUX_CIRCUIT_BREAKER_ENABLED")]
    pub circuit_breaker_enabled: bool,

    #[arg(long, default_value_t = 5, env = "CHATMUX_CIRCUIT_FAILURE_THRESHOLD")]
    pub circuit_failure_threshold: u32,

    #[arg(long, default_value_t = 2, env = "CHATMUX_CIRCUIT_SUCCESS_THRESHOLD")]
    pub circuit_success_threshold: u32,

    #[arg(long, default_value_t = 30_000, env = "CHATMUX_CIRCUIT_OPEN_TIMEOUT_MS")]
    pub circuit_open_timeout_ms: u64,

    #[arg(long, default_value_t = 1, env = "CHATMUX_CIRCUIT_MAX_HALF_OPEN_PROBES")]
    pub circuit_max_half_open_probes: u32,

    #[arg(long, default_value_t = true, env = "CHATMUX_SECURITY_HEADERS_ENABLED")]
    pub security_headers_enabled: bool,

    /// Comma-separated list of allowed CORS origins; empty disables CORS.
    #[arg(long, value_delimiter = ',', env = "CHATMUX_CORS_ALLOWED_ORIGINS")]
    pub cors_allowed_origins: Vec<String>,

    #[arg(long, default_value_t = false, env = "CHATMUX_CORS_ALLOW_CREDENTIALS")]
    pub cors_allow_credentials: bool,

    #[arg(long, default_value_t = true, env = "CHATMUX_SMART_SECURITY_ENABLED")]
    pub smart_security_enabled: bool,

    #[arg(long, default_value_t = false, env = "CHATMUX_DEFER_RATE_LIMIT_TO_INFRA")]
    pub defer_rate_limit_to_infrastructure: bool,
}

impl ServerConfig {
    pub fn session_store_config(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            session_ttl_secs: self.session_ttl_secs,
            max_messages: self.max_messages,
            rate_limit_max: self.rate_limit_max,
            rate_limit_window_secs: self.rate_limit_window_secs,
            sweep_interval_secs: self.sweep_interval_secs,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            rate_limit_max: self.rate_limit_max,
            max_message_size: self.max_message_size,
            temperature: self.backend_temperature,
            max_tokens: self.backend_max_tokens,
            transport_defaults: std::collections::HashMap::new(),
        }
    }

    pub fn circuit_open_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_open_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_session_store_config_from_flags() {
        let config = ServerConfig::parse_from(["chatmux", "--session-ttl-secs", "120", "--max-messages", "10"]);
        let store_config = config.session_store_config();
        assert_eq!(store_config.session_ttl_secs, 120);
        assert_eq!(store_config.max_messages, 10);
    }
}
