// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bulk lifecycle helper layered on top of the [`Registry`].

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ChatError;
use crate::transport::registry::Registry;

/// Per-operation deadlines (§5 of the design).
pub const START_TIMEOUT: Duration = Duration::from_secs(5);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Manager<'a> {
    registry: &'a Registry,
}

impl<'a> Manager<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub async fn initialize(&self, name: &str, config: serde_json::Value) -> Result<(), ChatError> {
        let transport = self
            .registry
            .get(name)
            .ok_or_else(|| ChatError::transport("initialize", format!("unknown transport: {name}")))?;
        transport.initialize(config).await
    }

    pub async fn start(&self, name: &str) -> Result<(), ChatError> {
        let transport = self
            .registry
            .get(name)
            .ok_or_else(|| ChatError::transport("start", format!("unknown transport: {name}")))?;
        tokio::time::timeout(START_TIMEOUT, transport.start())
            .await
            .map_err(|_| ChatError::transport("start", format!("{name} start timed out")))?
    }

    pub async fn stop(&self, name: &str) -> Result<(), ChatError> {
        let transport = self
            .registry
            .get(name)
            .ok_or_else(|| ChatError::transport("stop", format!("unknown transport: {name}")))?;
        tokio::time::timeout(STOP_TIMEOUT, transport.stop())
            .await
            .map_err(|_| ChatError::transport("stop", format!("{name} stop timed out")))?
    }

    pub async fn health_check(&self, name: &str) -> Result<(), ChatError> {
        let transport = self
            .registry
            .get(name)
            .ok_or_else(|| ChatError::transport("health_check", format!("unknown transport: {name}")))?;
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, transport.health_check())
            .await
            .map_err(|_| ChatError::transport("health_check", format!("{name} health check timed out")))?
    }

    /// Initializes any transport not yet configured with `defaults[name]`
    /// (or `{}` if absent), then starts every registered transport.
    /// A single transport's failure is logged and does not prevent the
    /// rest from starting.
    pub async fn start_all(&self, defaults: &HashMap<String, serde_json::Value>) {
        for transport in self.registry.list() {
            let name = transport.name().to_owned();
            if transport.state() == crate::transport::TransportState::Uninitialized {
                let config = defaults.get(&name).cloned().unwrap_or(serde_json::json!({}));
                if let Err(e) = self.initialize(&name, config).await {
                    tracing::warn!(transport = %name, err = %e, "transport initialization failed, skipping");
                    continue;
                }
            }
            if let Err(e) = self.start(&name).await {
                tracing::warn!(transport = %name, err = %e, "transport start failed, skipping");
            }
        }
    }

    /// Stops every registered transport in sequence, returning the first
    /// error encountered but continuing to stop the rest.
    pub async fn stop_all(&self) -> Result<(), ChatError> {
        let mut first_err = None;
        for transport in self.registry.list() {
            if let Err(e) = self.stop(transport.name()).await {
                tracing::warn!(transport = transport.name(), err = %e, "transport stop failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
