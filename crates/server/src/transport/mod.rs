// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport contract, registry, selector, and bulk lifecycle manager.
//!
//! A transport maps one wire protocol (SSE, WebSocket, ...) onto the chat
//! orchestrator. Transports self-register at application composition time
//! and are driven entirely through the lifecycle methods on [`Transport`].

pub mod manager;
pub mod registry;
pub mod sse;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// A single transport capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Streaming,
    Bidirectional,
    Reconnect,
    Multiplex,
}

/// A compact bitset of [`Capability`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Self::Streaming => 1 << 0,
            Self::Bidirectional => 1 << 1,
            Self::Reconnect => 1 << 2,
            Self::Multiplex => 1 << 3,
        }
    }
}

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.0 |= cap.bit();
        self
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// `self` is a superset of `required` iff every bit set in `required`
    /// is also set in `self`.
    pub fn is_superset_of(&self, required: &CapabilitySet) -> bool {
        self.0 & required.0 == required.0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, cap| set.with(cap))
    }
}

/// Lifecycle state of a registered transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

/// Discovery metadata surfaced at `/chat/transports`.
#[derive(Debug, Clone, Serialize)]
pub struct TransportInfo {
    pub name: String,
    pub description: String,
    pub priority: i32,
    pub capabilities: Vec<Capability>,
    pub example: String,
}

/// The surface an orchestrator exposes to transport handlers, kept as a
/// trait object so the transport layer never depends on the orchestrator
/// crate module directly.
#[async_trait]
pub trait ChatContext: Send + Sync {
    async fn stream_response(
        &self,
        session_id: Option<String>,
        message: String,
    ) -> Result<tokio::sync::mpsc::Receiver<crate::orchestrator::events::ChatEvent>, ChatError>;
}

/// A pluggable wire-protocol front end.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str {
        ""
    }
    fn priority(&self) -> i32 {
        0
    }
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
    }
    fn example(&self) -> &str {
        ""
    }
    /// Whether the transport is presently usable (distinct from lifecycle
    /// state — e.g. a started transport may report unavailable during a
    /// dependency outage).
    fn available(&self) -> bool {
        true
    }
    fn state(&self) -> TransportState;

    async fn initialize(&self, config: serde_json::Value) -> Result<(), ChatError>;
    async fn start(&self) -> Result<(), ChatError>;
    async fn stop(&self) -> Result<(), ChatError>;
    async fn health_check(&self) -> Result<(), ChatError>;

    /// Builds the axum router mounted at `/chat/<name>`. Must be safe to
    /// call concurrently with in-flight requests once `Start` has returned.
    fn create_handler(&self, ctx: Arc<dyn ChatContext>) -> axum::Router;

    fn info(&self) -> TransportInfo {
        let caps = [
            Capability::Streaming,
            Capability::Bidirectional,
            Capability::Reconnect,
            Capability::Multiplex,
        ]
        .into_iter()
        .filter(|c| self.capabilities().contains(*c))
        .collect();
        TransportInfo {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            priority: self.priority(),
            capabilities: caps,
            example: self.example().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_superset_checks_all_required_bits() {
        let set = CapabilitySet::empty().with(Capability::Streaming).with(Capability::Reconnect);
        let required = CapabilitySet::empty().with(Capability::Streaming);
        assert!(set.is_superset_of(&required));

        let unmet = CapabilitySet::empty().with(Capability::Multiplex);
        assert!(!set.is_superset_of(&unmet));
    }
}
