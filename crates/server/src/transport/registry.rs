// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-safe transport registry: register/unregister, stable listing,
//! and capability-aware selection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::error::ChatError;
use crate::transport::{CapabilitySet, Transport};

/// Emitted on registry mutation; subscribers receive these asynchronously.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Registered(String),
    Unregistered(String),
}

pub struct Registry {
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self { transports: RwLock::new(HashMap::new()), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Rejects an empty or already-registered name.
    pub fn register(&self, transport: Arc<dyn Transport>) -> Result<(), ChatError> {
        let name = transport.name().to_owned();
        if name.is_empty() {
            return Err(ChatError::configuration("register", "transport name must not be empty"));
        }
        let mut transports = self
            .transports
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if transports.contains_key(&name) {
            return Err(ChatError::configuration(
                "register",
                format!("transport already registered: {name}"),
            ));
        }
        transports.insert(name.clone(), transport);
        drop(transports);
        let _ = self.events.send(LifecycleEvent::Registered(name));
        Ok(())
    }

    /// Registers or aborts the process. Intended for use at application
    /// composition time, where a duplicate or malformed transport is a
    /// programming error rather than a runtime condition to recover from.
    pub fn must_register(&self, transport: Arc<dyn Transport>) {
        if let Err(e) = self.register(transport) {
            panic!("unrecoverable transport registration failure: {e}");
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .transports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some();
        if removed {
            let _ = self.events.send(LifecycleEvent::Unregistered(name.to_owned()));
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    /// Stable snapshot: priority descending, then name ascending.
    pub fn list(&self) -> Vec<Arc<dyn Transport>> {
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());
        let mut items: Vec<Arc<dyn Transport>> = transports.values().cloned().collect();
        items.sort_by(|a, b| b.priority().cmp(&a.priority()).then_with(|| a.name().cmp(b.name())));
        items
    }

    pub fn list_available(&self) -> Vec<Arc<dyn Transport>> {
        self.list().into_iter().filter(|t| t.available()).collect()
    }

    /// First available transport in priority order.
    pub fn select_best(&self) -> Option<Arc<dyn Transport>> {
        self.list_available().into_iter().next()
    }

    /// First available transport whose capability set is a superset of
    /// `required`.
    pub fn select_with_capabilities(
        &self,
        required: CapabilitySet,
    ) -> Result<Arc<dyn Transport>, ChatError> {
        self.list_available()
            .into_iter()
            .find(|t| t.capabilities().is_superset_of(&required))
            .ok_or_else(|| {
                ChatError::transport("select_with_capabilities", "no transport satisfies required capabilities")
                    .with_code(crate::error::ErrorCode::TransportNotFound)
            })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::{Capability, ChatContext, TransportState};
    use async_trait::async_trait;

    struct Stub {
        name: &'static str,
        priority: i32,
        caps: CapabilitySet,
    }

    #[async_trait]
    impl Transport for Stub {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn capabilities(&self) -> CapabilitySet {
            self.caps
        }
        fn state(&self) -> TransportState {
            TransportState::Started
        }
        async fn initialize(&self, _config: serde_json::Value) -> Result<(), ChatError> {
            Ok(())
        }
        async fn start(&self) -> Result<(), ChatError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), ChatError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), ChatError> {
            Ok(())
        }
        fn create_handler(&self, _ctx: Arc<dyn ChatContext>) -> axum::Router {
            axum::Router::new()
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let registry = Registry::new();
        registry
            .register(Arc::new(Stub { name: "sse", priority: 0, caps: CapabilitySet::empty() }))
            .unwrap();
        let err = registry
            .register(Arc::new(Stub { name: "sse", priority: 0, caps: CapabilitySet::empty() }))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn list_orders_by_priority_desc_then_name_asc() {
        let registry = Registry::new();
        registry
            .register(Arc::new(Stub { name: "b", priority: 5, caps: CapabilitySet::empty() }))
            .unwrap();
        registry
            .register(Arc::new(Stub { name: "a", priority: 5, caps: CapabilitySet::empty() }))
            .unwrap();
        registry
            .register(Arc::new(Stub { name: "c", priority: 10, caps: CapabilitySet::empty() }))
            .unwrap();

        let names: Vec<&str> = registry.list().iter().map(|t| t.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn select_with_capabilities_fails_when_none_qualify() {
        let registry = Registry::new();
        registry
            .register(Arc::new(Stub { name: "sse", priority: 0, caps: CapabilitySet::empty() }))
            .unwrap();
        let err = registry
            .select_with_capabilities(CapabilitySet::empty().with(Capability::Bidirectional))
            .unwrap_err();
        assert_eq!(err.code, Some(crate::error::ErrorCode::TransportNotFound));
    }
}
