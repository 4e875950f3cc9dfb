// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-process `SessionStore` backed by an in-memory map. Used for tests
//! and for deployments with no shared backing store configured.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ChatError;
use crate::session::{
    LocalRateLimiter, Message, RateLimitDecision, RateLimiter, Session, SessionStore,
    SessionStoreConfig,
};

struct Entry {
    session: Session,
    messages: VecDeque<Message>,
}

pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    rate_limiter: Arc<LocalRateLimiter>,
    config: SessionStoreConfig,
}

impl MemorySessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        let rate_limiter =
            LocalRateLimiter::new(config.rate_limit_max, config.rate_limit_window_secs);
        Self { entries: RwLock::new(HashMap::new()), rate_limiter, config }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(SessionStoreConfig::default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Session, ChatError> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), self.config.session_ttl_secs, metadata);
        let mut entries = self.entries.write().await;
        entries.insert(id, Entry { session: session.clone(), messages: VecDeque::new() });
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, ChatError> {
        let entries = self.entries.read().await;
        Ok(entries.get(id).map(|e| e.session.clone()))
    }

    async fn update(&self, session: &Session) -> Result<(), ChatError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&session.id) {
            Some(entry) => {
                entry.session = session.clone();
                Ok(())
            }
            None => Err(ChatError::session_not_found("update", &session.id)),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), ChatError> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn add_message(&self, id: &str, msg: Message) -> Result<Message, ChatError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id).ok_or_else(|| ChatError::session_not_found("add_message", id))?;
        entry.messages.push_back(msg.clone());
        while entry.messages.len() > self.config.max_messages {
            entry.messages.pop_front();
        }
        entry.session.message_count += 1;
        entry.session.token_count += msg.tokens as u64;
        entry.session.updated_at = crate::session::now_ms();
        Ok(msg)
    }

    async fn get_messages(&self, id: &str, limit: i64) -> Result<Vec<Message>, ChatError> {
        let entries = self.entries.read().await;
        let entry = entries.get(id).ok_or_else(|| ChatError::session_not_found("get_messages", id))?;
        if limit <= 0 {
            return Ok(entry.messages.iter().cloned().collect());
        }
        let limit = limit as usize;
        let skip = entry.messages.len().saturating_sub(limit);
        Ok(entry.messages.iter().skip(skip).cloned().collect())
    }

    async fn check_rate_limit(&self, id: &str) -> Result<RateLimitDecision, ChatError> {
        Ok(self.rate_limiter.allow(id).await)
    }

    async fn active_session_count(&self) -> Result<u64, ChatError> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn sessions_by_metadata(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<Session>, ChatError> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| e.session.metadata.get(key) == Some(value))
            .map(|e| e.session.clone())
            .collect())
    }

    async fn sweep_expired(&self) -> Result<u64, ChatError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.session.is_expired());
        Ok((before - entries.len()) as u64)
    }

    async fn close(&self) -> Result<(), ChatError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemorySessionStore::default();
        let created = store.create(HashMap::new()).await.unwrap();
        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(created.id, fetched.id);
    }

    #[tokio::test]
    async fn message_window_caps_at_configured_max() {
        let config = SessionStoreConfig { max_messages: 3, ..SessionStoreConfig::default() };
        let store = MemorySessionStore::new(config);
        let session = store.create(HashMap::new()).await.unwrap();
        for i in 0..5 {
            let msg = Message::new(&session.id, crate::session::Role::User, format!("m{i}"), 1);
            store.add_message(&session.id, msg).await.unwrap();
        }
        let messages = store.get_messages(&session.id, -1).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "m2");
        assert_eq!(messages[2].content, "m4");

        let updated = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(updated.message_count, 5);
        assert_eq!(updated.token_count, 5);
    }

    #[tokio::test]
    async fn add_message_to_unknown_session_fails() {
        let store = MemorySessionStore::default();
        let msg = Message::new("ghost", crate::session::Role::User, "hi", 1);
        let err = store.add_message("ghost", msg).await.unwrap_err();
        assert_eq!(err.code, Some(crate::error::ErrorCode::SessionNotFound));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_sessions() {
        let store = MemorySessionStore::new(SessionStoreConfig {
            session_ttl_secs: -1,
            ..SessionStoreConfig::default()
        });
        store.create(HashMap::new()).await.unwrap();
        let swept = store.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(store.active_session_count().await.unwrap(), 0);
    }
}
