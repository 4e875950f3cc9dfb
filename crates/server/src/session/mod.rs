// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed conversation session store: CRUD, message sliding window,
//! rate limiting, and TTL-based expiration.

pub mod memory;
pub mod rate_limit;
pub mod redis_store;
pub mod sweeper;

pub use rate_limit::{LocalRateLimiter, RateLimitDecision, RateLimiter, SlidingWindowRateLimiter};

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Prefix for all session-related backing-store keys.
pub const KEY_PREFIX: &str = "gomind:chat:session";

/// Key for a session hash: `gomind:chat:session:<id>`.
pub fn session_key(id: &str) -> String {
    format!("{KEY_PREFIX}:{id}")
}

/// Key for a session's message list: `gomind:chat:session:<id>:msgs`.
pub fn messages_key(id: &str) -> String {
    format!("{KEY_PREFIX}:{id}:msgs")
}

/// Key for a session's rate-limit counter: `gomind:chat:session:<id>:rate`.
pub fn rate_key(id: &str) -> String {
    format!("{KEY_PREFIX}:{id}:rate")
}

/// Key for the set of all known session identifiers.
pub const ACTIVE_SESSIONS_KEY: &str = "gomind:chat:sessions:active";

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Current time in epoch microseconds (used by the sliding-window limiter).
pub fn now_micros() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as i64
}

/// A message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A single message within a session's sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub tokens: u32,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    pub fn new(session_id: &str, role: Role, content: impl Into<String>, tokens: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role,
            content: content.into(),
            tokens,
            timestamp: now_ms(),
            metadata: None,
        }
    }
}

/// A conversation session shared across service instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
    pub token_count: u64,
    pub message_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, ttl_secs: i64, metadata: HashMap<String, serde_json::Value>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl_secs * 1000,
            token_count: 0,
            message_count: 0,
            metadata,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() > self.expires_at
    }

    /// `expires_at > updated_at` must hold for the lifetime of the session.
    pub fn invariant_holds(&self) -> bool {
        self.expires_at > self.updated_at
    }
}

/// Configuration governing store-wide retention and limiting behavior.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub session_ttl_secs: i64,
    pub max_messages: usize,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: i64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            max_messages: 50,
            rate_limit_max: 60,
            rate_limit_window_secs: 60,
            sweep_interval_secs: 60,
        }
    }
}

/// The distributed session store contract. Implementations back this with a
/// shared key-value store (hash + list + sorted-set + pipeline operations)
/// so state is visible across service instances.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(
        &self,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Session, ChatError>;

    /// Returns `Ok(None)` only when the session truly does not exist.
    /// Expired sessions are still returned (flagged via [`Session::is_expired`])
    /// so callers can decide whether to surface `SESSION_EXPIRED`.
    async fn get(&self, id: &str) -> Result<Option<Session>, ChatError>;

    async fn update(&self, session: &Session) -> Result<(), ChatError>;

    async fn delete(&self, id: &str) -> Result<(), ChatError>;

    async fn add_message(&self, id: &str, msg: Message) -> Result<Message, ChatError>;

    /// Returns up to `limit` most recent messages in insertion order.
    /// `limit <= 0` returns all retained messages.
    async fn get_messages(&self, id: &str, limit: i64) -> Result<Vec<Message>, ChatError>;

    async fn check_rate_limit(&self, id: &str) -> Result<RateLimitDecision, ChatError>;

    async fn active_session_count(&self) -> Result<u64, ChatError>;

    async fn sessions_by_metadata(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<Session>, ChatError>;

    /// Enumerate every active-set entry, deleting those past `expires_at`.
    /// Returns the number of sessions swept.
    async fn sweep_expired(&self) -> Result<u64, ChatError>;

    /// Release backing-store resources. Must be safe to call more than once.
    async fn close(&self) -> Result<(), ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_invariant_holds_on_creation() {
        let s = Session::new("abc", 60, HashMap::new());
        assert!(s.invariant_holds());
        assert_eq!(s.token_count, 0);
        assert_eq!(s.message_count, 0);
    }

    #[test]
    fn key_layout_matches_wire_contract() {
        assert_eq!(session_key("abc"), "gomind:chat:session:abc");
        assert_eq!(messages_key("abc"), "gomind:chat:session:abc:msgs");
        assert_eq!(rate_key("abc"), "gomind:chat:session:abc:rate");
    }
}
