// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed distributed `SessionStore`. Session fields live in a hash,
//! messages in a capped list, and the active-session index in a set, so
//! every service instance observes the same conversation state.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::ChatError;
use crate::session::{
    messages_key, session_key, Message, RateLimitDecision, RateLimiter, Session, SessionStore,
    SessionStoreConfig, SlidingWindowRateLimiter, ACTIVE_SESSIONS_KEY,
};

pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
    rate_limiter: SlidingWindowRateLimiter,
    config: SessionStoreConfig,
}

impl RedisSessionStore {
    pub async fn connect(url: &str, config: SessionStoreConfig) -> Result<Self, ChatError> {
        let client = redis::Client::open(url)
            .map_err(|e| ChatError::configuration("redis_connect", e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| ChatError::transport("redis_connect", e.to_string()))?;
        let rate_limiter = SlidingWindowRateLimiter::new(
            conn.clone(),
            config.rate_limit_max,
            config.rate_limit_window_secs,
        );
        Ok(Self { conn, rate_limiter, config })
    }

    fn conn(&self) -> redis::aio::ConnectionManager {
        self.conn.clone()
    }
}

fn encode_session(session: &Session) -> Result<String, ChatError> {
    serde_json::to_string(session).map_err(|e| ChatError::internal("session_encode", e.to_string()))
}

fn decode_session(raw: &str) -> Result<Session, ChatError> {
    serde_json::from_str(raw).map_err(|e| ChatError::internal("session_decode", e.to_string()))
}

fn encode_message(msg: &Message) -> Result<String, ChatError> {
    serde_json::to_string(msg).map_err(|e| ChatError::internal("message_encode", e.to_string()))
}

fn decode_message(raw: &str) -> Result<Message, ChatError> {
    serde_json::from_str(raw).map_err(|e| ChatError::internal("message_decode", e.to_string()))
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Session, ChatError> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), self.config.session_ttl_secs, metadata);
        let mut conn = self.conn();
        let encoded = encode_session(&session)?;
        let ttl = self.config.session_ttl_secs.max(1) as i64;

        let _: () = redis::pipe()
            .atomic()
            .set_ex(session_key(&id), encoded, ttl as u64)
            .sadd(ACTIVE_SESSIONS_KEY, &id)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChatError::transport("create", e.to_string()))?;

        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, ChatError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn
            .get(session_key(id))
            .await
            .map_err(|e| ChatError::transport("get", e.to_string()))?;
        raw.map(|r| decode_session(&r)).transpose()
    }

    async fn update(&self, session: &Session) -> Result<(), ChatError> {
        let mut conn = self.conn();
        let encoded = encode_session(session)?;
        let remaining_secs = ((session.expires_at - crate::session::now_ms()) / 1000).max(1) as u64;
        let _: () = conn
            .set_ex(session_key(&session.id), encoded, remaining_secs)
            .await
            .map_err(|e| ChatError::transport("update", e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ChatError> {
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .atomic()
            .del(session_key(id))
            .del(messages_key(id))
            .srem(ACTIVE_SESSIONS_KEY, id)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChatError::transport("delete", e.to_string()))?;
        Ok(())
    }

    async fn add_message(&self, id: &str, msg: Message) -> Result<Message, ChatError> {
        let mut session = self
            .get(id)
            .await?
            .ok_or_else(|| ChatError::session_not_found("add_message", id))?;

        let mut conn = self.conn();
        let encoded = encode_message(&msg)?;
        let max = self.config.max_messages as isize;
        let _: () = redis::pipe()
            .atomic()
            .rpush(messages_key(id), encoded)
            .ltrim(messages_key(id), -max, -1)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChatError::transport("add_message", e.to_string()))?;

        session.message_count += 1;
        session.token_count += msg.tokens as u64;
        session.updated_at = crate::session::now_ms();
        self.update(&session).await?;

        Ok(msg)
    }

    async fn get_messages(&self, id: &str, limit: i64) -> Result<Vec<Message>, ChatError> {
        let mut conn = self.conn();
        let raw: Vec<String> = if limit <= 0 {
            conn.lrange(messages_key(id), 0, -1).await
        } else {
            conn.lrange(messages_key(id), -limit, -1).await
        }
        .map_err(|e| ChatError::transport("get_messages", e.to_string()))?;

        raw.iter().map(|r| decode_message(r)).collect()
    }

    async fn check_rate_limit(&self, id: &str) -> Result<RateLimitDecision, ChatError> {
        Ok(self.rate_limiter.allow(id).await)
    }

    async fn active_session_count(&self) -> Result<u64, ChatError> {
        let mut conn = self.conn();
        conn.scard(ACTIVE_SESSIONS_KEY)
            .await
            .map_err(|e| ChatError::transport("active_session_count", e.to_string()))
    }

    async fn sessions_by_metadata(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<Session>, ChatError> {
        let ids: Vec<String> = {
            let mut conn = self.conn();
            conn.smembers(ACTIVE_SESSIONS_KEY)
                .await
                .map_err(|e| ChatError::transport("sessions_by_metadata", e.to_string()))?
        };

        let mut matches = Vec::new();
        for id in ids {
            if let Some(session) = self.get(&id).await? {
                if session.metadata.get(key) == Some(value) {
                    matches.push(session);
                }
            }
        }
        Ok(matches)
    }

    async fn sweep_expired(&self) -> Result<u64, ChatError> {
        let ids: Vec<String> = {
            let mut conn = self.conn();
            conn.smembers(ACTIVE_SESSIONS_KEY)
                .await
                .map_err(|e| ChatError::transport("sweep_expired", e.to_string()))?
        };

        let mut swept = 0u64;
        for id in ids {
            match self.get(&id).await? {
                Some(session) if session.is_expired() => {
                    self.delete(&id).await?;
                    swept += 1;
                }
                None => {
                    // Key expired via TTL already; drop the stale index entry.
                    let mut conn = self.conn();
                    let _: () = conn
                        .srem(ACTIVE_SESSIONS_KEY, &id)
                        .await
                        .map_err(|e| ChatError::transport("sweep_expired", e.to_string()))?;
                    swept += 1;
                }
                _ => {}
            }
        }
        Ok(swept)
    }

    async fn close(&self) -> Result<(), ChatError> {
        Ok(())
    }
}

fn active_sessions_key() -> &'static str {
    ACTIVE_SESSIONS_KEY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_sessions_key_matches_constant() {
        assert_eq!(active_sessions_key(), "gomind:chat:sessions:active");
    }
}
