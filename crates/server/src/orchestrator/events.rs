// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat event stream wire type (§3, §6).

use serde::Serialize;

use crate::session::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventType {
    Message,
    Error,
    Done,
    Typing,
    Thinking,
}

/// A single event on a finite, terminally-closed stream. Every stream MUST
/// end with a `done` event, or be closed immediately after an `error`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub event_type: ChatEventType,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl ChatEvent {
    pub fn message(data: impl Into<String>) -> Self {
        Self { event_type: ChatEventType::Message, data: data.into(), metadata: None, timestamp: now_ms() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { event_type: ChatEventType::Error, data: message.into(), metadata: None, timestamp: now_ms() }
    }

    pub fn done() -> Self {
        Self { event_type: ChatEventType::Done, data: String::new(), metadata: None, timestamp: now_ms() }
    }

    pub fn typing() -> Self {
        Self { event_type: ChatEventType::Typing, data: String::new(), metadata: None, timestamp: now_ms() }
    }

    pub fn thinking() -> Self {
        Self { event_type: ChatEventType::Thinking, data: String::new(), metadata: None, timestamp: now_ms() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type, ChatEventType::Done | ChatEventType::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_and_error_are_terminal() {
        assert!(ChatEvent::done().is_terminal());
        assert!(ChatEvent::error("boom").is_terminal());
        assert!(!ChatEvent::message("hi").is_terminal());
        assert!(!ChatEvent::typing().is_terminal());
    }
}
