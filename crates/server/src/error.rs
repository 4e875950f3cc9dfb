// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed error model for the chat-mux core.
//!
//! Every fallible operation across the crate returns [`ChatError`]. Errors
//! carry an operation tag, a [`ErrorKind`], and an optional wrapped cause so
//! that logs retain context without leaking internals to HTTP clients.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Coarse classification of a [`ChatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Session,
    Message,
    Configuration,
    Stream,
    Internal,
}

/// A fixed, client-visible error code. Errors without a natural mapping
/// serialize without a `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    TransportNotFound,
    SessionNotFound,
    SessionExpired,
    RateLimited,
    MessageTooLarge,
    InvalidConfig,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportNotFound => "TRANSPORT_NOT_FOUND",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::RateLimited => "RATE_LIMITED",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::InvalidConfig => "INVALID_CONFIG",
        }
    }

    /// Default HTTP status for a bare error code (callers may override).
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::TransportNotFound => StatusCode::NOT_FOUND,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::SessionExpired => StatusCode::GONE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::MessageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidConfig => StatusCode::BAD_REQUEST,
        }
    }
}

/// The crate's single error type.
#[derive(Debug)]
pub struct ChatError {
    pub operation: &'static str,
    pub kind: ErrorKind,
    pub code: Option<ErrorCode>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ChatError {
    pub fn new(operation: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { operation, kind, code: None, message: message.into(), source: None }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Transport, message)
    }

    pub fn session(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Session, message)
    }

    pub fn session_not_found(operation: &'static str, id: &str) -> Self {
        Self::new(operation, ErrorKind::Session, format!("session not found: {id}"))
            .with_code(ErrorCode::SessionNotFound)
    }

    pub fn session_expired(operation: &'static str, id: &str) -> Self {
        Self::new(operation, ErrorKind::Session, format!("session expired: {id}"))
            .with_code(ErrorCode::SessionExpired)
    }

    pub fn message_too_large(operation: &'static str, len: usize, max: usize) -> Self {
        Self::new(operation, ErrorKind::Message, format!("message too large: {len} > {max}"))
            .with_code(ErrorCode::MessageTooLarge)
    }

    pub fn rate_limited(operation: &'static str, retry_after_secs: u64) -> Self {
        Self::new(operation, ErrorKind::Message, format!("rate limited, retry after {retry_after_secs}s"))
            .with_code(ErrorCode::RateLimited)
    }

    pub fn configuration(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Configuration, message).with_code(ErrorCode::InvalidConfig)
    }

    pub fn stream(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Stream, message)
    }

    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ErrorKind::Internal, message)
    }

    /// Transport-kind, stream-kind, and a handful of named conditions are
    /// worth an automatic retry by callers (e.g. the AI backend client).
    pub fn retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Transport | ErrorKind::Stream => true,
            _ => matches!(self.code, Some(ErrorCode::RateLimited)),
        }
    }

    /// Configuration errors and resource-limit violations are not worth
    /// retrying under any backoff policy.
    pub fn fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Configuration
        ) || matches!(self.code, Some(ErrorCode::MessageTooLarge))
    }

    /// The HTTP status a boundary (orchestrator, decorator) should respond
    /// with for this error.
    pub fn http_status(&self) -> StatusCode {
        if let Some(code) = self.code {
            return code.http_status();
        }
        match self.kind {
            ErrorKind::Session | ErrorKind::Message => StatusCode::BAD_REQUEST,
            ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Transport | ErrorKind::Stream | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn to_response_body(&self) -> ErrorResponseBody {
        ErrorResponseBody {
            error: self.message.clone(),
            code: self.code.map(|c| c.as_str().to_owned()),
            details: None,
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        (status, Json(self.to_response_body())).into_response()
    }
}

/// Client-visible error envelope: `{"error": ..., "code"?: ..., "details"?: ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponseBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ChatError::transport("test", "boom").retryable());
        assert!(ChatError::stream("test", "boom").retryable());
        assert!(!ChatError::configuration("test", "boom").retryable());
        assert!(ChatError::rate_limited("test", 5).retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(ChatError::configuration("test", "bad").fatal());
        assert!(ChatError::message_too_large("test", 10, 5).fatal());
        assert!(!ChatError::transport("test", "boom").fatal());
    }

    #[test]
    fn response_body_omits_code_when_absent() {
        let err = ChatError::internal("test", "oops");
        let body = err.to_response_body();
        assert!(body.code.is_none());
        assert_eq!(body.error, "oops");
    }

    #[test]
    fn response_body_carries_fixed_code() {
        let err = ChatError::session_not_found("test", "abc");
        let body = err.to_response_body();
        assert_eq!(body.code.as_deref(), Some("SESSION_NOT_FOUND"));
    }
}
