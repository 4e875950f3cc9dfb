// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent events transport: a reference implementation of the
//! [`Transport`] lifecycle contract over SSE framing.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::ChatError;
use crate::transport::{Capability, CapabilitySet, ChatContext, Transport, TransportState};

pub struct SseTransport {
    state: RwLock<TransportState>,
    priority: i32,
}

impl SseTransport {
    pub fn new(priority: i32) -> Self {
        Self { state: RwLock::new(TransportState::Uninitialized), priority }
    }

    fn set_state(&self, new_state: TransportState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = new_state;
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn name(&self) -> &str {
        "sse"
    }

    fn description(&self) -> &str {
        "Server-sent events streaming transport"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty().with(Capability::Streaming).with(Capability::Reconnect)
    }

    fn example(&self) -> &str {
        "curl -N -X POST /chat/sse -d '{\"message\":\"hi\"}'"
    }

    fn state(&self) -> TransportState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn initialize(&self, _config: serde_json::Value) -> Result<(), ChatError> {
        self.set_state(TransportState::Initialized);
        Ok(())
    }

    async fn start(&self) -> Result<(), ChatError> {
        self.set_state(TransportState::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChatError> {
        self.set_state(TransportState::Stopped);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChatError> {
        Ok(())
    }

    fn create_handler(&self, ctx: Arc<dyn ChatContext>) -> axum::Router {
        axum::Router::new().route("/", post(sse_handler)).with_state(ctx)
    }
}

#[derive(Deserialize)]
struct SseRequest {
    session_id: Option<String>,
    message: String,
}

async fn sse_handler(
    State(ctx): State<Arc<dyn ChatContext>>,
    Json(req): Json<SseRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ChatError> {
    let rx = ctx.stream_response(req.session_id, req.message).await?;
    let stream = ReceiverStream::new(rx).map(|event| {
        let event_name = format!("{:?}", event.event_type).to_lowercase();
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_owned());
        Ok(Event::default().event(event_name).data(data))
    });
    Ok(Sse::new(stream))
}
