// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bidirectional WebSocket transport: one socket multiplexes any number
//! of sequential chat turns for a session.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use serde::Deserialize;

use crate::error::ChatError;
use crate::orchestrator::events::ChatEvent;
use crate::transport::{Capability, CapabilitySet, ChatContext, Transport, TransportState};

pub struct WebSocketTransport {
    state: RwLock<TransportState>,
    priority: i32,
}

impl WebSocketTransport {
    pub fn new(priority: i32) -> Self {
        Self { state: RwLock::new(TransportState::Uninitialized), priority }
    }

    fn set_state(&self, new_state: TransportState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = new_state;
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        "websocket"
    }

    fn description(&self) -> &str {
        "Bidirectional WebSocket streaming transport"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Streaming)
            .with(Capability::Bidirectional)
            .with(Capability::Reconnect)
            .with(Capability::Multiplex)
    }

    fn example(&self) -> &str {
        "wscat -c ws://host/chat/websocket"
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
        axum::Router::new().route("/", get(ws_handler)).with_state(ctx)
    }
}

#[derive(Deserialize)]
struct WsInbound {
    session_id: Option<String>,
    message: String,
}

async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<Arc<dyn ChatContext>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<dyn ChatContext>) {
    loop {
        let Some(Ok(msg)) = socket.recv().await else { return };
        let WsMessage::Text(text) = msg else { continue };

        let inbound: WsInbound = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                let _ = send_event(&mut socket, &ChatEvent::error(format!("malformed request: {e}"))).await;
                continue;
            }
        };

        let mut rx = match ctx.stream_response(inbound.session_id, inbound.message).await {
            Ok(rx) => rx,
            Err(e) => {
                if send_event(&mut socket, &ChatEvent::error(e.to_string())).await.is_err() {
                    return;
                }
                continue;
            }
        };

        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            if send_event(&mut socket, &event).await.is_err() {
                return;
            }
            if terminal {
                break;
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ChatEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned());
    socket.send(WsMessage::Text(payload.into())).await
}
