// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint: one connection is one [`Session`].

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ChatError, ErrorCode};
use crate::events::ServerEvent;
use crate::identity::Principal;
use crate::session::{Session, SessionState};
use crate::state::GatewayState;
use crate::transport::auth;

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// Client-to-server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// In-band credential, for clients that can't authenticate at the
    /// handshake.
    Auth { token: String },
    Join { conversation_id: String },
    Leave { conversation_id: String },
    Send { conversation_id: String, content: String },
    Typing { conversation_id: String },
    Ping {},
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

// ---------------------------------------------------------------------------
// WebSocket handler
// ---------------------------------------------------------------------------

/// `GET /ws`: upgrade handler. A credential given at the handshake (query
/// or bearer header) must verify; without one the client authenticates
/// in-band before the auth deadline.
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_cancelled() || state.registry.is_closing() {
        return ChatError::new(ErrorCode::ShuttingDown, "gateway is shutting down").into_response();
    }

    let credential = query.token.as_deref().or_else(|| auth::bearer_token(&headers));
    let principal = match credential {
        Some(token) => match state.verifier.verify(token) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(err = %e, "handshake credential rejected");
                return e.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| {
        let session_id = format!("ws-{}", next_session_id());
        handle_connection(state, socket, session_id, principal)
    })
    .into_response()
}

/// Per-connection event loop.
async fn handle_connection(
    state: Arc<GatewayState>,
    socket: WebSocket,
    session_id: String,
    principal: Option<Principal>,
) {
    state.session_opened();

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.outbound_buffer);
    let mut session = match principal {
        Some(p) => Session::authenticated(session_id.clone(), p, outbound_tx),
        None => Session::new(session_id.clone(), outbound_tx),
    };
    tracing::info!(
        session = %session_id,
        user = session.principal().map(|p| p.id.as_str()).unwrap_or("-"),
        "connection opened"
    );

    let shutdown = state.shutdown.clone();
    let deadline = tokio::time::sleep(state.config.auth_timeout());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let event = ServerEvent::error(ErrorCode::ShuttingDown, "gateway is shutting down");
                let _ = send_json(&mut ws_tx, &event).await;
                break;
            }
            _ = &mut deadline, if !session.has_joined() => {
                tracing::warn!(session = %session_id, "no join before auth deadline");
                let event = ServerEvent::error(
                    ErrorCode::AuthTimeout,
                    "authenticate and join a conversation before the deadline",
                );
                let _ = send_json(&mut ws_tx, &event).await;
                break;
            }
            event = outbound_rx.recv() => {
                let Some(event) = event else { break };
                if send_json(&mut ws_tx, &event).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let err =
                                    ServerEvent::error(ErrorCode::BadRequest, "invalid message");
                                if send_json(&mut ws_tx, &err).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        let reply = handle_client_message(&state, &mut session, client_msg).await;
                        if let Some(reply) = reply {
                            if send_json(&mut ws_tx, &reply).await.is_err() {
                                break;
                            }
                        }
                        if session.state() == SessionState::Closed {
                            break;
                        }
                    }
                    Message::Binary(_) => {
                        let err = ServerEvent::error(
                            ErrorCode::BadRequest,
                            "binary frames are not supported",
                        );
                        if send_json(&mut ws_tx, &err).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    // Cleanup
    session.close(&state.registry).await;
    state.session_closed();
    let _ = ws_tx.close().await;
    tracing::info!(session = %session_id, "connection closed");
}

/// Handle a single client frame and optionally return a direct reply.
/// Room events (acks, messages, presence) arrive through the session's
/// outbound queue instead.
pub(crate) async fn handle_client_message(
    state: &GatewayState,
    session: &mut Session,
    msg: ClientMessage,
) -> Option<ServerEvent> {
    let result = match msg {
        ClientMessage::Ping {} => return Some(ServerEvent::Pong {}),

        ClientMessage::Auth { token } => {
            return match session.authenticate(state.verifier.as_ref(), &token) {
                Ok(p) => Some(ServerEvent::Authenticated {
                    user_id: p.id.clone(),
                    role: p.role,
                    display_name: p.display_name.clone(),
                }),
                Err(e) => Some(e.into()),
            };
        }

        ClientMessage::Join { conversation_id } => {
            session.join(&state.registry, &conversation_id).await
        }
        ClientMessage::Leave { conversation_id } => {
            session.leave(&state.registry, &conversation_id).await
        }
        ClientMessage::Send { conversation_id, content } => {
            session.send(&state.engine, &conversation_id, &content).await.map(|_| ())
        }
        ClientMessage::Typing { conversation_id } => {
            session.typing(&state.engine, &conversation_id).await
        }
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            tracing::debug!(
                session = %session.id(),
                code = %e.code,
                err = %e.message,
                "request rejected"
            );
            Some(e.into())
        }
    }
}

/// Send a JSON-serialized event over the WebSocket.
async fn send_json<S>(tx: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Generate a simple unique ID (not cryptographic, just for session tracking).
fn next_session_id() -> String {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{n}", crate::epoch_ms())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
