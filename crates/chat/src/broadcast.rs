// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persist-then-fan-out of chat messages, plus typing relay.

use std::sync::Arc;

use crate::error::{ChatError, ErrorCode};
use crate::events::ServerEvent;
use crate::presence;
use crate::room::{RoomHandle, RoomRegistry};
use crate::store::{Message, MessageStore};

/// Reject blank content and content longer than `max_len` characters.
pub fn validate_content(content: &str, max_len: usize) -> Result<(), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::bad_request("message content is empty"));
    }
    let len = content.chars().count();
    if len > max_len {
        return Err(ChatError::bad_request(format!(
            "message content is {len} characters, limit is {max_len}"
        )));
    }
    Ok(())
}

pub struct BroadcastEngine {
    registry: Arc<RoomRegistry>,
    store: Arc<dyn MessageStore>,
    max_message_len: usize,
}

impl BroadcastEngine {
    pub fn new(
        registry: Arc<RoomRegistry>,
        store: Arc<dyn MessageStore>,
        max_message_len: usize,
    ) -> Self {
        Self { registry, store, max_message_len }
    }

    /// Persist `content` and deliver it to every current member of the room.
    ///
    /// The room lock is held from the membership check through the append
    /// and the fan-out, so sends in one room are serialized and a member's
    /// leave can't interleave with a delivery snapshot. Nothing is delivered
    /// when the append fails.
    pub async fn send(&self, handle: &RoomHandle, content: &str) -> Result<Message, ChatError> {
        validate_content(content, self.max_message_len)?;

        let conversation_id = handle.conversation_id();
        let state = handle.room().state.lock().await;
        if self.registry.is_closing() {
            return Err(ChatError::new(ErrorCode::ShuttingDown, "gateway is shutting down"));
        }
        let sender = match state.member(handle.session_id()) {
            Some(member) => member.principal.clone(),
            None => return Err(ChatError::not_joined(conversation_id)),
        };

        let message = match self.store.append(conversation_id, &sender, content).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    user = %sender.id,
                    err = %e,
                    "persist failed"
                );
                return Err(e);
            }
        };

        let delivered = state.broadcast(&ServerEvent::Message(message.clone()), |_| true);
        tracing::debug!(
            conversation = %conversation_id,
            seq = message.seq,
            delivered,
            "message persisted and fanned out"
        );
        Ok(message)
    }

    /// Relay a typing indicator to the other participant's connections.
    pub async fn typing(&self, handle: &RoomHandle) -> Result<(), ChatError> {
        let state = handle.room().state.lock().await;
        if state.member(handle.session_id()).is_none() {
            return Err(ChatError::not_joined(handle.conversation_id()));
        }
        let event = presence::typing(handle.conversation_id(), handle.user_id());
        state.broadcast(&event, |m| m.principal.id != handle.user_id());
        Ok(())
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
