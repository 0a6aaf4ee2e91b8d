// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-to-client event types.
//!
//! Every event a connection receives, whether fanned out from a room or sent
//! as a direct reply, is one of these. Events use internally-tagged JSON
//! (`{"type": "message", ...}`) with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorCode};
use crate::identity::Role;
use crate::store::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// In-band authentication succeeded.
    Authenticated { user_id: String, role: Role, display_name: String },
    /// A participant entered the room. Also sent to the joiner as its ack.
    Joined { conversation_id: String, user_id: String, members: Vec<String> },
    /// A participant's last connection left the room.
    Left { conversation_id: String, user_id: String },
    /// A persisted chat message.
    Message(Message),
    Typing { conversation_id: String, user_id: String },
    Error { code: String, message: String },
    Pong {},
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error { code: code.as_str().to_owned(), message: message.into() }
    }
}

impl From<ChatError> for ServerEvent {
    fn from(err: ChatError) -> Self {
        Self::error(err.code, err.message)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
