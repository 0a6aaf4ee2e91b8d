// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable, ordered message log keyed by conversation id.
//!
//! The store owns sequencing: every append gets the next `seq` for its
//! conversation and a `created_at` that never goes backwards, so history and
//! live fan-out agree on a single total order.

pub mod jsonl;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::identity::{Principal, Role};

/// A persisted chat message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub seq: u64,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub content: String,
    /// Epoch millis, server-assigned.
    pub created_at: u64,
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChatError>> + Send + 'a>>;

/// Read/write contract of the message store.
pub trait MessageStore: Send + Sync {
    /// Persist a message. Fails with `PERSIST_FAILED`; callers must not
    /// broadcast anything when this fails.
    fn append<'a>(
        &'a self,
        conversation_id: &'a str,
        sender: &'a Principal,
        content: &'a str,
    ) -> StoreFuture<'a, Message>;

    /// Messages with `seq > after_seq`, ascending.
    fn history<'a>(&'a self, conversation_id: &'a str, after_seq: u64)
        -> StoreFuture<'a, Vec<Message>>;
}

/// Position of the newest message in a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Cursor {
    pub seq: u64,
    pub created_at: u64,
}

impl Cursor {
    /// Stamp the next message after this cursor.
    pub fn next(&self, now_ms: u64) -> Cursor {
        Cursor { seq: self.seq + 1, created_at: now_ms.max(self.created_at) }
    }

    pub fn of(message: &Message) -> Cursor {
        Cursor { seq: message.seq, created_at: message.created_at }
    }
}

pub(crate) fn build_message(
    conversation_id: &str,
    sender: &Principal,
    content: &str,
    cursor: Cursor,
) -> Message {
    Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_owned(),
        seq: cursor.seq,
        sender_id: sender.id.clone(),
        sender_name: sender.display_name.clone(),
        sender_role: sender.role,
        content: content.to_owned(),
        created_at: cursor.created_at,
    }
}

/// Volatile store used when no store directory is configured, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryStore {
    fn append<'a>(
        &'a self,
        conversation_id: &'a str,
        sender: &'a Principal,
        content: &'a str,
    ) -> StoreFuture<'a, Message> {
        let mut conversations = self.conversations.lock();
        let log = conversations.entry(conversation_id.to_owned()).or_default();
        let cursor = log.last().map(Cursor::of).unwrap_or_default().next(crate::epoch_ms());
        let message = build_message(conversation_id, sender, content, cursor);
        log.push(message.clone());
        Box::pin(std::future::ready(Ok(message)))
    }

    fn history<'a>(
        &'a self,
        conversation_id: &'a str,
        after_seq: u64,
    ) -> StoreFuture<'a, Vec<Message>> {
        let messages = self
            .conversations
            .lock()
            .get(conversation_id)
            .map(|log| log.iter().filter(|m| m.seq > after_seq).cloned().collect())
            .unwrap_or_default();
        Box::pin(std::future::ready(Ok(messages)))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
