// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversations as seen from the appointment service.
//!
//! Each conversation is bound to one appointment and has exactly two allowed
//! principals. The gateway never schedules anything; it only asks the
//! [`AppointmentDirectory`] who may talk in a conversation and whether the
//! conversation is still open under the configured [`LivenessPolicy`].

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorCode};
use crate::identity::Principal;

/// Longest accepted conversation id.
const MAX_CONVERSATION_ID_LEN: usize = 128;

/// Appointment status as reported by the appointment service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Completed,
    CancelledByDoctor,
    CancelledByPatient,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledByDoctor | Self::CancelledByPatient)
    }
}

/// A conversation and its two allowed participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub doctor_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub status: AppointmentStatus,
}

impl Conversation {
    pub fn allows(&self, principal_id: &str) -> bool {
        self.doctor_id == principal_id || self.patient_id == principal_id
    }
}

/// Whether conversations of cancelled appointments stay usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub allow_cancelled: bool,
}

impl LivenessPolicy {
    pub fn check(&self, conversation: &Conversation) -> Result<(), ChatError> {
        if conversation.status.is_cancelled() && !self.allow_cancelled {
            return Err(ChatError::new(
                ErrorCode::ConversationClosed,
                format!("conversation {} is closed: appointment cancelled", conversation.id),
            ));
        }
        Ok(())
    }
}

/// Authorize `principal` for `conversation`: membership first, so outsiders
/// learn nothing about the appointment status, then liveness.
pub fn authorize(
    conversation: &Conversation,
    principal: &Principal,
    policy: LivenessPolicy,
) -> Result<(), ChatError> {
    if !conversation.allows(&principal.id) {
        return Err(ChatError::forbidden(format!(
            "user {} is not a participant of conversation {}",
            principal.id, conversation.id
        )));
    }
    policy.check(conversation)
}

/// Reject ids that are empty, oversized, or contain anything other than ASCII
/// alphanumerics, `-` and `_`.
pub fn validate_conversation_id(id: &str) -> Result<(), ChatError> {
    if id.is_empty() {
        return Err(ChatError::bad_request("conversation id is empty"));
    }
    if id.len() > MAX_CONVERSATION_ID_LEN {
        return Err(ChatError::bad_request("conversation id is too long"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ChatError::bad_request(format!("invalid conversation id {id:?}")));
    }
    Ok(())
}

pub type DirectoryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Conversation, ChatError>> + Send + 'a>>;

/// Resolves the allowed participants of a conversation.
pub trait AppointmentDirectory: Send + Sync {
    /// Fails with `NOT_FOUND` when the appointment service doesn't know `id`.
    fn resolve<'a>(&'a self, id: &'a str) -> DirectoryFuture<'a>;
}

/// In-process directory fed from a JSON seed file and the registration API.
#[derive(Default)]
pub struct MemoryDirectory {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversations(conversations: impl IntoIterator<Item = Conversation>) -> Self {
        let dir = Self::new();
        for c in conversations {
            dir.upsert(c);
        }
        dir
    }

    /// Load a JSON array of conversations.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let conversations: Vec<Conversation> = serde_json::from_str(&contents)?;
        for c in &conversations {
            validate_conversation_id(&c.id)
                .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        }
        Ok(Self::with_conversations(conversations))
    }

    /// Insert or replace a conversation. Returns `true` when it was new.
    pub fn upsert(&self, conversation: Conversation) -> bool {
        self.conversations.write().insert(conversation.id.clone(), conversation).is_none()
    }

    pub fn remove(&self, id: &str) -> Option<Conversation> {
        self.conversations.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AppointmentDirectory for MemoryDirectory {
    fn resolve<'a>(&'a self, id: &'a str) -> DirectoryFuture<'a> {
        let result = self
            .conversations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::not_found(format!("conversation {id} not found")));
        Box::pin(std::future::ready(result))
    }
}

#[cfg(test)]
#[path = "appointment_tests.rs"]
mod tests;
