// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection state machine.
//!
//! A session starts `Unauthenticated`, becomes `Authenticated` once a
//! credential verifies, and ends `Closed`. Room membership is tracked per
//! conversation alongside the state: an authenticated session may hold any
//! number of room handles, and every room event is checked against them.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::broadcast::BroadcastEngine;
use crate::error::ChatError;
use crate::events::ServerEvent;
use crate::identity::{IdentityVerifier, Principal};
use crate::room::{RoomHandle, RoomRegistry};
use crate::store::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

pub struct Session {
    id: String,
    state: SessionState,
    principal: Option<Principal>,
    rooms: HashMap<String, RoomHandle>,
    has_joined: bool,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Session {
    pub fn new(id: impl Into<String>, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Unauthenticated,
            principal: None,
            rooms: HashMap::new(),
            has_joined: false,
            outbound,
        }
    }

    /// A session whose credential was verified at the handshake.
    pub fn authenticated(
        id: impl Into<String>,
        principal: Principal,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let mut session = Self::new(id, outbound);
        session.state = SessionState::Authenticated;
        session.principal = Some(principal);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Whether this session ever completed a join.
    pub fn has_joined(&self) -> bool {
        self.has_joined
    }

    pub fn joined_rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    /// Verify `credential` and bind the resulting principal. A failed
    /// attempt closes the session.
    pub fn authenticate(
        &mut self,
        verifier: &dyn IdentityVerifier,
        credential: &str,
    ) -> Result<&Principal, ChatError> {
        match self.state {
            SessionState::Unauthenticated => {}
            SessionState::Authenticated => {
                return Err(ChatError::bad_request("session is already authenticated"));
            }
            SessionState::Closed => return Err(ChatError::unauthorized("session is closed")),
        }
        match verifier.verify(credential) {
            Ok(principal) => {
                tracing::info!(
                    session = %self.id,
                    user = %principal.id,
                    role = principal.role.as_str(),
                    "authenticated"
                );
                self.state = SessionState::Authenticated;
                Ok(self.principal.insert(principal))
            }
            Err(e) => {
                tracing::warn!(session = %self.id, err = %e, "authentication failed");
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    pub async fn join(
        &mut self,
        registry: &RoomRegistry,
        conversation_id: &str,
    ) -> Result<(), ChatError> {
        let principal = self.require_principal()?;
        let handle = registry.join(conversation_id, principal, &self.id, &self.outbound).await?;
        self.rooms.insert(conversation_id.to_owned(), handle);
        self.has_joined = true;
        Ok(())
    }

    /// Leave one conversation. Leaving a room the session isn't in is a
    /// no-op.
    pub async fn leave(
        &mut self,
        registry: &RoomRegistry,
        conversation_id: &str,
    ) -> Result<(), ChatError> {
        self.require_principal()?;
        if let Some(handle) = self.rooms.remove(conversation_id) {
            registry.leave(&handle).await;
        }
        Ok(())
    }

    pub async fn send(
        &self,
        engine: &BroadcastEngine,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ChatError> {
        let handle = self.room(conversation_id)?;
        engine.send(handle, content).await
    }

    pub async fn typing(
        &self,
        engine: &BroadcastEngine,
        conversation_id: &str,
    ) -> Result<(), ChatError> {
        let handle = self.room(conversation_id)?;
        engine.typing(handle).await
    }

    /// Leave every room and move to `Closed`. Safe to call more than once.
    pub async fn close(&mut self, registry: &RoomRegistry) {
        for (_, handle) in self.rooms.drain() {
            registry.leave(&handle).await;
        }
        if self.state != SessionState::Closed {
            tracing::debug!(session = %self.id, "session closed");
        }
        self.state = SessionState::Closed;
    }

    fn require_principal(&self) -> Result<&Principal, ChatError> {
        match (self.state, &self.principal) {
            (SessionState::Authenticated, Some(principal)) => Ok(principal),
            _ => Err(ChatError::unauthorized("not authenticated")),
        }
    }

    fn room(&self, conversation_id: &str) -> Result<&RoomHandle, ChatError> {
        self.require_principal()?;
        self.rooms.get(conversation_id).ok_or_else(|| ChatError::not_joined(conversation_id))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
