// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room registry: which connections are in which conversation right now.
//!
//! The registry owns the only global map (conversation id → room) and holds
//! its lock just long enough to look up, insert or remove a room. Everything
//! that touches a room's member set (join, leave, the send snapshot) runs
//! under that room's own async mutex, so unrelated rooms never contend and
//! one room's events are totally ordered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::appointment::{
    authorize, validate_conversation_id, AppointmentDirectory, Conversation, LivenessPolicy,
};
use crate::error::{ChatError, ErrorCode};
use crate::events::ServerEvent;
use crate::identity::Principal;
use crate::presence;

/// One connection's seat in a room.
pub struct Member {
    pub session_id: String,
    pub principal: Principal,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Member {
    /// Queue `event` for this member without waiting. A full or closed queue
    /// drops the event; the member reconciles through history.
    fn deliver(&self, event: ServerEvent) -> bool {
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session = %self.session_id, "outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    session = %self.session_id,
                    "outbound queue closed, dropping event"
                );
                false
            }
        }
    }
}

/// Member set of a room, guarded by the room mutex.
#[derive(Default)]
pub(crate) struct RoomState {
    members: Vec<Member>,
    /// Set when the room is torn down. A task that raced the teardown and
    /// still holds the `Arc<Room>` must look the room up again.
    closed: bool,
}

impl RoomState {
    pub fn member(&self, session_id: &str) -> Option<&Member> {
        if self.closed {
            return None;
        }
        self.members.iter().find(|m| m.session_id == session_id)
    }

    pub fn users(&self) -> Vec<String> {
        presence::distinct_users(self.members.iter().map(|m| m.principal.id.as_str()))
    }

    /// Deliver `event` to every member matching `include`. Returns how many
    /// queues accepted it.
    pub fn broadcast(&self, event: &ServerEvent, include: impl Fn(&Member) -> bool) -> usize {
        self.members.iter().filter(|m| include(m)).filter(|m| m.deliver(event.clone())).count()
    }
}

/// A live conversation. `conversation` holds the participants as resolved
/// when the room was created.
pub struct Room {
    conversation: Conversation,
    pub(crate) state: tokio::sync::Mutex<RoomState>,
}

impl Room {
    fn new(conversation: Conversation) -> Self {
        Self { conversation, state: tokio::sync::Mutex::new(RoomState::default()) }
    }
}

/// Proof that a session joined a room. Used for send, typing and leave.
#[derive(Clone)]
pub struct RoomHandle {
    room: Arc<Room>,
    session_id: String,
    user_id: String,
}

impl RoomHandle {
    pub fn conversation_id(&self) -> &str {
        &self.room.conversation.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub(crate) fn room(&self) -> &Arc<Room> {
        &self.room
    }
}

/// Snapshot entry returned by [`RoomRegistry::members`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub session_id: String,
    pub user_id: String,
}

pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    directory: Arc<dyn AppointmentDirectory>,
    policy: LivenessPolicy,
    closing: AtomicBool,
}

impl RoomRegistry {
    pub fn new(directory: Arc<dyn AppointmentDirectory>, policy: LivenessPolicy) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            directory,
            policy,
            closing: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> LivenessPolicy {
        self.policy
    }

    /// Admit `session_id` (authenticated as `principal`) to a conversation.
    ///
    /// The appointment directory is consulted only when the room doesn't
    /// exist yet; an open room keeps the participants it was created with.
    /// On success the joiner receives a `joined` ack through `outbound` and,
    /// if this is the principal's first connection in the room, the other
    /// members receive a `joined` presence event.
    pub async fn join(
        &self,
        conversation_id: &str,
        principal: &Principal,
        session_id: &str,
        outbound: &mpsc::Sender<ServerEvent>,
    ) -> Result<RoomHandle, ChatError> {
        validate_conversation_id(conversation_id)?;

        loop {
            if self.is_closing() {
                return Err(ChatError::new(ErrorCode::ShuttingDown, "gateway is shutting down"));
            }

            let existing = self.rooms.lock().get(conversation_id).cloned();
            let room = match existing {
                Some(room) => room,
                None => {
                    let conversation = self.directory.resolve(conversation_id).await?;
                    authorize(&conversation, principal, self.policy)?;
                    self.insert_room(conversation)
                }
            };
            authorize(&room.conversation, principal, self.policy)?;

            let mut state = room.state.lock().await;
            if state.closed {
                continue;
            }

            let handle = RoomHandle {
                room: Arc::clone(&room),
                session_id: session_id.to_owned(),
                user_id: principal.id.clone(),
            };

            if state.member(session_id).is_none() {
                let before = state.users();
                state.members.push(Member {
                    session_id: session_id.to_owned(),
                    principal: principal.clone(),
                    outbound: outbound.clone(),
                });
                let after = state.users();
                if let Some(event) =
                    presence::on_join(conversation_id, &before, &principal.id, after)
                {
                    state.broadcast(&event, |m| m.session_id != session_id);
                }
                tracing::info!(
                    conversation = %conversation_id,
                    user = %principal.id,
                    session = %session_id,
                    "joined room"
                );
            }

            let ack = presence::joined(conversation_id, &principal.id, state.users());
            state.broadcast(&ack, |m| m.session_id == session_id);
            return Ok(handle);
        }
    }

    /// Remove the handle's session from its room. Idempotent: returns `false`
    /// and emits nothing when the session already left.
    pub async fn leave(&self, handle: &RoomHandle) -> bool {
        let room = handle.room();
        let conversation_id = room.conversation.id.as_str();
        let mut state = room.state.lock().await;

        let Some(pos) = state.members.iter().position(|m| m.session_id == handle.session_id)
        else {
            return false;
        };
        state.members.remove(pos);

        let remaining = state.users();
        if let Some(event) = presence::on_leave(conversation_id, &remaining, &handle.user_id) {
            state.broadcast(&event, |_| true);
        }
        tracing::info!(
            conversation = %conversation_id,
            user = %handle.user_id,
            session = %handle.session_id,
            "left room"
        );

        if state.members.is_empty() {
            state.closed = true;
            let mut rooms = self.rooms.lock();
            if rooms.get(conversation_id).is_some_and(|r| Arc::ptr_eq(r, room)) {
                rooms.remove(conversation_id);
            }
            tracing::info!(conversation = %conversation_id, "room torn down");
        }
        true
    }

    /// Snapshot of the sessions currently in a conversation's room.
    pub async fn members(&self, conversation_id: &str) -> Vec<MemberInfo> {
        let Some(room) = self.rooms.lock().get(conversation_id).cloned() else {
            return vec![];
        };
        let state = room.state.lock().await;
        if state.closed {
            return vec![];
        }
        state
            .members
            .iter()
            .map(|m| MemberInfo {
                session_id: m.session_id.clone(),
                user_id: m.principal.id.clone(),
            })
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Stop admitting joins and tear down every room. Each room lock is taken
    /// in turn, so a send that is mid-append finishes before its room closes.
    pub async fn close_all(&self) -> usize {
        self.closing.store(true, Ordering::Release);
        let rooms: Vec<Arc<Room>> = self.rooms.lock().drain().map(|(_, r)| r).collect();
        for room in &rooms {
            let mut state = room.state.lock().await;
            state.closed = true;
            state.members.clear();
        }
        tracing::info!(rooms = rooms.len(), "closed all rooms");
        rooms.len()
    }

    fn insert_room(&self, conversation: Conversation) -> Arc<Room> {
        let mut rooms = self.rooms.lock();
        let room = rooms.entry(conversation.id.clone()).or_insert_with(|| {
            tracing::info!(conversation = %conversation.id, "room created");
            Arc::new(Room::new(conversation))
        });
        Arc::clone(room)
    }
}

#[cfg(test)]
#[path = "room_tests.rs"]
mod tests;
