// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence and typing events derived from room membership changes.
//!
//! Presence is tracked per principal, not per connection: a second tab of a
//! user already in the room is silent, and `left` only fires when the user's
//! last connection goes. Nothing here is persisted.

use crate::events::ServerEvent;

/// Distinct user ids in first-seen order.
pub fn distinct_users<'a>(user_ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in user_ids {
        if !out.iter().any(|u| u == id) {
            out.push(id.to_owned());
        }
    }
    out
}

/// Event for the other members when `user_id` enters. `None` when the user
/// already had a connection in the room before this join.
pub fn on_join(
    conversation_id: &str,
    present_before: &[String],
    user_id: &str,
    members_after: Vec<String>,
) -> Option<ServerEvent> {
    if present_before.iter().any(|u| u == user_id) {
        return None;
    }
    Some(joined(conversation_id, user_id, members_after))
}

/// Event for the remaining members when one of `user_id`'s connections
/// leaves. `None` while the user still has another connection in the room.
pub fn on_leave(
    conversation_id: &str,
    present_after: &[String],
    user_id: &str,
) -> Option<ServerEvent> {
    if present_after.iter().any(|u| u == user_id) {
        return None;
    }
    Some(ServerEvent::Left {
        conversation_id: conversation_id.to_owned(),
        user_id: user_id.to_owned(),
    })
}

pub fn joined(conversation_id: &str, user_id: &str, members: Vec<String>) -> ServerEvent {
    ServerEvent::Joined {
        conversation_id: conversation_id.to_owned(),
        user_id: user_id.to_owned(),
        members,
    }
}

pub fn typing(conversation_id: &str, user_id: &str) -> ServerEvent {
    ServerEvent::Typing { conversation_id: conversation_id.to_owned(), user_id: user_id.to_owned() }
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
