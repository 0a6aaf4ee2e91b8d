// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: health, message history, conversation registration.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::appointment::{
    authorize, validate_conversation_id, AppointmentDirectory, AppointmentStatus, Conversation,
};
use crate::error::ChatError;
use crate::state::GatewayState;
use crate::store::Message;
use crate::transport::auth;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub rooms: usize,
    pub sessions: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Only return messages with a greater sequence number.
    #[serde(default)]
    pub after: Option<u64>,
    /// Access token, for clients that can't set headers.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    pub doctor_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeregisterResponse {
    pub id: String,
    pub removed: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    let status = if s.shutdown.is_cancelled() { "shutting_down" } else { "running" };
    Json(HealthResponse {
        status: status.to_owned(),
        rooms: s.registry.room_count(),
        sessions: s.session_count(),
    })
}

/// `GET /api/v1/conversations/{id}/messages`: ascending history, authorized
/// the same way as a join.
pub async fn history(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ChatError> {
    validate_conversation_id(&id)?;
    let token = auth::bearer_token(&headers)
        .or(query.token.as_deref())
        .ok_or_else(|| ChatError::unauthorized("missing access token"))?;
    let principal = s.verifier.verify(token)?;

    let conversation = s.directory.resolve(&id).await?;
    authorize(&conversation, &principal, s.registry.policy())?;

    let messages = s.store.history(&id, query.after.unwrap_or(0)).await?;
    tracing::debug!(
        conversation = %id,
        user = %principal.id,
        count = messages.len(),
        "history served"
    );
    Ok(Json(HistoryResponse { conversation_id: id, messages }))
}

/// `PUT /api/v1/conversations/{id}`: register or update a conversation.
pub async fn put_conversation(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(req): Json<ConversationRequest>,
) -> Result<impl IntoResponse, ChatError> {
    validate_conversation_id(&id)?;
    if req.doctor_id.is_empty() || req.patient_id.is_empty() {
        return Err(ChatError::bad_request("doctorId and patientId are required"));
    }
    if req.doctor_id == req.patient_id {
        return Err(ChatError::bad_request("doctorId and patientId must differ"));
    }

    let conversation = Conversation {
        id: id.clone(),
        doctor_id: req.doctor_id,
        patient_id: req.patient_id,
        status: req.status.unwrap_or_default(),
    };
    tracing::info!(conversation = %id, status = ?conversation.status, "conversation registered");
    let created = s.directory.upsert(conversation);
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(RegisterResponse { id, created })))
}

/// `DELETE /api/v1/conversations/{id}`
pub async fn delete_conversation(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let removed = s.directory.remove(&id).is_some();
    if removed {
        tracing::info!(conversation = %id, "conversation deregistered");
    }
    Json(DeregisterResponse { id, removed })
}
