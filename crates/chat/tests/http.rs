// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the gateway HTTP API.
//!
//! Uses `axum_test::TestServer`, no real TCP needed.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::json;

use clinichat::appointment::{AppointmentDirectory, AppointmentStatus};
use clinichat::identity::Principal;
use clinichat::state::GatewayState;
use clinichat::store::MessageStore;
use clinichat::test_support::{conversation, doctor, patient, token_for, GatewayBuilder};
use clinichat::transport::build_router;

fn test_server(state: Arc<GatewayState>) -> anyhow::Result<TestServer> {
    TestServer::new(build_router(state)).map_err(|e| anyhow::anyhow!("{e}"))
}

fn bearer(state: &GatewayState, principal: &Principal) -> anyhow::Result<HeaderValue> {
    let token = token_for(state, principal)?;
    Ok(HeaderValue::from_str(&format!("Bearer {token}"))?)
}

async fn seed(state: &GatewayState, conversation_id: &str, sender: &Principal, contents: &[&str]) {
    for content in contents {
        let _ = state.store.append(conversation_id, sender, content).await;
    }
}

#[tokio::test]
async fn health_reports_counts() -> anyhow::Result<()> {
    let state = GatewayBuilder::new().build();
    let server = test_server(state)?;

    let resp = server.get("/api/v1/health").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["status"], "running");
    assert_eq!(body["rooms"], 0);
    assert_eq!(body["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn history_returns_messages_in_order() -> anyhow::Result<()> {
    let state = GatewayBuilder::new().conversation(conversation("apt-1", "doc", "pat")).build();
    seed(&state, "apt-1", &doctor("doc"), &["hello", "are you there?"]).await;
    let server = test_server(Arc::clone(&state))?;

    let resp = server
        .get("/api/v1/conversations/apt-1/messages")
        .add_header(header::AUTHORIZATION, bearer(&state, &patient("pat"))?)
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["conversationId"], "apt-1");
    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[0]["seq"], 1);
    assert_eq!(messages[0]["senderId"], "doc");
    assert_eq!(messages[0]["senderRole"], "doctor");
    assert_eq!(messages[1]["content"], "are you there?");
    Ok(())
}

#[tokio::test]
async fn history_after_seq_and_query_token() -> anyhow::Result<()> {
    let state = GatewayBuilder::new().conversation(conversation("apt-1", "doc", "pat")).build();
    seed(&state, "apt-1", &doctor("doc"), &["one", "two", "three"]).await;
    let token = token_for(&state, &doctor("doc"))?;
    let server = test_server(state)?;

    let resp = server
        .get(&format!("/api/v1/conversations/apt-1/messages?after=1&token={token}"))
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    let contents: Vec<&str> = body["messages"]
        .as_array()
        .map(|a| a.iter().filter_map(|m| m["content"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(contents, vec!["two", "three"]);
    Ok(())
}

#[tokio::test]
async fn history_is_authorized_like_join() -> anyhow::Result<()> {
    let mut cancelled = conversation("apt-2", "doc", "pat");
    cancelled.status = AppointmentStatus::CancelledByPatient;
    let state = GatewayBuilder::new()
        .conversation(conversation("apt-1", "doc", "pat"))
        .conversation(cancelled)
        .build();
    let server = test_server(Arc::clone(&state))?;

    // No credential
    let resp = server.get("/api/v1/conversations/apt-1/messages").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // Garbage credential
    let resp = server
        .get("/api/v1/conversations/apt-1/messages")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer not-a-jwt"))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    // Not a participant
    let resp = server
        .get("/api/v1/conversations/apt-1/messages")
        .add_header(header::AUTHORIZATION, bearer(&state, &patient("q"))?)
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);

    // Unknown conversation
    let resp = server
        .get("/api/v1/conversations/apt-404/messages")
        .add_header(header::AUTHORIZATION, bearer(&state, &patient("pat"))?)
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);

    // Cancelled appointment
    let resp = server
        .get("/api/v1/conversations/apt-2/messages")
        .add_header(header::AUTHORIZATION, bearer(&state, &patient("pat"))?)
        .await;
    resp.assert_status(StatusCode::GONE);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["error"]["code"], "CONVERSATION_CLOSED");
    Ok(())
}

#[tokio::test]
async fn cancelled_history_is_readable_when_allowed() -> anyhow::Result<()> {
    let mut cancelled = conversation("apt-2", "doc", "pat");
    cancelled.status = AppointmentStatus::CancelledByDoctor;
    let state = GatewayBuilder::new().conversation(cancelled).allow_cancelled_chat(true).build();
    seed(&state, "apt-2", &doctor("doc"), &["sorry, rescheduling"]).await;
    let server = test_server(Arc::clone(&state))?;

    let resp = server
        .get("/api/v1/conversations/apt-2/messages")
        .add_header(header::AUTHORIZATION, bearer(&state, &patient("pat"))?)
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["messages"][0]["content"], "sorry, rescheduling");
    Ok(())
}

#[tokio::test]
async fn registration_disabled_without_admin_token() -> anyhow::Result<()> {
    let state = GatewayBuilder::new().build();
    let server = test_server(state)?;

    let resp = server
        .put("/api/v1/conversations/apt-9")
        .json(&json!({"doctorId": "doc", "patientId": "pat"}))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn register_update_and_remove_conversation() -> anyhow::Result<()> {
    let state = GatewayBuilder::new().admin_token("adm").build();
    let server = test_server(Arc::clone(&state))?;
    let admin = HeaderValue::from_static("Bearer adm");

    // Wrong token
    let resp = server
        .put("/api/v1/conversations/apt-9")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"))
        .json(&json!({"doctorId": "doc", "patientId": "pat"}))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server
        .put("/api/v1/conversations/apt-9")
        .add_header(header::AUTHORIZATION, admin.clone())
        .json(&json!({"doctorId": "doc", "patientId": "pat"}))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let resolved = state.directory.resolve("apt-9").await?;
    assert_eq!(resolved.status, AppointmentStatus::Scheduled);

    let resp = server
        .put("/api/v1/conversations/apt-9")
        .add_header(header::AUTHORIZATION, admin.clone())
        .json(&json!({"doctorId": "doc", "patientId": "pat", "status": "cancelled_by_doctor"}))
        .await;
    resp.assert_status(StatusCode::OK);
    let resolved = state.directory.resolve("apt-9").await?;
    assert_eq!(resolved.status, AppointmentStatus::CancelledByDoctor);

    let resp = server
        .delete("/api/v1/conversations/apt-9")
        .add_header(header::AUTHORIZATION, admin)
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["removed"], true);
    assert!(state.directory.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_registration_is_bad_request() -> anyhow::Result<()> {
    let state = GatewayBuilder::new().admin_token("adm").build();
    let server = test_server(state)?;

    let cases = [
        ("apt-9", json!({"doctorId": "x", "patientId": "x"})),
        ("apt-9", json!({"doctorId": "", "patientId": "pat"})),
        ("apt.9", json!({"doctorId": "doc", "patientId": "pat"})),
    ];
    for (id, body) in cases {
        let resp = server
            .put(&format!("/api/v1/conversations/{id}"))
            .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer adm"))
            .json(&body)
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }
    Ok(())
}
