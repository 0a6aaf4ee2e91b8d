// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, fakes, and assertion helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::appointment::{AppointmentStatus, Conversation, MemoryDirectory};
use crate::config::GatewayConfig;
use crate::error::{ChatError, ErrorCode};
use crate::identity::{JwtVerifier, Principal, Role};
use crate::state::GatewayState;
use crate::store::{MemoryStore, Message, MessageStore, StoreFuture};

pub fn doctor(id: &str) -> Principal {
    Principal::new(id, Role::Doctor, format!("Dr. {id}"))
}

pub fn patient(id: &str) -> Principal {
    Principal::new(id, Role::Patient, id)
}

pub fn conversation(id: &str, doctor_id: &str, patient_id: &str) -> Conversation {
    Conversation {
        id: id.to_owned(),
        doctor_id: doctor_id.to_owned(),
        patient_id: patient_id.to_owned(),
        status: AppointmentStatus::Scheduled,
    }
}

/// In-memory store whose appends can be switched to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MessageStore for FailingStore {
    fn append<'a>(
        &'a self,
        conversation_id: &'a str,
        sender: &'a Principal,
        content: &'a str,
    ) -> StoreFuture<'a, Message> {
        if self.failing.load(Ordering::SeqCst) {
            return Box::pin(std::future::ready(Err(ChatError::new(
                ErrorCode::PersistFailed,
                "disk unavailable",
            ))));
        }
        self.inner.append(conversation_id, sender, content)
    }

    fn history<'a>(
        &'a self,
        conversation_id: &'a str,
        after_seq: u64,
    ) -> StoreFuture<'a, Vec<Message>> {
        self.inner.history(conversation_id, after_seq)
    }
}

/// Builder for constructing `GatewayState` in tests with sensible defaults.
pub struct GatewayBuilder {
    config: GatewayConfig,
    conversations: Vec<Conversation>,
    store: Option<Arc<dyn MessageStore>>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self { config: GatewayConfig::test(), conversations: vec![], store: None }
    }

    pub fn conversation(mut self, c: Conversation) -> Self {
        self.conversations.push(c);
        self
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn admin_token(mut self, token: impl Into<String>) -> Self {
        self.config.admin_token = Some(token.into());
        self
    }

    pub fn auth_timeout_ms(mut self, ms: u64) -> Self {
        self.config.auth_timeout_ms = ms;
        self
    }

    pub fn max_message_len(mut self, n: usize) -> Self {
        self.config.max_message_len = n;
        self
    }

    pub fn allow_cancelled_chat(mut self, allow: bool) -> Self {
        self.config.allow_cancelled_chat = allow;
        self
    }

    pub fn build(self) -> Arc<GatewayState> {
        let verifier = Arc::new(JwtVerifier::new(self.config.jwt_secret.as_bytes()));
        let directory = Arc::new(MemoryDirectory::with_conversations(self.conversations));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        Arc::new(GatewayState::new(
            self.config,
            verifier,
            directory,
            store,
            CancellationToken::new(),
        ))
    }
}

/// Issue a one-hour token for `principal` signed with the state's secret.
pub fn token_for(state: &GatewayState, principal: &Principal) -> Result<String, ChatError> {
    JwtVerifier::new(state.config.jwt_secret.as_bytes()).issue(principal, Duration::from_secs(3600))
}

/// Spawn the HTTP/WebSocket server on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_http_server(
    state: Arc<GatewayState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Assert that an expression is `Err` and its message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
