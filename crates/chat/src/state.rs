// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::appointment::{AppointmentDirectory, MemoryDirectory};
use crate::broadcast::BroadcastEngine;
use crate::config::GatewayConfig;
use crate::identity::{IdentityVerifier, JwtVerifier};
use crate::room::RoomRegistry;
use crate::store::jsonl::JsonlStore;
use crate::store::{MemoryStore, MessageStore};

/// Shared gateway state handed to every transport handler.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub directory: Arc<MemoryDirectory>,
    pub registry: Arc<RoomRegistry>,
    pub engine: BroadcastEngine,
    pub store: Arc<dyn MessageStore>,
    pub shutdown: CancellationToken,
    session_count: AtomicUsize,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<dyn IdentityVerifier>,
        directory: Arc<MemoryDirectory>,
        store: Arc<dyn MessageStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let resolver: Arc<dyn AppointmentDirectory> = directory.clone();
        let registry = Arc::new(RoomRegistry::new(resolver, config.liveness_policy()));
        let engine =
            BroadcastEngine::new(Arc::clone(&registry), Arc::clone(&store), config.max_message_len);
        Self {
            config,
            verifier,
            directory,
            registry,
            engine,
            store,
            shutdown,
            session_count: AtomicUsize::new(0),
        }
    }

    /// Open the directory and store named by `config`.
    pub fn from_config(config: GatewayConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let verifier: Arc<dyn IdentityVerifier> =
            Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes()));

        let directory = match config.appointments {
            Some(ref path) => MemoryDirectory::from_file(path)?,
            None => MemoryDirectory::new(),
        };
        tracing::info!(conversations = directory.len(), "appointment directory loaded");

        let store: Arc<dyn MessageStore> = match config.store_dir {
            Some(ref dir) => {
                tracing::info!(dir = %dir.display(), "using jsonl message store");
                Arc::new(JsonlStore::open(dir)?)
            }
            None => {
                tracing::warn!("no --store-dir configured, messages are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::new(config, verifier, Arc::new(directory), store, shutdown))
    }

    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Relaxed)
    }

    pub(crate) fn session_opened(&self) {
        self.session_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.session_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Stop accepting joins and sends, wait for in-flight appends, and tear
    /// down every room.
    pub async fn drain(&self) {
        let rooms = self.registry.close_all().await;
        tracing::info!(rooms, sessions = self.session_count(), "gateway drained");
    }
}
