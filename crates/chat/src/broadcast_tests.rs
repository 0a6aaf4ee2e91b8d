// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use super::*;
use crate::appointment::{LivenessPolicy, MemoryDirectory};
use crate::identity::Principal;
use crate::store::{MemoryStore, StoreFuture};
use crate::test_support::{conversation, doctor, patient, FailingStore};

struct Fixture {
    registry: Arc<RoomRegistry>,
    engine: BroadcastEngine,
}

fn fixture(store: Arc<dyn MessageStore>, max_len: usize) -> Fixture {
    let directory = MemoryDirectory::with_conversations([conversation("apt-1", "doc", "pat")]);
    let registry = Arc::new(RoomRegistry::new(Arc::new(directory), LivenessPolicy::default()));
    let engine = BroadcastEngine::new(Arc::clone(&registry), store, max_len);
    Fixture { registry, engine }
}

fn messages(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<Message> {
    let mut out = vec![];
    while let Ok(event) = rx.try_recv() {
        if let ServerEvent::Message(m) = event {
            out.push(m);
        }
    }
    out
}

/// Store whose appends park until `release` is notified.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    entered: Notify,
    release: Notify,
}

impl MessageStore for GatedStore {
    fn append<'a>(
        &'a self,
        conversation_id: &'a str,
        sender: &'a Principal,
        content: &'a str,
    ) -> StoreFuture<'a, Message> {
        Box::pin(async move {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.append(conversation_id, sender, content).await
        })
    }

    fn history<'a>(
        &'a self,
        conversation_id: &'a str,
        after_seq: u64,
    ) -> StoreFuture<'a, Vec<Message>> {
        self.inner.history(conversation_id, after_seq)
    }
}

#[yare::parameterized(
    empty       = { "", false },
    whitespace  = { " \n\t ", false },
    at_limit    = { "abcde", true },
    over_limit  = { "abcdef", false },
    multibyte   = { "héllo", true },
)]
fn content_validation(content: &str, ok: bool) {
    let result = validate_content(content, 5);
    assert_eq!(result.is_ok(), ok, "{content:?}: {result:?}");
    if let Err(e) = result {
        assert_eq!(e.code, ErrorCode::BadRequest);
    }
}

#[tokio::test]
async fn send_persists_then_delivers_to_everyone() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let fx = fixture(store.clone(), 4000);
    let (doc_tx, mut doc_rx) = mpsc::channel(16);
    let (pat_tx, mut pat_rx) = mpsc::channel(16);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &doc_tx).await?;
    fx.registry.join("apt-1", &patient("pat"), "s2", &pat_tx).await?;

    let sent = fx.engine.send(&doc, "hello").await?;
    assert_eq!(sent.seq, 1);
    assert_eq!(sent.sender_id, "doc");
    assert_eq!(sent.sender_role, crate::identity::Role::Doctor);

    assert_eq!(messages(&mut doc_rx), vec![sent.clone()]);
    assert_eq!(messages(&mut pat_rx), vec![sent.clone()]);
    assert_eq!(store.history("apt-1", 0).await?, vec![sent]);
    Ok(())
}

#[tokio::test]
async fn members_observe_sends_in_order() -> anyhow::Result<()> {
    let fx = fixture(Arc::new(MemoryStore::new()), 4000);
    let (doc_tx, mut doc_rx) = mpsc::channel(64);
    let (pat_tx, mut pat_rx) = mpsc::channel(64);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &doc_tx).await?;
    let pat = fx.registry.join("apt-1", &patient("pat"), "s2", &pat_tx).await?;

    for i in 0..10 {
        let handle = if i % 2 == 0 { &doc } else { &pat };
        fx.engine.send(handle, &format!("m{i}")).await?;
    }

    let seen_by_doc: Vec<u64> = messages(&mut doc_rx).iter().map(|m| m.seq).collect();
    let seen_by_pat: Vec<u64> = messages(&mut pat_rx).iter().map(|m| m.seq).collect();
    assert_eq!(seen_by_doc, (1..=10).collect::<Vec<_>>());
    assert_eq!(seen_by_doc, seen_by_pat);
    Ok(())
}

#[tokio::test]
async fn concurrent_sends_share_one_order() -> anyhow::Result<()> {
    let fx = Arc::new(fixture(Arc::new(MemoryStore::new()), 4000));
    let (doc_tx, mut doc_rx) = mpsc::channel(256);
    let (pat_tx, mut pat_rx) = mpsc::channel(256);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &doc_tx).await?;
    let pat = fx.registry.join("apt-1", &patient("pat"), "s2", &pat_tx).await?;

    let mut tasks = vec![];
    for (handle, who) in [(doc, "doc"), (pat, "pat")] {
        let fx = Arc::clone(&fx);
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                fx.engine.send(&handle, &format!("{who}-{i}")).await?;
            }
            Ok::<_, ChatError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    let by_doc: Vec<String> = messages(&mut doc_rx).into_iter().map(|m| m.id).collect();
    let by_pat: Vec<String> = messages(&mut pat_rx).into_iter().map(|m| m.id).collect();
    assert_eq!(by_doc.len(), 50);
    assert_eq!(by_doc, by_pat);
    Ok(())
}

#[tokio::test]
async fn persist_failure_broadcasts_nothing() -> anyhow::Result<()> {
    let store = Arc::new(FailingStore::new());
    let fx = fixture(store.clone(), 4000);
    let (doc_tx, mut doc_rx) = mpsc::channel(16);
    let (pat_tx, mut pat_rx) = mpsc::channel(16);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &doc_tx).await?;
    fx.registry.join("apt-1", &patient("pat"), "s2", &pat_tx).await?;

    store.set_failing(true);
    let err = fx.engine.send(&doc, "lost").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::PersistFailed));
    assert!(messages(&mut doc_rx).is_empty());
    assert!(messages(&mut pat_rx).is_empty());
    assert!(store.history("apt-1", 0).await?.is_empty());

    store.set_failing(false);
    let ok = fx.engine.send(&doc, "kept").await?;
    assert_eq!(ok.seq, 1);
    Ok(())
}

#[tokio::test]
async fn slow_receiver_does_not_block_sender() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let fx = fixture(store.clone(), 4000);
    let (doc_tx, mut doc_rx) = mpsc::channel(64);
    let (slow_tx, mut slow_rx) = mpsc::channel(2);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &doc_tx).await?;
    fx.registry.join("apt-1", &patient("pat"), "s2", &slow_tx).await?;

    for i in 0..5 {
        fx.engine.send(&doc, &format!("m{i}")).await?;
    }

    assert_eq!(messages(&mut doc_rx).len(), 5);
    // The ack took one slot, so only one message fit.
    assert_eq!(messages(&mut slow_rx).len(), 1);
    assert_eq!(store.history("apt-1", 0).await?.len(), 5);
    Ok(())
}

#[tokio::test]
async fn send_after_leave_is_not_joined() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let fx = fixture(store.clone(), 4000);
    let (tx, _rx) = mpsc::channel(16);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &tx).await?;
    fx.registry.leave(&doc).await;

    let err = fx.engine.send(&doc, "anyone?").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::NotJoined));
    assert!(store.history("apt-1", 0).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn send_during_shutdown_is_rejected() -> anyhow::Result<()> {
    let fx = fixture(Arc::new(MemoryStore::new()), 4000);
    let (tx, _rx) = mpsc::channel(16);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &tx).await?;
    fx.registry.close_all().await;

    let err = fx.engine.send(&doc, "late").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::ShuttingDown));
    Ok(())
}

#[tokio::test]
async fn typing_reaches_only_the_other_participant() -> anyhow::Result<()> {
    let fx = fixture(Arc::new(MemoryStore::new()), 4000);
    let (doc_tx, mut doc_rx) = mpsc::channel(16);
    let (pat_tx, mut pat_rx) = mpsc::channel(16);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &doc_tx).await?;
    fx.registry.join("apt-1", &patient("pat"), "s2", &pat_tx).await?;
    while doc_rx.try_recv().is_ok() {}
    while pat_rx.try_recv().is_ok() {}

    fx.engine.typing(&doc).await?;
    assert!(doc_rx.try_recv().is_err());
    assert_eq!(pat_rx.try_recv().ok(), Some(presence::typing("apt-1", "doc")));
    Ok(())
}

#[tokio::test]
async fn close_all_waits_for_in_flight_append() -> anyhow::Result<()> {
    let store = Arc::new(GatedStore::default());
    let fx = Arc::new(fixture(store.clone(), 4000));
    let (tx, _rx) = mpsc::channel(16);
    let doc = fx.registry.join("apt-1", &doctor("doc"), "s1", &tx).await?;

    let send = {
        let fx = Arc::clone(&fx);
        tokio::spawn(async move { fx.engine.send(&doc, "in flight").await })
    };
    store.entered.notified().await;

    let close = {
        let fx = Arc::clone(&fx);
        tokio::spawn(async move { fx.registry.close_all().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(fx.registry.is_closing());
    assert!(!close.is_finished());

    store.release.notify_one();
    let sent = send.await??;
    assert_eq!(close.await?, 1);
    assert_eq!(store.history("apt-1", 0).await?, vec![sent]);
    Ok(())
}
