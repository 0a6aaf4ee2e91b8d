// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed append-only message log.
//!
//! One JSONL file per conversation under the store directory. Each append is
//! written and synced before it returns, so a message handed back to the
//! broadcast engine is on disk. A failed append is rolled back to the
//! previous file length. The first access to a log after startup truncates
//! a torn trailing line left by a crash mid-write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::error::ChatError;
use crate::identity::Principal;
use crate::store::{build_message, Cursor, Message, MessageStore, StoreFuture};

/// Idle conversation logs kept in memory before the cache is pruned.
const MAX_CACHED_LOGS: usize = 1024;

/// Per-conversation log state. `cursor` is `None` until the file has been
/// recovered once.
struct ConversationLog {
    path: PathBuf,
    cursor: Option<Cursor>,
}

impl ConversationLog {
    async fn recovered(&mut self) -> Result<Cursor, ChatError> {
        if let Some(cursor) = self.cursor {
            return Ok(cursor);
        }
        let cursor = recover(&self.path).await?;
        self.cursor = Some(cursor);
        Ok(cursor)
    }
}

pub struct JsonlStore {
    dir: PathBuf,
    logs: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ConversationLog>>>>,
    max_cached: usize,
    #[cfg(test)]
    fail_sync: std::sync::atomic::AtomicBool,
}

impl JsonlStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_owned(),
            logs: Mutex::new(HashMap::new()),
            max_cached: MAX_CACHED_LOGS,
            #[cfg(test)]
            fail_sync: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Shared log state for a conversation. Clones are only handed out under
    /// the map lock, so an entry whose only owner is the map is idle and can
    /// be dropped; it is rebuilt from the file on next use.
    fn log(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<ConversationLog>> {
        let mut logs = self.logs.lock();
        if !logs.contains_key(conversation_id) && logs.len() >= self.max_cached {
            logs.retain(|_, log| Arc::strong_count(log) > 1);
        }
        let log = logs.entry(conversation_id.to_owned()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(ConversationLog {
                path: self.dir.join(log_file_name(conversation_id)),
                cursor: None,
            }))
        });
        Arc::clone(log)
    }

    /// Append `line` to the log file and sync it. On any failure the file is
    /// cut back to its length before the append.
    async fn write_line(&self, path: &Path, line: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
        let start = file.metadata().await?.len();

        let result = async {
            file.write_all(line).await?;
            self.sync(&file).await
        }
        .await;

        if let Err(e) = result {
            if let Err(rollback) = file.set_len(start).await {
                tracing::error!(
                    path = %path.display(),
                    err = %rollback,
                    "rollback of failed append failed"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    #[cfg(not(test))]
    async fn sync(&self, file: &tokio::fs::File) -> std::io::Result<()> {
        file.sync_data().await
    }

    #[cfg(test)]
    async fn sync(&self, file: &tokio::fs::File) -> std::io::Result<()> {
        if self.fail_sync.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::other("sync failed"));
        }
        file.sync_data().await
    }
}

/// File name for a conversation log. Anything outside `[A-Za-z0-9_-]` is
/// escaped as `%XX` so ids can never walk out of the store directory.
fn log_file_name(conversation_id: &str) -> String {
    let mut name = String::with_capacity(conversation_id.len() + 6);
    for b in conversation_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            name.push(b as char);
        } else {
            name.push_str(&format!("%{b:02X}"));
        }
    }
    name.push_str(".jsonl");
    name
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, ChatError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
        Err(e) => Err(ChatError::internal(format!("read {}: {e}", path.display()))),
    }
}

/// Length of the prefix made of complete (newline-terminated) lines.
fn complete_len(bytes: &[u8]) -> usize {
    bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1)
}

/// Parse each line on its own. Lines that aren't valid JSON (or valid UTF-8)
/// are skipped.
fn parse_lines(path: &Path, bytes: &[u8]) -> Vec<Message> {
    bytes
        .split(|&b| b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .filter_map(|line| match serde_json::from_slice::<Message>(line) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "skipping corrupt message line");
                None
            }
        })
        .collect()
}

/// Drop a torn trailing line and return the cursor of the last message.
async fn recover(path: &Path) -> Result<Cursor, ChatError> {
    let bytes = read_bytes(path).await?;
    let keep = complete_len(&bytes);
    if keep < bytes.len() {
        tracing::warn!(
            path = %path.display(),
            torn = bytes.len() - keep,
            "truncating torn trailing line"
        );
        truncate(path, keep as u64)
            .await
            .map_err(|e| ChatError::internal(format!("truncate {}: {e}", path.display())))?;
    }
    Ok(parse_lines(path, &bytes[..keep]).last().map(Cursor::of).unwrap_or_default())
}

async fn truncate(path: &Path, len: u64) -> std::io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    file.sync_data().await
}

impl MessageStore for JsonlStore {
    fn append<'a>(
        &'a self,
        conversation_id: &'a str,
        sender: &'a Principal,
        content: &'a str,
    ) -> StoreFuture<'a, Message> {
        Box::pin(async move {
            let log = self.log(conversation_id);
            let mut log = log.lock().await;

            let last = log.recovered().await.map_err(|e| ChatError::persist(e.message))?;
            let message =
                build_message(conversation_id, sender, content, last.next(crate::epoch_ms()));

            let mut line =
                serde_json::to_vec(&message).map_err(|e| ChatError::persist(e.to_string()))?;
            line.push(b'\n');
            if let Err(e) = self.write_line(&log.path, &line).await {
                // Leave the cursor unset so the next append recovers from the file.
                log.cursor = None;
                return Err(ChatError::persist(format!("write {}: {e}", log.path.display())));
            }

            log.cursor = Some(Cursor::of(&message));
            Ok(message)
        })
    }

    fn history<'a>(
        &'a self,
        conversation_id: &'a str,
        after_seq: u64,
    ) -> StoreFuture<'a, Vec<Message>> {
        Box::pin(async move {
            let log = self.log(conversation_id);
            let mut log = log.lock().await;
            log.recovered().await?;
            let bytes = read_bytes(&log.path).await?;
            let mut messages = parse_lines(&log.path, &bytes);
            messages.retain(|m| m.seq > after_seq);
            Ok(messages)
        })
    }
}

#[cfg(test)]
#[path = "jsonl_tests.rs"]
mod tests;
