//! Per-document collaboration engine.
//!
//! One engine owns one document: its canonical content, the bounded tail of
//! applied ops, the pending queue, and the presence map. Every public method
//! locks the single state mutex, so all work on a document is serialized.
//!
//! Inbound ops follow a two-phase path: an optimistic `operation-immediate`
//! echo to peers right away, then a debounced canonical flush that merges,
//! transforms, applies, persists, and broadcasts `document-sync` to
//! everyone. Clients treat the sync as authoritative and reconcile any
//! optimistic state against it.

use crate::document::{
    now_ms, CursorState, Document, DocumentSnapshot, DocumentStats, Presence, UserInfo,
};
use crate::hub::{Broadcast, SessionId};
use crate::ot::{self, Op, OpValidationError};
use crate::store::{SnapshotStore, StoreError};
use crate::ws::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tunables for every engine the hub creates.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long inbound ops accumulate before one canonical flush.
    pub debounce: Duration,
    /// Applied ops retained for rebasing optimistic echoes.
    pub tail_size: usize,
    /// How long a session-less engine stays resident before eviction.
    pub idle_eviction: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            tail_size: 10,
            idle_eviction: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid operation: {0}")]
    InvalidOperation(#[from] OpValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct EngineState {
    doc: Document,
    queue: Vec<Op>,
    debounce: Option<JoinHandle<()>>,
    presence: HashMap<SessionId, Presence>,
    last_activity: Instant,
    last_saved: u64,
}

pub struct DocumentEngine {
    doc_id: String,
    store: Arc<SnapshotStore>,
    config: EngineConfig,
    broadcast: Broadcast,
    state: Mutex<EngineState>,
}

impl DocumentEngine {
    /// Load the document from the store, creating and persisting an empty
    /// record if none exists (or the snapshot is unusable).
    pub async fn open(
        doc_id: &str,
        store: Arc<SnapshotStore>,
        config: EngineConfig,
        broadcast: Broadcast,
    ) -> Result<Arc<Self>, EngineError> {
        let doc = match store.load(doc_id).await? {
            Some(doc) => doc,
            None => {
                let doc = Document::new(doc_id, "Untitled", "system");
                store.save(&doc, HashMap::new()).await?;
                info!(doc_id = %doc_id, "created fresh document");
                doc
            }
        };

        Ok(Arc::new(Self {
            doc_id: doc_id.to_string(),
            store,
            config,
            broadcast,
            state: Mutex::new(EngineState {
                doc,
                queue: Vec::new(),
                debounce: None,
                presence: HashMap::new(),
                last_activity: Instant::now(),
                last_saved: 0,
            }),
        }))
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Attach a session: record presence, subscribe it to emissions, send it
    /// the initial snapshot, and announce it to peers.
    pub async fn join(&self, session_id: &SessionId, user: UserInfo) {
        let mut state = self.state.lock().await;
        let now = now_ms();

        let presence = Presence::new(&user, now);
        state.doc.metadata.last_accessed_at = now;
        state.doc.metadata.last_accessed_by = presence.user_id.clone();
        state
            .presence
            .insert(session_id.clone(), presence.clone());
        state.last_activity = Instant::now();

        self.broadcast.attach(session_id).await;

        let snapshot = ServerMessage::DocumentState {
            id: state.doc.id.clone(),
            title: state.doc.title.clone(),
            content: state.doc.content.clone(),
            version: state.doc.version,
            metadata: state.doc.metadata.clone(),
            active_users: state.presence.values().cloned().collect(),
        };
        self.broadcast.to_session(session_id, &snapshot).await;

        self.broadcast
            .to_all(&ServerMessage::UserJoined {
                user: presence,
                socket_id: session_id.clone(),
            })
            .await;
        self.broadcast
            .to_all(&ServerMessage::UsersUpdated {
                active_users: state.presence.values().cloned().collect(),
            })
            .await;

        info!(doc_id = %self.doc_id, session_id = %session_id, "session joined");
    }

    /// Detach a session. Queued ops are flushed first so the departing
    /// user's edits are applied and persisted before `user-left` goes out.
    pub async fn leave(&self, session_id: &SessionId) {
        let mut state = self.state.lock().await;

        if !state.queue.is_empty() {
            self.flush_locked(&mut state).await;
        } else if let Some(timer) = state.debounce.take() {
            timer.abort();
        }

        self.broadcast.detach(session_id).await;
        let Some(presence) = state.presence.remove(session_id) else {
            return;
        };
        state.last_activity = Instant::now();

        self.broadcast
            .to_all(&ServerMessage::UserLeft {
                user: presence,
                socket_id: session_id.clone(),
            })
            .await;
        self.broadcast
            .to_all(&ServerMessage::UsersUpdated {
                active_users: state.presence.values().cloned().collect(),
            })
            .await;

        info!(doc_id = %self.doc_id, session_id = %session_id, "session left");
    }

    /// Accept an inbound op: validate, echo an optimistically transformed
    /// copy to peers, enqueue the original, and re-arm the flush timer.
    pub async fn enqueue(
        self: Arc<Self>,
        session_id: &SessionId,
        mut op: Op,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;

        // The session is authoritative for attribution, not the wire op.
        if let Some(presence) = state.presence.get(session_id) {
            op.user_id = presence.user_id.clone();
        }
        op.client_id = session_id.clone();

        op.validate(state.doc.content_len())?;

        // Redundant redelivery of an op already queued or applied.
        if state.queue.iter().any(|q| q.id == op.id)
            || state.doc.operations.iter().any(|t| t.id == op.id)
        {
            debug!(doc_id = %self.doc_id, op_id = %op.id, "duplicate op ignored");
            return Ok(());
        }

        match ot::transform_against(&op, &state.doc.operations) {
            None => {
                // Cancelled outright by an already-applied op.
                debug!(doc_id = %self.doc_id, op_id = %op.id, "op absorbed by tail");
                return Ok(());
            }
            Some(echo) => {
                let temp_content = ot::apply(&state.doc.content, &echo);
                let user = state
                    .presence
                    .get(session_id)
                    .cloned()
                    .unwrap_or_else(|| Presence::new(&UserInfo::default(), now_ms()));
                self.broadcast
                    .to_peers(
                        session_id,
                        &ServerMessage::OperationImmediate {
                            operation: echo,
                            temp_content,
                            user,
                        },
                    )
                    .await;
            }
        }

        state.queue.push(op);
        state.last_activity = Instant::now();

        if let Some(timer) = state.debounce.take() {
            timer.abort();
        }
        let engine = Arc::downgrade(&self);
        let delay = self.config.debounce;
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                engine.flush().await;
            }
        }));

        Ok(())
    }

    /// Update a session's cursor and fan it out to peers.
    pub async fn cursor(&self, session_id: &SessionId, cursor: CursorState) {
        let mut state = self.state.lock().await;
        let now = now_ms();

        let Some(presence) = state.presence.get_mut(session_id) else {
            return;
        };
        presence.cursor = cursor.clone();
        presence.last_cursor_update = now;
        let user = presence.clone();

        self.broadcast
            .to_peers(
                session_id,
                &ServerMessage::CursorUpdate {
                    user,
                    cursor,
                    timestamp: now,
                },
            )
            .await;
    }

    /// Canonically apply the queued batch. Safe to call at any time; a
    /// quiet engine is a no-op.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await;
    }

    async fn flush_locked(&self, state: &mut EngineState) {
        if let Some(timer) = state.debounce.take() {
            timer.abort();
        }
        if state.queue.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut state.queue);
        let batch_len = batch.len();

        // Coalesce each user's burst, then order the whole batch by time.
        let mut groups: HashMap<String, Vec<Op>> = HashMap::new();
        for op in batch {
            groups.entry(op.user_id.clone()).or_default().push(op);
        }
        let mut merged: Vec<Op> = groups.into_values().flat_map(ot::merge_batch).collect();
        merged.sort_by(|a, b| {
            (a.timestamp, a.user_id.as_str()).cmp(&(b.timestamp, b.user_id.as_str()))
        });

        // Sequentially rebase each op past the ones already applied this
        // batch, applying to a scratch copy so a bad batch never corrupts
        // the canonical content.
        let next_version = state.doc.version + 1;
        let mut text = state.doc.content.clone();
        let mut applied: Vec<Op> = Vec::new();
        for op in merged {
            let Some(mut transformed) = ot::transform_against(&op, &applied) else {
                debug!(doc_id = %self.doc_id, op_id = %op.id, "op absorbed in flush");
                continue;
            };
            if let Err(e) = transformed.validate(text.chars().count()) {
                // The batch no longer agrees with itself. Abort it whole:
                // canonical state is untouched and the queue stays dropped.
                error!(
                    doc_id = %self.doc_id,
                    op_id = %transformed.id,
                    error = %e,
                    "transformed op failed validation, dropping batch"
                );
                self.broadcast
                    .to_all(&ServerMessage::error(
                        "internal transform failure; pending batch dropped",
                    ))
                    .await;
                return;
            }
            text = ot::apply(&text, &transformed);
            transformed.applied = true;
            transformed.version = next_version;
            applied.push(transformed);
        }

        if applied.is_empty() {
            debug!(doc_id = %self.doc_id, batch_len, "batch fully absorbed");
            return;
        }

        // Commit.
        state.doc.content = text;
        state.doc.version = next_version;
        if let Some(last) = applied.last() {
            state.doc.metadata.last_modified_by = last.user_id.clone();
        }
        state.doc.metadata.updated_at = now_ms();
        let content = state.doc.content.clone();
        state.doc.metadata.refresh_counts(&content);
        state.doc.operations.extend(applied.iter().cloned());
        let tail_size = self.config.tail_size;
        if state.doc.operations.len() > tail_size {
            let excess = state.doc.operations.len() - tail_size;
            state.doc.operations.drain(..excess);
        }

        match self.store.save(&state.doc, state.presence.clone()).await {
            Ok(()) => state.last_saved = now_ms(),
            Err(e) => {
                // Non-fatal: live clients stay consistent and the next
                // flush retries the write.
                warn!(
                    doc_id = %self.doc_id,
                    error = %e,
                    last_saved = state.last_saved,
                    "snapshot save failed, retaining in memory"
                );
            }
        }

        self.broadcast
            .to_all(&ServerMessage::DocumentSync {
                content: state.doc.content.clone(),
                version: state.doc.version,
                operations: applied.clone(),
                metadata: state.doc.metadata.clone(),
            })
            .await;
        state.last_activity = Instant::now();

        debug!(
            doc_id = %self.doc_id,
            version = state.doc.version,
            batch_len,
            applied = applied.len(),
            "flushed batch"
        );
    }

    /// Read-only view for the metadata API.
    pub async fn snapshot(&self) -> DocumentSnapshot {
        let state = self.state.lock().await;
        DocumentSnapshot {
            id: state.doc.id.clone(),
            title: state.doc.title.clone(),
            content: state.doc.content.clone(),
            version: state.doc.version,
            metadata: state.doc.metadata.clone(),
            active_users: state.presence.values().cloned().collect(),
        }
    }

    pub async fn stats(&self) -> DocumentStats {
        let state = self.state.lock().await;
        DocumentStats {
            version: state.doc.version,
            active_user_count: state.presence.len(),
            tail_length: state.doc.operations.len(),
            queued_count: state.queue.len(),
            updated_at: state.doc.metadata.updated_at,
            metadata: state.doc.metadata.clone(),
        }
    }

    /// True when the engine has no sessions, nothing queued, and has been
    /// quiet for at least `ttl`.
    pub async fn is_evictable(&self, ttl: Duration) -> bool {
        let state = self.state.lock().await;
        state.presence.is_empty() && state.queue.is_empty() && state.last_activity.elapsed() >= ttl
    }
}
