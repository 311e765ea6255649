//! Session registry and per-document broadcast fabric.
//!
//! The hub owns every session's outbound sink and the engine for each live
//! document. Engines never hold sinks; they emit through a [`Broadcast`]
//! handle that looks the current subscriber set up through a weak reference,
//! so there is no ownership cycle between hub and engines.

use crate::document::{DocumentSnapshot, DocumentStats, UserInfo};
use crate::engine::{DocumentEngine, EngineConfig, EngineError};
use crate::ot::Op;
use crate::store::SnapshotStore;
use crate::ws::protocol::ServerMessage;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

pub type SessionId = String;

/// Outbound channel depth per session; a session that cannot drain this many
/// messages is treated as dead.
const OUTBOUND_BUFFER: usize = 256;

/// How often idle engines are checked for eviction.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("unknown session")]
    UnknownSession,
    #[error("session has not joined document {0}")]
    UnknownDocument(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Per-session bookkeeping: which document the session is in and how to
/// reach it.
struct SessionInfo {
    document_id: Option<String>,
    sink: mpsc::Sender<ServerMessage>,
}

pub(crate) struct HubInner {
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
    doc_sessions: RwLock<HashMap<String, HashSet<SessionId>>>,
    engines: RwLock<HashMap<String, Arc<DocumentEngine>>>,
    store: Arc<SnapshotStore>,
    config: EngineConfig,
}

/// Routing and fan-out for all connected sessions.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(store: Arc<SnapshotStore>, config: EngineConfig) -> Self {
        let inner = Arc::new(HubInner {
            sessions: RwLock::new(HashMap::new()),
            doc_sessions: RwLock::new(HashMap::new()),
            engines: RwLock::new(HashMap::new()),
            store,
            config,
        });

        // Background sweep for idle engines; exits when the hub is dropped.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                HubInner::evict_idle_engines(&inner).await;
            }
        });

        Self { inner }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.inner.store
    }

    /// Register a new session and hand back its id and outbound stream.
    pub async fn register(&self) -> (SessionId, mpsc::Receiver<ServerMessage>) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.inner.sessions.write().await.insert(
            session_id.clone(),
            SessionInfo {
                document_id: None,
                sink: tx,
            },
        );
        debug!(session_id = %session_id, "session registered");
        (session_id, rx)
    }

    /// Attach a session to a document, creating or loading the engine as
    /// needed. Sends the `document-state` snapshot to the joining session
    /// and presence events to its peers.
    pub async fn join(
        &self,
        session_id: &SessionId,
        document_id: &str,
        user: UserInfo,
    ) -> Result<(), HubError> {
        let previous = {
            let sessions = self.inner.sessions.read().await;
            let info = sessions.get(session_id).ok_or(HubError::UnknownSession)?;
            info.document_id.clone()
        };
        // Re-joining another document implies leaving the current one; a
        // repeat join of the same document just refreshes the session.
        if let Some(prev) = previous {
            if prev != document_id {
                self.leave_document(session_id, &prev).await;
            }
        }

        let engine = self.get_or_create_engine(document_id).await?;
        engine.join(session_id, user).await;
        Ok(())
    }

    /// Route an inbound operation to the session's document engine.
    pub async fn submit_op(
        &self,
        session_id: &SessionId,
        document_id: &str,
        op: Op,
    ) -> Result<(), HubError> {
        let engine = self.engine_for(session_id, document_id).await?;
        engine.enqueue(session_id, op).await?;
        Ok(())
    }

    /// Route a cursor update to the session's document engine.
    pub async fn update_cursor(
        &self,
        session_id: &SessionId,
        document_id: &str,
        cursor: crate::document::CursorState,
    ) -> Result<(), HubError> {
        let engine = self.engine_for(session_id, document_id).await?;
        engine.cursor(session_id, cursor).await;
        Ok(())
    }

    /// Tear a session down: leave its document (flushing queued ops) and
    /// forget its sink.
    pub async fn disconnect(&self, session_id: &SessionId) {
        HubInner::disconnect(&self.inner, session_id).await;
    }

    /// Deliver a message to one session, e.g. an error back to an
    /// originator.
    pub async fn notify(&self, session_id: &SessionId, msg: ServerMessage) {
        let sink = self
            .inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|info| info.sink.clone());
        if let Some(sink) = sink {
            Broadcast::deliver(&self.inner, session_id, &sink, &msg);
        }
    }

    /// Read-only snapshot for the HTTP surface, creating the document lazily
    /// if it does not exist yet.
    pub async fn snapshot(&self, document_id: &str) -> Result<DocumentSnapshot, HubError> {
        if let Some(engine) = self.inner.engines.read().await.get(document_id).cloned() {
            return Ok(engine.snapshot().await);
        }
        let doc = match self.inner.store.load(document_id).await.map_err(EngineError::from)? {
            Some(doc) => doc,
            None => {
                let doc = crate::document::Document::new(document_id, "Untitled", "system");
                self.inner
                    .store
                    .save(&doc, HashMap::new())
                    .await
                    .map_err(EngineError::from)?;
                info!(doc_id = %document_id, "lazily created document");
                doc
            }
        };
        Ok(DocumentSnapshot {
            id: doc.id,
            title: doc.title,
            content: doc.content,
            version: doc.version,
            metadata: doc.metadata,
            active_users: Vec::new(),
        })
    }

    /// Live stats when an engine exists, store-derived otherwise. `None`
    /// means the document does not exist.
    pub async fn stats(&self, document_id: &str) -> Result<Option<DocumentStats>, HubError> {
        if let Some(engine) = self.inner.engines.read().await.get(document_id).cloned() {
            return Ok(Some(engine.stats().await));
        }
        let Some(doc) = self.inner.store.load(document_id).await.map_err(EngineError::from)? else {
            return Ok(None);
        };
        Ok(Some(DocumentStats {
            version: doc.version,
            active_user_count: 0,
            tail_length: doc.operations.len(),
            queued_count: 0,
            updated_at: doc.metadata.updated_at,
            metadata: doc.metadata,
        }))
    }

    /// Force-flush every live engine. Called on shutdown; must complete
    /// within the drain deadline.
    pub async fn drain_all(&self) {
        let engines: Vec<Arc<DocumentEngine>> =
            self.inner.engines.read().await.values().cloned().collect();
        info!(count = engines.len(), "draining engines");
        for engine in engines {
            engine.flush().await;
        }
    }

    async fn engine_for(
        &self,
        session_id: &SessionId,
        document_id: &str,
    ) -> Result<Arc<DocumentEngine>, HubError> {
        let joined = {
            let sessions = self.inner.sessions.read().await;
            let info = sessions.get(session_id).ok_or(HubError::UnknownSession)?;
            info.document_id.as_deref() == Some(document_id)
        };
        if !joined {
            return Err(HubError::UnknownDocument(document_id.to_string()));
        }
        self.inner
            .engines
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| HubError::UnknownDocument(document_id.to_string()))
    }

    async fn leave_document(&self, session_id: &SessionId, document_id: &str) {
        let engine = self.inner.engines.read().await.get(document_id).cloned();
        if let Some(engine) = engine {
            engine.leave(session_id).await;
        }
    }

    async fn get_or_create_engine(
        &self,
        document_id: &str,
    ) -> Result<Arc<DocumentEngine>, HubError> {
        // Check with a read lock first.
        {
            let engines = self.inner.engines.read().await;
            if let Some(engine) = engines.get(document_id) {
                return Ok(engine.clone());
            }
        }

        let mut engines = self.inner.engines.write().await;
        // Double-check: another task may have created it.
        if let Some(engine) = engines.get(document_id) {
            return Ok(engine.clone());
        }

        let broadcast = Broadcast {
            hub: Arc::downgrade(&self.inner),
            document_id: document_id.to_string(),
        };
        let engine = DocumentEngine::open(
            document_id,
            self.inner.store.clone(),
            self.inner.config.clone(),
            broadcast,
        )
        .await?;
        engines.insert(document_id.to_string(), engine.clone());
        Ok(engine)
    }
}

impl HubInner {
    async fn disconnect(inner: &Arc<HubInner>, session_id: &SessionId) {
        let info = inner.sessions.write().await.remove(session_id);
        let Some(info) = info else { return };

        if let Some(doc_id) = info.document_id {
            let engine = inner.engines.read().await.get(&doc_id).cloned();
            if let Some(engine) = engine {
                engine.leave(session_id).await;
            }
        }
        debug!(session_id = %session_id, "session disconnected");
    }

    async fn evict_idle_engines(inner: &Arc<HubInner>) {
        let candidates: Vec<(String, Arc<DocumentEngine>)> = inner
            .engines
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();

        for (doc_id, engine) in candidates {
            if !engine.is_evictable(inner.config.idle_eviction).await {
                continue;
            }
            engine.flush().await;
            // Re-check under the write lock: a session may have joined
            // while the flush ran.
            let mut engines = inner.engines.write().await;
            if engine.is_evictable(inner.config.idle_eviction).await {
                engines.remove(&doc_id);
                info!(doc_id = %doc_id, "evicted idle engine");
            }
        }
    }
}

/// Opaque emit handle held by a document engine. Fan-out copies the
/// subscriber list before sending and never blocks on a slow sink; a sink
/// that is closed or full is treated as disconnected.
pub struct Broadcast {
    hub: Weak<HubInner>,
    document_id: String,
}

impl Broadcast {
    /// Subscribe a session to this document's emissions.
    pub(crate) async fn attach(&self, session_id: &SessionId) {
        let Some(hub) = self.hub.upgrade() else { return };
        hub.doc_sessions
            .write()
            .await
            .entry(self.document_id.clone())
            .or_default()
            .insert(session_id.clone());
        if let Some(info) = hub.sessions.write().await.get_mut(session_id) {
            info.document_id = Some(self.document_id.clone());
        };
    }

    /// Remove a session from this document's subscriber set.
    pub(crate) async fn detach(&self, session_id: &SessionId) {
        let Some(hub) = self.hub.upgrade() else { return };
        if let Some(set) = hub.doc_sessions.write().await.get_mut(&self.document_id) {
            set.remove(session_id);
        }
        if let Some(info) = hub.sessions.write().await.get_mut(session_id) {
            if info.document_id.as_deref() == Some(self.document_id.as_str()) {
                info.document_id = None;
            }
        };
    }

    pub(crate) async fn to_session(&self, session_id: &SessionId, msg: &ServerMessage) {
        let Some(hub) = self.hub.upgrade() else { return };
        let sink = hub
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|info| info.sink.clone());
        if let Some(sink) = sink {
            Self::deliver(&hub, session_id, &sink, msg);
        }
    }

    /// Send to every subscriber of this document.
    pub(crate) async fn to_all(&self, msg: &ServerMessage) {
        self.fan_out(None, msg).await;
    }

    /// Send to every subscriber except the originator.
    pub(crate) async fn to_peers(&self, origin: &SessionId, msg: &ServerMessage) {
        self.fan_out(Some(origin), msg).await;
    }

    async fn fan_out(&self, skip: Option<&SessionId>, msg: &ServerMessage) {
        let Some(hub) = self.hub.upgrade() else { return };

        // Copy the subscriber set so no lock is held across sends.
        let subscribers: Vec<SessionId> = match hub.doc_sessions.read().await.get(&self.document_id)
        {
            Some(set) => set
                .iter()
                .filter(|id| skip != Some(*id))
                .cloned()
                .collect(),
            None => return,
        };

        let sinks: Vec<(SessionId, mpsc::Sender<ServerMessage>)> = {
            let sessions = hub.sessions.read().await;
            subscribers
                .into_iter()
                .filter_map(|id| sessions.get(&id).map(|info| (id, info.sink.clone())))
                .collect()
        };

        for (session_id, sink) in sinks {
            Self::deliver(&hub, &session_id, &sink, msg);
        }
    }

    fn deliver(
        hub: &Arc<HubInner>,
        session_id: &SessionId,
        sink: &mpsc::Sender<ServerMessage>,
        msg: &ServerMessage,
    ) {
        if sink.try_send(msg.clone()).is_err() {
            warn!(session_id = %session_id, "sink unavailable, disconnecting session");
            let hub = hub.clone();
            let session_id = session_id.clone();
            // Tear-down re-enters the engine; run it outside the caller's
            // critical section.
            tokio::spawn(async move {
                HubInner::disconnect(&hub, &session_id).await;
            });
        }
    }
}
