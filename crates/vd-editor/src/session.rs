//! Per-session pipeline and the registry that owns sessions.
//!
//! Each session has exactly one GraphState. Every operation takes the
//! session lock and holds it across the layout await, so at most one
//! layout is in flight per session and later voice turns or manual edits
//! queue behind it. Sessions never share state; a slow layout in one
//! session does not block another.

use crate::sync::{SurfaceEnumeration, SyncReport, apply_manual_edits};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use vd_core::layout::StaleIds;
use vd_core::model::Cleanup;
use vd_core::{
    BatchReport, DecodeError, GraphState, LayoutCoordinator, LayoutError, LayoutResult,
    SyncMessage, decode_actions, deserialize, serialize, snapshot,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("action batch unreadable: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// A mutation's report plus the layout rendered for the resulting state.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome<R> {
    pub report: R,
    pub layout: LayoutResult,
    /// Ids the previous successful layout showed that are gone now.
    pub stale: StaleIds,
}

struct SessionState {
    graph: GraphState,
    /// Last layout handed to the renderer.
    rendered: Option<LayoutResult>,
}

pub struct Session {
    id: String,
    inner: Mutex<SessionState>,
    closed: AtomicBool,
    coordinator: Arc<LayoutCoordinator>,
}

impl Session {
    pub fn new(id: impl Into<String>, coordinator: Arc<LayoutCoordinator>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(SessionState {
                graph: GraphState::new(),
                rendered: None,
            }),
            closed: AtomicBool::new(false),
            coordinator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the session down. Layouts still in flight are discarded.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::info!("session {} closed", self.id);
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(LayoutError::SessionClosed.into());
        }
        Ok(())
    }

    /// Take the session lock. The closed flag is checked again once the
    /// lock is held, since `close()` may have run while this call queued.
    async fn lock(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        self.ensure_open()?;
        let inner = self.inner.lock().await;
        self.ensure_open()?;
        Ok(inner)
    }

    // ─── Operations ──────────────────────────────────────────────────────

    /// Replace the graph with one reconciled from a visual snapshot.
    pub async fn load_snapshot(&self, value: &Value) -> Result<TurnOutcome<()>, SessionError> {
        let mut inner = self.lock().await?;
        inner.graph = snapshot::extract(value);
        self.render(&mut inner, ()).await
    }

    /// Replace the graph with a persisted sync message. The message is
    /// cleaned up on the way in since nothing guarantees its origin.
    pub async fn load_message(
        &self,
        message: &SyncMessage,
    ) -> Result<TurnOutcome<Cleanup>, SessionError> {
        let mut inner = self.lock().await?;
        inner.graph = deserialize(message);
        let cleanup = inner.graph.cleanup();
        self.render(&mut inner, cleanup).await
    }

    /// Decode one utterance's raw batch, apply it, and lay out the result.
    ///
    /// # Errors
    /// An unreadable batch leaves the graph untouched. A layout failure
    /// keeps the applied mutations and the previously rendered layout.
    pub async fn apply_voice_turn(
        &self,
        raw: &str,
    ) -> Result<TurnOutcome<BatchReport>, SessionError> {
        self.ensure_open()?;
        let batch = decode_actions(raw)?;
        let mut inner = self.lock().await?;
        let report = batch.apply(&mut inner.graph);
        self.render(&mut inner, report).await
    }

    pub async fn apply_manual_edit(
        &self,
        surface: &SurfaceEnumeration,
    ) -> Result<TurnOutcome<SyncReport>, SessionError> {
        let mut inner = self.lock().await?;
        let report = apply_manual_edits(&mut inner.graph, surface);
        self.render(&mut inner, report).await
    }

    /// Lay out the current graph again, e.g. after a failed render.
    pub async fn relayout(&self) -> Result<TurnOutcome<()>, SessionError> {
        let mut inner = self.lock().await?;
        self.render(&mut inner, ()).await
    }

    pub async fn export_message(&self) -> SyncMessage {
        serialize(&self.inner.lock().await.graph)
    }

    async fn render<R>(
        &self,
        inner: &mut SessionState,
        report: R,
    ) -> Result<TurnOutcome<R>, SessionError> {
        let layout = self.coordinator.layout(&inner.graph).await?;
        // Teardown raced the engine; nothing may reach the renderer now.
        if self.is_closed() {
            log::debug!("discarding layout for closed session {}", self.id);
            return Err(LayoutError::SessionClosed.into());
        }
        let stale = inner
            .rendered
            .as_ref()
            .map(|previous| layout.stale_ids(previous))
            .unwrap_or_default();
        inner.rendered = Some(layout.clone());
        Ok(TurnOutcome {
            report,
            layout,
            stale,
        })
    }
}

// ─── Registry ────────────────────────────────────────────────────────────

/// All live sessions, keyed by session id.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    coordinator: Arc<LayoutCoordinator>,
}

impl SessionRegistry {
    pub fn new(coordinator: Arc<LayoutCoordinator>) -> Self {
        Self {
            sessions: DashMap::new(),
            coordinator,
        }
    }

    /// The session for `id`, created empty if it does not exist yet.
    pub fn open(&self, id: &str) -> Arc<Session> {
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            log::info!("session {id} opened");
            Arc::new(Session::new(id, Arc::clone(&self.coordinator)))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Remove and close a session. Returns whether it existed.
    pub fn close(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vd_core::{LayeredEngine, LayoutConfig, NodeId};

    const CREATE_ONLY_A: &str =
        r#"[{"actionType":"create_node","id":"only_a","label":"A","nodeType":"box"}]"#;
    const CREATE_GONE: &str =
        r#"[{"actionType":"create_node","id":"gone","label":"G","nodeType":"box"}]"#;

    fn registry() -> SessionRegistry {
        let config = LayoutConfig::default();
        let engine = Arc::new(LayeredEngine::new(config.clone()));
        SessionRegistry::new(Arc::new(LayoutCoordinator::new(engine, config)))
    }

    #[test]
    fn open_is_idempotent() {
        let reg = registry();
        let a = reg.open("alice");
        let again = reg.open("alice");
        assert!(Arc::ptr_eq(&a, &again));
        reg.open("bob");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn close_removes_and_marks_closed() {
        let reg = registry();
        let session = reg.open("carol");
        assert!(reg.close("carol"));
        assert!(session.is_closed());
        assert!(reg.get("carol").is_none());
        assert!(!reg.close("carol"));
    }

    #[tokio::test]
    async fn sessions_do_not_share_graphs() {
        let reg = registry();
        let a = reg.open("s1");
        let b = reg.open("s2");
        a.apply_voice_turn(CREATE_ONLY_A).await.unwrap();
        assert_eq!(a.export_message().await.nodes.len(), 1);
        assert!(b.export_message().await.nodes.is_empty());
    }

    #[tokio::test]
    async fn unreadable_batch_leaves_graph_untouched() {
        let session = registry().open("s3");
        let err = session.apply_voice_turn("I could not understand").await;
        assert!(matches!(err, Err(SessionError::Decode(_))));
        assert!(session.export_message().await.nodes.is_empty());
    }

    #[tokio::test]
    async fn closed_session_refuses_work() {
        let session = registry().open("s4");
        session.close();
        let err = session.relayout().await;
        assert!(matches!(err, Err(SessionError::Layout(LayoutError::SessionClosed))));
    }

    #[tokio::test]
    async fn stale_ids_track_the_previous_render() {
        let session = registry().open("s5");
        let first = session.apply_voice_turn(CREATE_GONE).await.unwrap();
        assert!(first.stale.is_empty());
        let second = session
            .apply_voice_turn(r#"[{"actionType":"delete_node","id":"gone"}]"#)
            .await
            .unwrap();
        assert_eq!(second.stale.nodes, vec![NodeId::intern("gone")]);
        assert!(second.layout.nodes.is_empty());
    }
}
