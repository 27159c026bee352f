//! Analysis session controller.
//!
//! Owns the single in-flight analysis run plus the graph, part list, and
//! history it feeds. Enforces cancel-before-start, idempotent re-entry for
//! an identical in-flight query, append mode for successive queries, and
//! the pause/resume context sub-protocol.
//!
//! Event application is strictly sequential: each event is fully applied
//! to the node map and part list before the next is consumed. Selection
//! notifications are deferred — state is mutated under the lock, then the
//! updates are sent on the broadcast channel in original event order, so
//! subscribers always observe post-mutation state.

use std::sync::Arc;

use futures::future::{AbortHandle, Abortable};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::CircuitForgeError;
use crate::graph::{ComponentNode, GraphBuilder};
use crate::history::HistoryStack;
use crate::parts::{normalize, MergeOutcome, PartKey, PartList, PartRecord};
use crate::protocol::{AnalysisEvent, AnalysisRequest, Position};
use crate::transport::{EventSource, HttpTransport};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Session state machine:
/// `idle -> starting -> streaming -> {idle | paused_for_context}`,
/// with external cancel from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    PausedForContext,
}

/// A mid-stream request from the backend for more user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRequest {
    pub query_id: String,
    pub prompt: String,
}

/// Context supplied by the caller when resuming a paused session.
#[derive(Debug, Clone)]
pub struct ContextReply {
    pub query_id: String,
    pub context: String,
}

/// One analysis query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub provider: String,
    pub context: Option<ContextReply>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            provider: provider.into(),
            context: None,
        }
    }

    /// Answer a pending context request; resumes into the same graph.
    pub fn with_context(mut self, query_id: impl Into<String>, context: impl Into<String>) -> Self {
        self.context = Some(ContextReply {
            query_id: query_id.into(),
            context: context.into(),
        });
        self
    }
}

/// Progress notifications for external collaborators (renderer, exporter,
/// notifier). Sent after the corresponding state mutation, in event order.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Reasoning {
        component_id: String,
        hierarchy_level: u32,
    },
    PartSelected {
        component_id: String,
        part: PartRecord,
        position: Option<Position>,
        base_offset: u32,
        /// Informational: the selection merged into an existing row.
        duplicate: bool,
    },
    Completed {
        total_parts: usize,
        message: Option<String>,
    },
    Failed {
        message: String,
    },
    ContextRequested {
        query_id: String,
        prompt: String,
    },
    Cancelled,
}

/// How a call to [`AnalysisSession::start`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Terminal complete frame observed; carries the authoritative
    /// post-mutation part count.
    Complete { total_parts: usize },
    /// The backend paused the run for more input.
    ContextRequested(ContextRequest),
    /// The run was cancelled or superseded. Benign.
    Cancelled,
    /// Re-entry with the identical in-flight query; nothing happened.
    AlreadyRunning,
}

/// What to do after applying one event.
enum Control {
    Continue,
    Complete { total_parts: usize },
    Failed(String),
    Paused(ContextRequest),
}

struct SessionInner {
    state: SessionState,
    /// Monotonic run sequence; a stale consume loop observes a mismatch
    /// and stops mutating before the next run begins.
    run_seq: u64,
    active_query: Option<String>,
    abort: Option<AbortHandle>,
    pending_context: Option<ContextRequest>,
    graph: GraphBuilder,
    parts: PartList,
    history: HistoryStack,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            run_seq: 0,
            active_query: None,
            abort: None,
            pending_context: None,
            graph: GraphBuilder::new(),
            parts: PartList::new(),
            history: HistoryStack::new(&[]),
        }
    }

    fn finish_run(&mut self) {
        self.state = SessionState::Idle;
        self.active_query = None;
        self.abort = None;
    }

    /// Apply one event to the graph/part list. Returns the deferred
    /// notifications plus the control outcome. Never panics on incomplete
    /// payloads: the normalizer and graph absorb them.
    fn apply_event(&mut self, event: AnalysisEvent) -> (Vec<SessionUpdate>, Control) {
        match event {
            AnalysisEvent::Reasoning {
                component_id,
                component_name,
                reasoning,
                hierarchy_level,
            } => {
                let node = self.graph.apply_reasoning(
                    &component_id,
                    component_name.as_deref(),
                    &reasoning,
                    hierarchy_level,
                );
                let update = SessionUpdate::Reasoning {
                    component_id,
                    hierarchy_level: node.hierarchy_level,
                };
                (vec![update], Control::Continue)
            }
            AnalysisEvent::Selection {
                component_id,
                component_name,
                part_data,
                position,
                hierarchy_level,
            } => {
                let updates = self.apply_selection(
                    &component_id,
                    component_name.as_deref(),
                    &part_data,
                    position,
                    hierarchy_level,
                    None,
                );
                (updates, Control::Continue)
            }
            AnalysisEvent::Complete { message } => {
                // One history entry per completed run (batch semantics).
                let snapshot = self.parts.items().to_vec();
                self.history.save(&snapshot);
                self.finish_run();
                // Authoritative count, read after all mutations landed.
                let total_parts = self.parts.len();
                info!(total_parts, "analysis run complete");
                (
                    vec![SessionUpdate::Completed {
                        total_parts,
                        message,
                    }],
                    Control::Complete { total_parts },
                )
            }
            AnalysisEvent::Error { message } => {
                self.finish_run();
                error!(message = %message, "backend reported analysis error");
                (
                    vec![SessionUpdate::Failed {
                        message: message.clone(),
                    }],
                    Control::Failed(message),
                )
            }
            AnalysisEvent::ContextRequest { query_id, message } => {
                // Halt consumption until the caller restarts with context.
                if let Some(handle) = self.abort.take() {
                    handle.abort();
                }
                self.state = SessionState::PausedForContext;
                let request = ContextRequest {
                    query_id,
                    prompt: message,
                };
                self.pending_context = Some(request.clone());
                info!(query_id = %request.query_id, "paused for context");
                (
                    vec![SessionUpdate::ContextRequested {
                        query_id: request.query_id.clone(),
                        prompt: request.prompt.clone(),
                    }],
                    Control::Paused(request),
                )
            }
        }
    }

    /// Normalize, merge, and attach a selection. The map mutation happens
    /// here; the returned update is emitted afterwards.
    fn apply_selection(
        &mut self,
        component_id: &str,
        label: Option<&str>,
        part_data: &serde_json::Value,
        position: Option<Position>,
        hierarchy_level: u32,
        explicit_offset: Option<u32>,
    ) -> Vec<SessionUpdate> {
        let mut part = normalize(part_data);
        // The event's component id is authoritative over the payload's.
        if !component_id.is_empty() {
            part.component_id = component_id.to_string();
        }
        let key = part.key();
        let base_offset = explicit_offset.unwrap_or_else(|| self.graph.offset());

        let outcome = self.parts.upsert(part);
        let duplicate = outcome.is_duplicate();
        if let MergeOutcome::Merged { quantity } = outcome {
            debug!(component_id, quantity, "duplicate part selection merged");
        }

        let stored = match self.parts.get(&key) {
            Some(record) => record.clone(),
            None => {
                // Unreachable after an upsert, but never worth a panic.
                warn!(component_id, "selection vanished after upsert");
                return Vec::new();
            }
        };

        self.graph.apply_selection(
            &stored.component_id,
            label,
            stored.clone(),
            position,
            hierarchy_level,
            explicit_offset,
        );

        vec![SessionUpdate::PartSelected {
            component_id: stored.component_id.clone(),
            part: stored,
            position,
            base_offset,
            duplicate,
        }]
    }
}

/// The public session handle. Cheap to clone via `Arc` internally; all
/// state lives behind one lock so there is exactly one writer at a time.
pub struct AnalysisSession {
    source: Arc<dyn EventSource>,
    inner: Arc<Mutex<SessionInner>>,
    updates: broadcast::Sender<SessionUpdate>,
    session_id: Uuid,
}

impl AnalysisSession {
    /// Build a session over any event source (scripted sources in tests).
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            source,
            inner: Arc::new(Mutex::new(SessionInner::new())),
            updates,
            session_id: Uuid::new_v4(),
        }
    }

    /// Build a session streaming from an HTTP analysis endpoint.
    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self::new(Arc::new(HttpTransport::new(endpoint)))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Subscribe to deferred progress notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Run one analysis query to completion, pause, or cancellation.
    ///
    /// Semantics:
    /// - identical in-flight query without context: no-op re-entry guard;
    /// - any prior run is aborted first, and its cancellation is observed
    ///   before this run mutates anything;
    /// - a new query appends: prior nodes/parts are kept and hierarchy
    ///   levels are offset above the previous highest selection;
    /// - a matching [`ContextReply`] resumes the paused run into the same
    ///   graph without advancing the offset;
    /// - the graph is only ever cleared by an explicit [`Self::reset`].
    pub async fn start(&self, request: QueryRequest) -> Result<SessionOutcome, CircuitForgeError> {
        let (run, abort_registration, wire_request) = {
            let mut inner = self.inner.lock().await;

            let in_flight = matches!(
                inner.state,
                SessionState::Starting | SessionState::Streaming
            );
            if in_flight
                && inner.active_query.as_deref() == Some(request.query.as_str())
                && request.context.is_none()
            {
                debug!(query = %request.query, "identical query already in flight; ignoring");
                return Ok(SessionOutcome::AlreadyRunning);
            }

            // Cancel-before-start. Bumping run_seq makes any stale consume
            // loop stop mutating before this run begins.
            if let Some(handle) = inner.abort.take() {
                handle.abort();
            }

            let resuming = matches!(
                (&request.context, &inner.pending_context),
                (Some(reply), Some(pending))
                    if inner.state == SessionState::PausedForContext
                        && reply.query_id == pending.query_id
            );
            inner.pending_context = None;
            if resuming {
                info!(query = %request.query, "resuming paused session with supplied context");
            } else {
                // Append mode: never an implicit reset.
                inner.graph.begin_append();
            }

            inner.run_seq += 1;
            inner.state = SessionState::Starting;
            inner.active_query = Some(request.query.clone());

            let (abort_handle, abort_registration) = AbortHandle::new_pair();
            inner.abort = Some(abort_handle);

            let wire_request = AnalysisRequest {
                query: request.query.clone(),
                provider: request.provider.clone(),
                context_query_id: request.context.as_ref().map(|c| c.query_id.clone()),
                context: request.context.as_ref().map(|c| c.context.clone()),
            };
            (inner.run_seq, abort_registration, wire_request)
        };

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let source = Arc::clone(&self.source);
        let transport = tokio::spawn(Abortable::new(
            async move { source.stream_events(wire_request, tx).await },
            abort_registration,
        ));

        {
            let mut inner = self.inner.lock().await;
            if inner.run_seq != run {
                let _ = transport.await;
                return Ok(SessionOutcome::Cancelled);
            }
            inner.state = SessionState::Streaming;
        }

        // Strictly sequential: one event fully applied before the next.
        while let Some(event) = rx.recv().await {
            let applied = {
                let mut inner = self.inner.lock().await;
                if inner.run_seq != run {
                    None
                } else {
                    Some(inner.apply_event(event))
                }
            };

            let (notifications, control) = match applied {
                None => {
                    let _ = transport.await;
                    return Ok(SessionOutcome::Cancelled);
                }
                Some(applied) => applied,
            };

            // Deferred notifications: state is already mutated, order is
            // the original event order.
            for update in notifications {
                let _ = self.updates.send(update);
            }

            match control {
                Control::Continue => {}
                Control::Complete { total_parts } => {
                    let _ = transport.await;
                    return Ok(SessionOutcome::Complete { total_parts });
                }
                Control::Failed(message) => {
                    let _ = transport.await;
                    return Err(CircuitForgeError::Analysis(message));
                }
                Control::Paused(context) => {
                    let _ = transport.await;
                    return Ok(SessionOutcome::ContextRequested(context));
                }
            }
        }

        // The channel closed without a terminal event: the transport ended,
        // failed, or was aborted.
        let result = transport.await;
        let owned = {
            let mut inner = self.inner.lock().await;
            let owned = inner.run_seq == run;
            if owned {
                inner.finish_run();
            }
            owned
        };

        match result {
            // Abort is benign: a restart, cancel(), or reset() raced us.
            Ok(Err(futures::future::Aborted)) => Ok(SessionOutcome::Cancelled),
            Ok(Ok(Err(e))) => {
                if e.is_benign() {
                    return Ok(SessionOutcome::Cancelled);
                }
                if owned {
                    // Exactly one failure surface per failed session.
                    let _ = self.updates.send(SessionUpdate::Failed {
                        message: e.to_string(),
                    });
                }
                Err(e)
            }
            Ok(Ok(Ok(()))) => {
                let e = CircuitForgeError::Network("stream closed unexpectedly".to_string());
                if owned {
                    let _ = self.updates.send(SessionUpdate::Failed {
                        message: e.to_string(),
                    });
                }
                Err(e)
            }
            Err(join_error) => {
                error!(error = %join_error, "transport task failed");
                Err(CircuitForgeError::Network(join_error.to_string()))
            }
        }
    }

    /// Abort the in-flight run, if any. Benign from every state.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.abort.take() {
            handle.abort();
        }
        inner.run_seq += 1;
        inner.state = SessionState::Idle;
        inner.active_query = None;
        inner.pending_context = None;
        info!("session cancelled");
        let _ = self.updates.send(SessionUpdate::Cancelled);
    }

    /// Explicit full reset: cancels any run, destroys every node, zeroes
    /// the hierarchy offset, and clears the part list. Undoable as one
    /// history entry.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        if let Some(handle) = inner.abort.take() {
            handle.abort();
        }
        inner.run_seq += 1;
        inner.state = SessionState::Idle;
        inner.active_query = None;
        inner.pending_context = None;
        inner.graph.reset();
        inner.parts.clear();
        let snapshot = inner.parts.items().to_vec();
        inner.history.save(&snapshot);
        info!("session reset");
    }

    /// Promote every selected node to validated after an external
    /// compatibility check confirmed the selections.
    pub async fn confirm_selections(&self) {
        self.inner.lock().await.graph.mark_selected_validated();
    }

    /// External selection entry point: merge a part into the list and
    /// graph outside of a stream, e.g. from a canvas drop.
    pub async fn on_component_selected(
        &self,
        component_id: &str,
        part_data: &serde_json::Value,
        position: Option<Position>,
        hierarchy_offset: Option<u32>,
    ) {
        let notifications = {
            let mut inner = self.inner.lock().await;
            inner.apply_selection(component_id, None, part_data, position, 0, hierarchy_offset)
        };
        for update in notifications {
            let _ = self.updates.send(update);
        }
    }

    /// Add a part from a raw payload. One history entry.
    pub async fn add_part(&self, raw: &serde_json::Value) -> PartRecord {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let part = normalize(raw);
        let key = part.key();
        inner.parts.upsert(part.clone());
        let snapshot = inner.parts.items().to_vec();
        inner.history.save(&snapshot);
        inner.parts.get(&key).cloned().unwrap_or(part)
    }

    /// Remove a part and detach it from any node referencing it. One
    /// history entry. Returns false when the key is unknown.
    pub async fn remove_part(&self, key: &PartKey) -> bool {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        if inner.parts.remove(key).is_none() {
            return false;
        }
        inner.graph.detach_part(key);
        let snapshot = inner.parts.items().to_vec();
        inner.history.save(&snapshot);
        true
    }

    /// Replace a part's record. The replacement is re-canonicalized so
    /// edits can never smuggle non-canonical numbers into history. One
    /// history entry.
    pub async fn edit_part(&self, key: &PartKey, updated: PartRecord) -> bool {
        let canonical = serde_json::to_value(&updated)
            .map(|v| normalize(&v))
            .unwrap_or(updated);
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        if !inner.parts.replace(key, canonical) {
            return false;
        }
        let snapshot = inner.parts.items().to_vec();
        inner.history.save(&snapshot);
        true
    }

    /// Replace the whole part list (loading a saved design). One history
    /// entry regardless of size.
    pub async fn load_design(&self, parts: Vec<PartRecord>) {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        inner.parts.restore(&parts);
        let snapshot = inner.parts.items().to_vec();
        inner.history.save(&snapshot);
    }

    /// Merge a template's parts into the list. One history entry for the
    /// whole batch.
    pub async fn apply_template(&self, parts: Vec<PartRecord>) {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        for part in parts {
            inner.parts.upsert(part);
        }
        let snapshot = inner.parts.items().to_vec();
        inner.history.save(&snapshot);
    }

    /// Step the part list back one snapshot. Returns false at the oldest.
    pub async fn undo(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        match inner.history.undo() {
            Some(snapshot) => {
                let snapshot = snapshot.to_vec();
                inner.parts.restore(&snapshot);
                true
            }
            None => false,
        }
    }

    /// Step the part list forward one snapshot. Returns false at the newest.
    pub async fn redo(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        match inner.history.redo() {
            Some(snapshot) => {
                let snapshot = snapshot.to_vec();
                inner.parts.restore(&snapshot);
                true
            }
            None => false,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn pending_context(&self) -> Option<ContextRequest> {
        self.inner.lock().await.pending_context.clone()
    }

    /// Snapshot of the current part list.
    pub async fn parts(&self) -> Vec<PartRecord> {
        self.inner.lock().await.parts.items().to_vec()
    }

    /// Nodes sorted by (hierarchy level, insertion order).
    pub async fn nodes(&self) -> Vec<ComponentNode> {
        self.inner
            .lock()
            .await
            .graph
            .nodes_sorted()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn node(&self, id: &str) -> Option<ComponentNode> {
        self.inner.lock().await.graph.get(id).cloned()
    }

    pub async fn highest_hierarchy_level(&self) -> u32 {
        self.inner.lock().await.graph.highest_level()
    }

    pub async fn hierarchy_offset(&self) -> u32 {
        self.inner.lock().await.graph.offset()
    }

    pub async fn can_undo(&self) -> bool {
        self.inner.lock().await.history.can_undo()
    }

    pub async fn can_redo(&self) -> bool {
        self.inner.lock().await.history.can_redo()
    }

    pub async fn total_cost(&self) -> f64 {
        self.inner.lock().await.parts.total_cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_on_component_selected_merges_and_notifies_after_mutation() {
        struct NullSource;
        #[async_trait::async_trait]
        impl EventSource for NullSource {
            async fn stream_events(
                &self,
                _request: AnalysisRequest,
                _events: mpsc::Sender<AnalysisEvent>,
            ) -> Result<(), CircuitForgeError> {
                Ok(())
            }
        }

        let session = AnalysisSession::new(Arc::new(NullSource));
        let mut updates = session.subscribe();

        let raw = json!({"componentId": "U1", "mpn": "LM317", "manufacturer": "TI", "price": 0.5});
        session.on_component_selected("U1", &raw, None, None).await;
        session.on_component_selected("U1", &raw, None, None).await;

        // The notification reflects already-merged state.
        match updates.recv().await.unwrap() {
            SessionUpdate::PartSelected { part, duplicate, .. } => {
                assert_eq!(part.quantity, 1);
                assert!(!duplicate);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        match updates.recv().await.unwrap() {
            SessionUpdate::PartSelected { part, duplicate, .. } => {
                assert_eq!(part.quantity, 2);
                assert!(duplicate);
            }
            other => panic!("unexpected update: {:?}", other),
        }

        let parts = session.parts().await;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].quantity, 2);
    }
}
