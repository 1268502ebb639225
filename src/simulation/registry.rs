//! Active-connection registry.
//!
//! Holds at most one [`ConnectionHandle`] per user. The handle is the only
//! way other tasks reach a session: they can ask it to terminate, wait for
//! it to finish, or post it a [`SessionEvent`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::model::{Composition, SimulationRecord};
use super::orchestrator::SaveError;
use super::protocol::CloseReason;
use crate::analysis::AnalysisError;
use crate::simulation::model::AnalysisResult;

/// Work posted to a session loop by other tasks.
#[derive(Debug)]
pub enum SessionEvent {
    /// A debounced analysis finished for `composition`.
    AnalysisFinished {
        composition: Composition,
        outcome: Result<AnalysisResult, AnalysisError>,
    },
    /// Persist the session's current state as a durable record.
    Save {
        formula_id: Option<String>,
        reply: oneshot::Sender<Result<SimulationRecord, SaveError>>,
    },
}

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    user_id: String,
    kick: CancellationToken,
    closed: CancellationToken,
    close_reason: Arc<OnceLock<CloseReason>>,
    events: mpsc::Sender<SessionEvent>,
}

impl ConnectionHandle {
    /// New handle plus the receiving end of its event channel.
    pub fn new(user_id: &str) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = Self {
            conn_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kick: CancellationToken::new(),
            closed: CancellationToken::new(),
            close_reason: Arc::new(OnceLock::new()),
            events,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Ask the session to close with `reason`. The first reason wins.
    pub fn terminate(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.kick.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.kick.is_cancelled()
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        self.kick.cancelled().await;
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().cloned()
    }

    /// Called by the session loop once it has stopped.
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Wait for the session loop to stop, up to `timeout`.
    /// Returns `false` on timeout.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.closed.cancelled())
            .await
            .is_ok()
    }

    /// Post an event. Returns `false` when the session has gone away.
    pub async fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Map of user id to the connection currently active for that user.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the active connection for its user, returning the one
    /// it replaced.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.user_id.clone(), handle)
    }

    /// Remove the entry for `user_id` only if it still belongs to `conn_id`.
    pub fn unregister(&self, user_id: &str, conn_id: Uuid) -> bool {
        self.connections
            .remove_if(user_id, |_, h| h.conn_id == conn_id)
            .is_some()
    }

    pub fn get(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections.get(user_id).map(|h| h.clone())
    }

    /// Whether `conn_id` is still the live connection for `user_id`.
    pub fn is_active(&self, user_id: &str, conn_id: Uuid) -> bool {
        self.connections
            .get(user_id)
            .is_some_and(|h| h.conn_id == conn_id && !h.is_terminated())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of every registered handle.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces_and_unregister_checks_owner() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = ConnectionHandle::new("u1");
        let (second, _rx2) = ConnectionHandle::new("u1");

        assert!(registry.register(first.clone()).is_none());
        let replaced = registry.register(second.clone()).unwrap();
        assert_eq!(replaced.conn_id(), first.conn_id());

        assert!(!registry.unregister("u1", first.conn_id()));
        assert!(registry.is_active("u1", second.conn_id()));
        assert!(registry.unregister("u1", second.conn_id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_terminated_handle_is_not_active() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new("u1");
        registry.register(handle.clone());

        handle.terminate(CloseReason::preempted());
        handle.terminate(CloseReason::shutdown());
        assert!(!registry.is_active("u1", handle.conn_id()));
        assert_eq!(handle.close_reason(), Some(CloseReason::preempted()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_closed() {
        let (handle, _rx) = ConnectionHandle::new("u1");
        assert!(!handle.wait_closed(Duration::from_millis(10)).await);
        handle.mark_closed();
        assert!(handle.wait_closed(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::new("u1");
        drop(rx);
        let (reply, _) = oneshot::channel();
        assert!(
            !handle
                .send(SessionEvent::Save {
                    formula_id: None,
                    reply
                })
                .await
        );
    }
}
