//! Session orchestrator.
//!
//! Owns the per-user connection lifecycle:
//!
//! ```text
//! HANDSHAKING --ticket ok--> ACTIVE --disconnect / preempt / shutdown--> CLOSED
//!      \--ticket rejected--> CLOSED (1008)
//! ```
//!
//! Each connection is one task running [`SessionOrchestrator::run_connection`].
//! It is the only writer of its user's `SessionState`; debounced analysis
//! runs in a separate task and reports back over the connection's event
//! channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::debounce::DebounceScheduler;
use super::model::{AnalysisResult, Composition, SessionState, SimulationRecord};
use super::protocol::{
    AnalysisErrorPayload, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION, ClientMessage,
    CloseReason, Inbound, Outbound, ServerMessage,
};
use super::registry::{ConnectionHandle, ConnectionRegistry, SessionEvent};
use crate::analysis::{AnalysisError, AnalysisGateway};
use crate::persistence::SimulationRepository;
use crate::safety::{SafetyEvaluator, SafetyVerdict};
use crate::security::TicketService;
use crate::store::StateStore;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection attempt without a ticket")]
    MissingTicket,
    #[error("ticket unknown, expired or already used")]
    InvalidTicket,
    #[error("ticket store unavailable: {0}")]
    Store(anyhow::Error),
}

impl HandshakeError {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::MissingTicket => CloseReason::new(CLOSE_POLICY_VIOLATION, "需要访问票据"),
            Self::InvalidTicket => CloseReason::new(CLOSE_POLICY_VIOLATION, "访问票据无效或已过期"),
            Self::Store(_) => internal_error(),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::MissingTicket => "missing_ticket",
            Self::InvalidTicket => "invalid_ticket",
            Self::Store(_) => "store_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("no simulation state to save")]
    NothingToSave,
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

fn internal_error() -> CloseReason {
    CloseReason::new(CLOSE_INTERNAL_ERROR, "服务器内部错误")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub pending_analyses: usize,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Name given to a brand-new, empty state.
    pub default_name: String,
    pub debounce: Duration,
    /// How long a new connection waits for the one it preempts to stop.
    pub handover_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_name: "我的新方剂".to_string(),
            debounce: Duration::from_millis(300),
            handover_timeout: Duration::from_secs(2),
        }
    }
}

/// Collaborators the orchestrator drives.
#[derive(Debug, Clone)]
pub struct SessionServices {
    pub tickets: TicketService,
    pub states: StateStore,
    pub repository: Arc<dyn SimulationRepository>,
    pub evaluator: SafetyEvaluator,
    pub gateway: Arc<dyn AnalysisGateway>,
    /// Stops background upkeep (such as the store sweeper) on shutdown.
    pub background: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct SessionOrchestrator {
    services: SessionServices,
    settings: Arc<OrchestratorSettings>,
    registry: ConnectionRegistry,
    debounce: DebounceScheduler,
}

/// Send a message to the transport unless the connection is terminated
/// first. `false` means the session must stop: the transport is gone or a
/// stalled client was preempted while the send waited for room.
async fn push(
    handle: &ConnectionHandle,
    outbound: &mpsc::Sender<Outbound>,
    message: ServerMessage,
) -> bool {
    tokio::select! {
        biased;
        () = handle.terminated() => false,
        sent = outbound.send(Outbound::Message(message)) => sent.is_ok(),
    }
}

impl SessionOrchestrator {
    pub fn new(services: SessionServices, settings: OrchestratorSettings) -> Self {
        let debounce = DebounceScheduler::new(settings.debounce);
        Self {
            services,
            settings: Arc::new(settings),
            registry: ConnectionRegistry::new(),
            debounce,
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            active_connections: self.registry.len(),
            pending_analyses: self.debounce.pending(),
        }
    }

    async fn authenticate(&self, ticket: Option<&str>) -> Result<String, HandshakeError> {
        let ticket = ticket
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(HandshakeError::MissingTicket)?;
        self.services
            .tickets
            .consume(ticket)
            .await
            .map_err(HandshakeError::Store)?
            .ok_or(HandshakeError::InvalidTicket)
    }

    /// Drive one connection from handshake to close.
    ///
    /// `inbound` yields client frames; `outbound` carries server frames and
    /// the final close instruction back to the transport. Returns once the
    /// session has fully stopped.
    pub async fn run_connection<S>(
        &self,
        ticket: Option<String>,
        mut inbound: S,
        outbound: mpsc::Sender<Outbound>,
    ) where
        S: Stream<Item = Inbound> + Unpin + Send,
    {
        let user_id = match self.authenticate(ticket.as_deref()).await {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(name: "session.rejected", error = %e, "Handshake rejected");
                metrics::counter!("simulation_handshakes_total", "outcome" => e.outcome())
                    .increment(1);
                let _ = outbound.send(Outbound::Close(e.close_reason())).await;
                return;
            }
        };
        metrics::counter!("simulation_handshakes_total", "outcome" => "accepted").increment(1);

        let (handle, events) = ConnectionHandle::new(&user_id);
        if let Some(previous) = self.registry.register(handle.clone()) {
            info!(
                name: "session.preempted",
                user_id = %user_id,
                previous = %previous.conn_id(),
                conn_id = %handle.conn_id(),
                "Closing older connection for user"
            );
            previous.terminate(CloseReason::preempted());
            if !previous.wait_closed(self.settings.handover_timeout).await {
                warn!(
                    name: "session.handover_timeout",
                    user_id = %user_id,
                    previous = %previous.conn_id(),
                    "Older connection did not stop in time"
                );
            }
        }

        metrics::gauge!("simulation_connections_active").increment(1.0);
        let result = self.drive(&handle, events, &mut inbound, &outbound).await;

        self.debounce.cancel(&user_id, handle.conn_id());
        self.registry.unregister(&user_id, handle.conn_id());
        metrics::gauge!("simulation_connections_active").decrement(1.0);

        let close = match result {
            Ok(()) => handle.close_reason(),
            Err(e) => {
                error!(name: "session.failed", user_id = %user_id, error = %e, "Session aborted");
                Some(internal_error())
            }
        };
        if let Some(reason) = close {
            // A client that stopped reading must not hold up the handover.
            if outbound.try_send(Outbound::Close(reason)).is_err() {
                debug!(user_id = %user_id, "Transport not accepting the close frame");
            }
        }
        handle.mark_closed();
        info!(name: "session.closed", user_id = %user_id, conn_id = %handle.conn_id(), "Session closed");
    }

    async fn drive<S>(
        &self,
        handle: &ConnectionHandle,
        mut events: mpsc::Receiver<SessionEvent>,
        inbound: &mut S,
        outbound: &mpsc::Sender<Outbound>,
    ) -> anyhow::Result<()>
    where
        S: Stream<Item = Inbound> + Unpin + Send,
    {
        let user_id = handle.user_id();
        let mut state = self.initial_state(user_id).await?;

        info!(
            name: "session.active",
            user_id = %user_id,
            conn_id = %handle.conn_id(),
            items = state.composition.len(),
            "Session active"
        );
        if !push(handle, outbound, ServerMessage::InitState(state.clone())).await {
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;
                () = handle.terminated() => return Ok(()),
                Some(event) = events.recv() => {
                    if !self.handle_event(handle, &mut state, event, outbound).await {
                        return Ok(());
                    }
                }
                frame = inbound.next() => match frame {
                    Some(Inbound::Text(text)) => {
                        if !self.handle_frame(handle, &mut state, text.as_bytes(), outbound).await {
                            return Ok(());
                        }
                    }
                    Some(Inbound::Binary(bytes)) => {
                        if !self.handle_frame(handle, &mut state, &bytes, outbound).await {
                            return Ok(());
                        }
                    }
                    Some(Inbound::Closed) | None => return Ok(()),
                },
            }
        }
    }

    /// Shared store first, then the latest durable record, then empty.
    async fn initial_state(&self, user_id: &str) -> anyhow::Result<SessionState> {
        if let Some(state) = self.services.states.load(user_id).await? {
            return Ok(state);
        }

        match self.services.repository.find_latest_for_user(user_id).await {
            Ok(Some(record)) => {
                debug!(user_id, simulation_id = %record.simulation_id, "Hydrating from saved simulation");
                let state = SessionState::from(record);
                self.services.states.save(user_id, &state).await?;
                Ok(state)
            }
            Ok(None) => Ok(SessionState::new(self.settings.default_name.clone())),
            Err(e) => {
                warn!(user_id, error = %e, "Failed to load saved simulation, starting empty");
                Ok(SessionState::new(self.settings.default_name.clone()))
            }
        }
    }

    /// Evaluate on the calling task. A panicking evaluator yields an
    /// unverified verdict instead of a safe one.
    fn evaluate(&self, composition: &Composition) -> SafetyVerdict {
        let evaluator = &self.services.evaluator;
        std::panic::catch_unwind(AssertUnwindSafe(|| evaluator.check(composition))).unwrap_or_else(
            |_| {
                error!(name: "safety.evaluation_failed", "Safety evaluation panicked");
                SafetyVerdict::unverified()
            },
        )
    }

    async fn handle_frame(
        &self,
        handle: &ConnectionHandle,
        state: &mut SessionState,
        frame: &[u8],
        outbound: &mpsc::Sender<Outbound>,
    ) -> bool {
        let user_id = handle.user_id();
        let update = match ClientMessage::parse_bytes(frame) {
            Ok(ClientMessage::UpdateComposition(update)) => update,
            Ok(ClientMessage::Unknown(kind)) => {
                warn!(user_id, kind = %kind, "Ignoring unknown message type");
                return true;
            }
            Err(e) => {
                warn!(user_id, error = %e, "Rejecting malformed message");
                return push(handle, outbound, ServerMessage::error(e.user_message())).await;
            }
        };

        metrics::counter!("simulation_edits_total").increment(1);
        let verdict = self.evaluate(&update.composition);
        if !verdict.is_safe {
            debug!(user_id, warnings = verdict.warnings.len(), "Incompatibility detected");
            metrics::counter!("simulation_safety_warnings_total").increment(1);
        }
        if !push(handle, outbound, ServerMessage::from_verdict(verdict)).await {
            return false;
        }
        // A newer connection owns the shared state once this one is terminated.
        if handle.is_terminated() {
            return false;
        }

        state.apply_update(update);
        if let Err(e) = self.services.states.save(user_id, state).await {
            error!(user_id, error = %e, "Failed to write session state");
        }

        self.schedule_analysis(handle);
        true
    }

    fn schedule_analysis(&self, handle: &ConnectionHandle) {
        let this = self.clone();
        let target = handle.clone();
        self.debounce
            .schedule(handle.user_id(), handle.conn_id(), async move {
                this.run_analysis(&target).await;
            });
    }

    /// Timer body. Reads the latest stored state rather than any state
    /// captured at scheduling time.
    async fn run_analysis(&self, handle: &ConnectionHandle) {
        let user_id = handle.user_id();
        if !self.registry.is_active(user_id, handle.conn_id()) {
            debug!(user_id, "Connection gone, skipping analysis");
            return;
        }

        let state = match self.services.states.load(user_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(user_id, "No stored state, skipping analysis");
                return;
            }
            Err(e) => {
                warn!(user_id, error = %e, "Failed to read state for analysis");
                return;
            }
        };
        if state.composition.is_empty() {
            debug!(user_id, "Empty composition, skipping analysis");
            return;
        }

        let started = Instant::now();
        let outcome = self.services.gateway.analyze(&state.composition).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(_) => {
                info!(name: "analysis.completed", user_id, elapsed_ms, "Analysis completed");
                metrics::counter!("simulation_analysis_total", "outcome" => "ok").increment(1);
            }
            Err(e) => {
                warn!(name: "analysis.failed", user_id, code = e.code(), error = %e, elapsed_ms, "Analysis failed");
                metrics::counter!("simulation_analysis_total", "outcome" => e.code()).increment(1);
            }
        }

        let delivered = handle
            .send(SessionEvent::AnalysisFinished {
                composition: state.composition,
                outcome,
            })
            .await;
        if !delivered {
            debug!(user_id, "Session ended before analysis was delivered");
        }
    }

    async fn handle_event(
        &self,
        handle: &ConnectionHandle,
        state: &mut SessionState,
        event: SessionEvent,
        outbound: &mpsc::Sender<Outbound>,
    ) -> bool {
        let user_id = handle.user_id();
        match event {
            SessionEvent::AnalysisFinished {
                composition,
                outcome,
            } => self
                .deliver_analysis(handle, state, &composition, outcome, outbound)
                .await,
            SessionEvent::Save { formula_id, reply } => {
                let result = self.persist(user_id, state, formula_id).await;
                let _ = reply.send(result);
                true
            }
        }
    }

    async fn deliver_analysis(
        &self,
        handle: &ConnectionHandle,
        state: &mut SessionState,
        composition: &Composition,
        outcome: Result<AnalysisResult, AnalysisError>,
        outbound: &mpsc::Sender<Outbound>,
    ) -> bool {
        let user_id = handle.user_id();
        match outcome {
            Ok(result) => {
                if *composition == state.composition && !handle.is_terminated() {
                    state.analysis = Some(result.clone());
                    if let Err(e) = self.services.states.save(user_id, state).await {
                        error!(user_id, error = %e, "Failed to store analysis");
                    }
                }
                push(handle, outbound, ServerMessage::AiAnalysisResult(result)).await
            }
            Err(e) => {
                push(
                    handle,
                    outbound,
                    ServerMessage::AiAnalysisError(AnalysisErrorPayload::from(&e)),
                )
                .await
            }
        }
    }

    /// Write `state` as a durable record and adopt the record's identity.
    async fn persist(
        &self,
        user_id: &str,
        state: &mut SessionState,
        formula_id: Option<String>,
    ) -> Result<SimulationRecord, SaveError> {
        let record = SimulationRecord::from_state(user_id, state, formula_id);
        let saved = self.services.repository.save(&record).await?;

        state.simulation_id = Some(saved.simulation_id);
        state.formula_id.clone_from(&saved.formula_id);
        if let Err(e) = self.services.states.save(user_id, state).await {
            error!(user_id, error = %e, "Failed to update session state after save");
        }
        info!(name: "simulation.saved", user_id, simulation_id = %saved.simulation_id, "Simulation saved");
        Ok(saved)
    }

    /// Save the user's current state as a durable record.
    ///
    /// With an active session the save runs inside that session's loop so
    /// it cannot interleave with an edit; otherwise it works from the shared
    /// store.
    ///
    /// # Errors
    ///
    /// [`SaveError::NothingToSave`] when the user has no state.
    pub async fn save(
        &self,
        user_id: &str,
        formula_id: Option<String>,
    ) -> Result<SimulationRecord, SaveError> {
        if let Some(handle) = self.registry.get(user_id).filter(|h| !h.is_terminated()) {
            let (reply, response) = oneshot::channel();
            let event = SessionEvent::Save {
                formula_id: formula_id.clone(),
                reply,
            };
            if handle.send(event).await {
                if let Ok(result) = response.await {
                    return result;
                }
            }
            debug!(user_id, "Session ended during save, saving from shared store");
        }

        let Some(mut state) = self.services.states.load(user_id).await? else {
            return Err(SaveError::NothingToSave);
        };
        self.persist(user_id, &mut state, formula_id).await
    }

    /// Close every session with 1001, cancel all pending timers and stop
    /// background upkeep.
    pub async fn shutdown(&self) {
        self.services.background.cancel();
        let timers = self.debounce.cancel_all();
        let handles = self.registry.handles();
        for handle in &handles {
            handle.terminate(CloseReason::shutdown());
        }
        for handle in &handles {
            handle.wait_closed(self.settings.handover_timeout).await;
        }
        info!(
            name: "simulation.shutdown",
            sessions = handles.len(),
            timers,
            "Simulation sessions closed"
        );
    }
}
