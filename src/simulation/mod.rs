//! Real-time simulation sessions.
//!
//! # Architecture
//!
//! - [`model`]: composition and session state
//! - [`protocol`]: client/server message types and close reasons
//! - [`debounce`]: per-user cancelable analysis timers
//! - [`registry`]: one active connection per user
//! - [`orchestrator`]: handshake, per-connection loop, analysis, save

pub mod debounce;
pub mod model;
pub mod orchestrator;
pub mod protocol;
pub mod registry;

pub use model::{AnalysisResult, Composition, CompositionItem, SessionState, SimulationRecord};
pub use orchestrator::{
    ConnectionStats, HandshakeError, OrchestratorSettings, SaveError, SessionOrchestrator,
    SessionServices,
};
pub use protocol::{ClientMessage, CloseReason, Inbound, Outbound, ServerMessage};
