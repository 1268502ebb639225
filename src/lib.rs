//! Formula simulation service
//!
//! Real-time, ticket-gated sessions in which a user assembles a
//! traditional-medicine prescription and gets immediate compatibility
//! feedback plus debounced deep analysis from an external service.
//!
//! # Modules
//!
//! - [`safety`]: interaction dataset, alias-aware matcher, evaluator
//! - [`simulation`]: session state, wire protocol, orchestrator
//! - [`store`]: shared TTL key-value store and per-user state documents
//! - [`security`]: JWT middleware, one-time tickets, rate limiting
//! - [`analysis`]: external analysis gateway
//! - [`persistence`]: durable simulation records
//! - [`api`] and [`server`]: HTTP and WebSocket surface

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod analysis;
pub mod api;
pub mod config;
pub mod persistence;
pub mod safety;
pub mod security;
pub mod server;
pub mod simulation;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::safety::SafetyEvaluator;
use crate::security::TicketService;
use crate::security::rate_limit::RequestRateLimiter;
use crate::simulation::{SessionOrchestrator, SessionServices};

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Real-time session lifecycle.
    pub orchestrator: SessionOrchestrator,
    /// One-time connection tickets.
    pub tickets: TicketService,
    /// Stateless compatibility checks.
    pub evaluator: SafetyEvaluator,
    /// Global Rate Limiter
    pub rate_limiter: Arc<RequestRateLimiter>,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        services: SessionServices,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let rate_limiter = Arc::new(RequestRateLimiter::new(
            config.resilience.requests_per_second,
            config.resilience.burst_size,
        ));
        let tickets = services.tickets.clone();
        let evaluator = services.evaluator.clone();
        let orchestrator =
            SessionOrchestrator::new(services, config.simulation.orchestrator_settings());

        Self {
            orchestrator,
            tickets,
            evaluator,
            rate_limiter,
            metrics,
            config,
        }
    }
}
