use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;
use crate::analysis::{AnalysisGateway, HttpAnalysisGateway};
use crate::api;
use crate::config::{AppConfig, DEFAULT_JWT_SECRET, PersistenceProvider};
use crate::persistence::{MemoryRepository, PostgresProvider, SimulationRepository};
use crate::safety::{InteractionDataset, SafetyEvaluator};
use crate::security::{self, TicketService};
use crate::simulation::SessionServices;
use crate::store::{KvStore, MemoryKvStore, StateStore};

/// Build the session collaborators described by `config`.
///
/// # Errors
///
/// Fails if the Postgres provider cannot connect or migrate, or the HTTP
/// client for the analysis gateway cannot be built.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<SessionServices> {
    let dataset = InteractionDataset::load(
        Path::new(&config.dataset.incompatibility_path),
        Path::new(&config.dataset.relationship_path),
    );
    let evaluator = SafetyEvaluator::new(Arc::new(dataset));

    let background = CancellationToken::new();
    let memory = MemoryKvStore::new();
    memory.spawn_sweeper(config.simulation.sweep_interval(), background.clone());
    let kv: Arc<dyn KvStore> = Arc::new(memory);

    let repository: Arc<dyn SimulationRepository> = match config.persistence.provider {
        PersistenceProvider::Postgres => {
            let url = config.persistence.database_url.as_deref().unwrap_or_default();
            Arc::new(PostgresProvider::new(url).await?)
        }
        PersistenceProvider::Memory => {
            warn!("Using in-memory persistence; saved simulations are lost on restart");
            Arc::new(MemoryRepository::new())
        }
    };

    let gateway: Arc<dyn AnalysisGateway> = Arc::new(HttpAnalysisGateway::new(
        config.analysis.analyze_url.clone(),
        Duration::from_millis(config.analysis.timeout_ms),
        config.analysis.default_dosage.clone(),
    )?);

    Ok(SessionServices {
        tickets: TicketService::new(kv.clone(), config.simulation.ticket_ttl()),
        states: StateStore::new(kv, config.simulation.state_ttl()),
        repository,
        evaluator,
        gateway,
        background,
    })
}

/// Assemble routes and middleware around `state`.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let authenticated = Router::new()
        .route("/api/auth/ws-ticket", post(api::auth::issue_ticket))
        .route("/api/simulation/save", post(api::simulation::save))
        .route("/api/simulation/stats", get(api::simulation::stats))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            security::middleware::auth_middleware,
        ));

    // Disabling the timeout keeps the layer but makes it effectively unbounded.
    let timeout_duration = if config.resilience.timeout_disabled {
        Duration::from_secs(365 * 24 * 60 * 60)
    } else {
        Duration::from_secs(config.resilience.request_timeout_secs)
    };

    Router::new()
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        .route("/api/simulation", get(api::ws::upgrade))
        .route("/api/safety/check", post(api::safety::check))
        .route(
            "/api/safety/relationships/{name}",
            get(api::safety::relationships),
        )
        .route("/api/safety/stats", get(api::safety::stats))
        .merge(authenticated)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            security::rate_limit::rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(
    config: Arc<AppConfig>,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    if config.security.jwt_secret == DEFAULT_JWT_SECRET {
        warn!(
            name: "security.default_secret",
            "JWT secret is the built-in default; set SIM_SECURITY__JWT_SECRET"
        );
    }

    let services = build_services(&config).await?;
    let state = AppState::new(config.clone(), services, metrics);
    let orchestrator = state.orchestrator.clone();
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(name: "server.stopping", "Shutdown signal received");
            orchestrator.shutdown().await;
        })
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
