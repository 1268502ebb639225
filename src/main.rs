//! Formula simulation server
//!
//! Entry point: loads configuration, installs telemetry and serves the
//! HTTP and WebSocket API until a shutdown signal arrives.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::process::ExitCode;
use std::sync::Arc;

use dotenvy::dotenv;
use tracing::{error, warn};

use formula_sim::config::{AppConfig, LogFormat};
use formula_sim::{server, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init(LogFormat::Compact);
            error!(name: "config.invalid", error = %e, "Configuration error");
            return ExitCode::FAILURE;
        }
    };

    telemetry::init(config.logging.format);

    let metrics = match telemetry::install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable; /metrics disabled");
            None
        }
    };

    if let Err(e) = server::start_server(Arc::new(config), metrics).await {
        error!(name: "server.failed", error = ?e, "Server terminated with error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
