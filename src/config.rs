use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::simulation::OrchestratorSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Require JWT authentication
    #[arg(long, env = "JWT_REQUIRED")]
    pub jwt_required: Option<bool>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Quiet period before a composition is analysed
    #[arg(long, env = "DEBOUNCE_MS")]
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub resilience: ResilienceConfig,
    pub persistence: PersistenceConfig,
    pub simulation: SimulationConfig,
    pub analysis: AnalysisConfig,
    pub dataset: DatasetConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub jwt_required: bool,
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub timeout_disabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceProvider {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    pub provider: PersistenceProvider,
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    pub ticket_ttl_secs: u64,
    pub state_ttl_secs: u64,
    pub debounce_ms: u64,
    pub handover_timeout_ms: u64,
    /// How often expired tickets and states are dropped from the store.
    pub sweep_interval_secs: u64,
    pub default_name: String,
}

impl SimulationConfig {
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_secs)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            default_name: self.default_name.clone(),
            debounce: Duration::from_millis(self.debounce_ms),
            handover_timeout: Duration::from_millis(self.handover_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    pub analyze_url: String,
    pub timeout_ms: u64,
    pub default_dosage: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub incompatibility_path: String,
    pub relationship_path: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

pub const DEFAULT_JWT_SECRET: &str = "change-me";

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Layering, lowest to highest: defaults, config file, `SIM_*`
    /// environment, CLI flags (or their plain env vars).
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("security.jwt_required", true)?
            .set_default("security.jwt_secret", DEFAULT_JWT_SECRET)?
            .set_default("resilience.rate_limit_enabled", true)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.requests_per_second", 5)?
            .set_default("resilience.burst_size", 10)?
            .set_default("resilience.request_timeout_secs", 30)?
            .set_default("persistence.provider", "memory")?
            .set_default("simulation.ticket_ttl_secs", 30)?
            .set_default("simulation.state_ttl_secs", 3600)?
            .set_default("simulation.debounce_ms", 300)?
            .set_default("simulation.handover_timeout_ms", 2000)?
            .set_default("simulation.sweep_interval_secs", 60)?
            .set_default("simulation.default_name", "我的新方剂")?
            .set_default(
                "analysis.analyze_url",
                "http://localhost:5001/analyze/composition",
            )?
            .set_default("analysis.timeout_ms", 10_000)?
            .set_default("analysis.default_dosage", "10g")?
            .set_default("dataset.incompatibility_path", "data/incompatibilities.json")?
            .set_default("dataset.relationship_path", "data/relationships.json")?
            .set_default("logging.format", "compact")?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // e.g. SIM_SIMULATION__DEBOUNCE_MS=500
        builder = builder.add_source(
            Environment::with_prefix("SIM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(required) = cli.jwt_required {
            builder = builder.set_override("security.jwt_required", required)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }
        if let Some(ms) = cli.debounce_ms {
            let ms = i64::try_from(ms)
                .map_err(|e| config::ConfigError::Message(format!("debounce_ms: {e}")))?;
            builder = builder.set_override("simulation.debounce_ms", ms)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.persistence.provider == PersistenceProvider::Postgres
            && self
                .persistence
                .database_url
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(config::ConfigError::Message(
                "persistence.database_url is required for the postgres provider".to_string(),
            ));
        }
        if self.simulation.ticket_ttl_secs == 0 || self.simulation.state_ttl_secs == 0 {
            return Err(config::ConfigError::Message(
                "simulation TTLs must be positive".to_string(),
            ));
        }
        if self.simulation.sweep_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "simulation.sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
