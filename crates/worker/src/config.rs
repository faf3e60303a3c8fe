// Worker configuration
// Decision: Read once at process start from the environment (after dotenvy)
// Decision: Optional fields with defaulting accessors so tests can override single values
//
// Environment variables:
// - ENGINE_ADDRESS (fallback TEMPORAL_ADDRESS): engine frontend, default localhost:7233
// - ENGINE_NAMESPACE: default "default"
// - ENGINE_MODE: grpc | memory, default grpc
// - ENGINE_CONNECT_MAX_RETRIES / _INITIAL_DELAY_MS / _MAX_DELAY_MS / _BACKOFF_FACTOR / _JITTER
// - ENGINE_HEALTH_TIMEOUT_MS: single-probe timeout, default 2000
// - ROUTING_CONFIG_PATH / TRIGGER_CONFIG_PATH: optional JSON files
// - GUEST_MESSAGE_QUOTA, SESSION_INACTIVITY_TIMEOUT_SECS, SESSION_CHANNEL_CAPACITY
// - HTTP_ADDR, WORKER_IDENTITY, EVENT_WORKFLOW_ID_PREFIX

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use flowgate_core::routing::RoutingConfig;
use flowgate_core::session::{SessionSettings, TriggerConfig, TriggerTable, DEFAULT_GUEST_QUOTA};
use tracing::info;
use uuid::Uuid;

use crate::retry::RetryPolicy;
use crate::session_actor::SessionRuntimeOptions;

const DEFAULT_ENGINE_ADDRESS: &str = "localhost:7233";
const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:9300";
const DEFAULT_EVENT_PREFIX: &str = "event";
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_millis(2000);

/// Which engine client the worker uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Real engine over gRPC
    #[default]
    Grpc,
    /// In-process engine, no network
    Memory,
}

impl FromStr for EngineMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "grpc" | "temporal" => Ok(EngineMode::Grpc),
            "memory" | "in-memory" => Ok(EngineMode::Memory),
            other => anyhow::bail!("unknown ENGINE_MODE '{other}' (expected grpc or memory)"),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    pub engine_address: Option<String>,
    pub engine_namespace: Option<String>,
    pub engine_mode: EngineMode,
    pub connect_max_retries: Option<u32>,
    pub connect_initial_delay_ms: Option<u64>,
    pub connect_max_delay_ms: Option<u64>,
    pub connect_backoff_factor: Option<f64>,
    pub connect_jitter: Option<f64>,
    pub health_timeout_ms: Option<u64>,
    pub routing_config_path: Option<PathBuf>,
    pub trigger_config_path: Option<PathBuf>,
    pub guest_quota: Option<u32>,
    pub inactivity_timeout_secs: Option<u64>,
    pub channel_capacity: Option<usize>,
    pub http_addr: Option<String>,
    pub worker_identity: Option<String>,
    pub event_workflow_id_prefix: Option<String>,
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {name}='{raw}': {e}")),
        _ => Ok(None),
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl WorkerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            engine_address: env_string("ENGINE_ADDRESS").or_else(|| env_string("TEMPORAL_ADDRESS")),
            engine_namespace: env_string("ENGINE_NAMESPACE"),
            engine_mode: env_parse("ENGINE_MODE")?.unwrap_or_default(),
            connect_max_retries: env_parse("ENGINE_CONNECT_MAX_RETRIES")?,
            connect_initial_delay_ms: env_parse("ENGINE_CONNECT_INITIAL_DELAY_MS")?,
            connect_max_delay_ms: env_parse("ENGINE_CONNECT_MAX_DELAY_MS")?,
            connect_backoff_factor: env_parse("ENGINE_CONNECT_BACKOFF_FACTOR")?,
            connect_jitter: env_parse("ENGINE_CONNECT_JITTER")?,
            health_timeout_ms: env_parse("ENGINE_HEALTH_TIMEOUT_MS")?,
            routing_config_path: env_string("ROUTING_CONFIG_PATH").map(PathBuf::from),
            trigger_config_path: env_string("TRIGGER_CONFIG_PATH").map(PathBuf::from),
            guest_quota: env_parse("GUEST_MESSAGE_QUOTA")?,
            inactivity_timeout_secs: env_parse("SESSION_INACTIVITY_TIMEOUT_SECS")?,
            channel_capacity: env_parse("SESSION_CHANNEL_CAPACITY")?,
            http_addr: env_string("HTTP_ADDR"),
            worker_identity: env_string("WORKER_IDENTITY"),
            event_workflow_id_prefix: env_string("EVENT_WORKFLOW_ID_PREFIX"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the backoff math cannot use
    pub fn validate(&self) -> Result<()> {
        if let Some(factor) = self.connect_backoff_factor {
            anyhow::ensure!(
                factor.is_finite() && factor >= 1.0,
                "invalid ENGINE_CONNECT_BACKOFF_FACTOR={factor}: must be a finite number >= 1.0"
            );
        }
        if let Some(jitter) = self.connect_jitter {
            anyhow::ensure!(
                (0.0..=1.0).contains(&jitter),
                "invalid ENGINE_CONNECT_JITTER={jitter}: must be between 0.0 and 1.0"
            );
        }
        Ok(())
    }

    /// Get engine address with default
    pub fn engine_address(&self) -> String {
        self.engine_address
            .clone()
            .unwrap_or_else(|| DEFAULT_ENGINE_ADDRESS.to_string())
    }

    /// Get engine namespace with default
    pub fn engine_namespace(&self) -> String {
        self.engine_namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    /// Backoff policy for the bootstrap
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::exponential();
        RetryPolicy::exponential()
            .with_max_attempts(self.connect_max_retries.unwrap_or(defaults.max_attempts).max(1))
            .with_initial_interval(
                self.connect_initial_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.initial_interval),
            )
            .with_max_interval(
                self.connect_max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_interval),
            )
            .with_backoff_coefficient(
                self.connect_backoff_factor
                    .unwrap_or(defaults.backoff_coefficient),
            )
            .with_jitter(self.connect_jitter.unwrap_or(defaults.jitter))
    }

    pub fn health_timeout(&self) -> Duration {
        self.health_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_HEALTH_TIMEOUT)
    }

    pub fn guest_quota(&self) -> u32 {
        self.guest_quota.unwrap_or(DEFAULT_GUEST_QUOTA)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INACTIVITY_TIMEOUT)
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY)
            .max(1)
    }

    /// Per-session runtime tuning
    pub fn session_runtime_options(&self) -> SessionRuntimeOptions {
        SessionRuntimeOptions {
            inactivity_timeout: self.inactivity_timeout(),
            channel_capacity: self.channel_capacity(),
        }
    }

    pub fn http_addr(&self) -> String {
        self.http_addr
            .clone()
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
    }

    /// Identity reported to the engine; generated when unset
    pub fn worker_identity(&self) -> String {
        self.worker_identity
            .clone()
            .unwrap_or_else(|| format!("flowgate-worker-{}", Uuid::now_v7()))
    }

    pub fn event_workflow_id_prefix(&self) -> String {
        self.event_workflow_id_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_EVENT_PREFIX.to_string())
    }

    /// Routing configuration from ROUTING_CONFIG_PATH, or the built-in default
    pub fn load_routing_config(&self) -> Result<RoutingConfig> {
        match &self.routing_config_path {
            Some(path) => {
                let config = RoutingConfig::load(path).with_context(|| {
                    format!("Failed to load routing config from {}", path.display())
                })?;
                info!(path = %path.display(), workflows = config.workflows.len(), "Loaded routing configuration");
                Ok(config)
            }
            None => Ok(RoutingConfig::default_routing()),
        }
    }

    /// Trigger table from TRIGGER_CONFIG_PATH, or the built-in default
    pub fn load_trigger_table(&self) -> Result<TriggerTable> {
        match &self.trigger_config_path {
            Some(path) => {
                let config = TriggerConfig::load(path).with_context(|| {
                    format!("Failed to load trigger config from {}", path.display())
                })?;
                let table = TriggerTable::from_config(&config)?;
                info!(path = %path.display(), keywords = table.rules().len(), "Loaded trigger configuration");
                Ok(table)
            }
            None => Ok(TriggerTable::default_table()),
        }
    }

    /// Per-session settings derived from this config
    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(SessionSettings::default()
            .with_guest_quota(self.guest_quota())
            .with_triggers(self.load_trigger_table()?))
    }
}
