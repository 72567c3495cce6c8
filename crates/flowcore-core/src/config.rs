//! FlowCore configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlowError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub cascade: CascadeSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub events: EventSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl FlowConfig {
    /// Load config from the default path (~/.flowcore/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FlowError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FlowError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the FlowCore home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowcore")
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cascade.jitter) {
            return Err(FlowError::Config(format!(
                "cascade.jitter must be within [0, 1], got {}",
                self.cascade.jitter
            )));
        }
        if self.executor.max_concurrency == 0 {
            return Err(FlowError::Config(
                "executor.max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Cascade defaults. Timeouts are keyed by tier name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeSettings {
    #[serde(default = "default_tier_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default)]
    pub total_timeout_secs: Option<u64>,
    #[serde(default = "default_tier_timeouts")]
    pub tier_timeouts_secs: BTreeMap<String, u64>,
}

fn default_tier_timeouts() -> BTreeMap<String, u64> {
    [
        ("code", 5),
        ("deterministic", 5),
        ("generative", 30),
        ("inferred", 30),
        ("agentic", 300),
        ("human", 86_400),
    ]
    .into_iter()
    .map(|(name, secs)| (name.to_string(), secs))
    .collect()
}
fn default_tier_timeout_secs() -> u64 { 30 }
fn default_max_retries() -> u32 { 2 }
fn default_base_delay_ms() -> u64 { 200 }
fn default_max_delay_ms() -> u64 { 10_000 }
fn default_jitter() -> f64 { 0.1 }

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tier_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            total_timeout_secs: None,
            tier_timeouts_secs: default_tier_timeouts(),
        }
    }
}

impl CascadeSettings {
    pub fn total_timeout(&self) -> Option<Duration> {
        self.total_timeout_secs.map(Duration::from_secs)
    }
}

/// Bounded-concurrency executor defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub collect_errors: bool,
}

fn default_max_concurrency() -> usize { 4 }

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            collect_errors: false,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Queue depth at which the bus starts warning about a backlog.
    #[serde(default = "default_queue_warn_threshold")]
    pub queue_warn_threshold: usize,
    /// Whether deliveries are passed to the configured recorder.
    #[serde(default = "bool_true")]
    pub record_deliveries: bool,
}

fn default_queue_warn_threshold() -> usize { 1_000 }
fn bool_true() -> bool { true }

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_warn_threshold: default_queue_warn_threshold(),
            record_deliveries: true,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_check_interval_secs() -> u64 { 10 }

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

/// Logging settings (consumed by the binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".into() }

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
