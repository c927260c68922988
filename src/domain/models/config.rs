use serde::{Deserialize, Serialize};

/// Main configuration structure for subject-flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Path to the dependency graph definition (YAML or JSON)
    #[serde(default = "default_graph_file")]
    pub graph_file: String,

    /// Store and bus implementation
    #[serde(default)]
    pub backend: Backend,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Message bus configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Controller configuration
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_graph_file() -> String {
    "graph.yaml".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph_file: default_graph_file(),
            backend: Backend::default(),
            database: DatabaseConfig::default(),
            bus: BusConfig::default(),
            controller: ControllerConfig::default(),
            sweeper: SweeperConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where task state and bus messages live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shared `SQLite` database; several replicas may attach
    Sqlite,
    /// In-process maps; a single replica only
    Memory,
}

impl Default for Backend {
    fn default() -> Self {
        Self::Sqlite
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// `SQLite` connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:.subject-flow/state.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BusConfig {
    /// Consumer group whose committed offsets this replica advances
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Topic carrying subject-ready announcements
    #[serde(default = "default_subject_ready_topic")]
    pub subject_ready_topic: String,

    /// Idle wait between polls when no message is available
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_group_id() -> String {
    "controller".to_string()
}

fn default_subject_ready_topic() -> String {
    "subject-ready".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            subject_ready_topic: default_subject_ready_topic(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControllerConfig {
    /// `source` field of emitted events
    #[serde(default = "default_source")]
    pub source: String,

    /// Dispatch target for templates without a worker
    #[serde(default = "default_worker")]
    pub default_worker: String,

    /// Staleness window for templates without a timeout option
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_source() -> String {
    "http://controller.subject-flow.local".to_string()
}

fn default_worker() -> String {
    "default.worker".to_string()
}

const fn default_timeout_ms() -> u64 {
    300_000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            default_worker: default_worker(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SweeperConfig {
    /// Interval between sweeps in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,

    /// Consecutive failed sweeps before the sweeper gives up
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

const fn default_sweep_interval_ms() -> u64 {
    2000
}

const fn default_max_consecutive_failures() -> u32 {
    10
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation policy for file output: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
