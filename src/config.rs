//! Runtime configuration
//!
//! One [`Config`] is built at startup (JSON file, then environment overrides,
//! then [`Config::validate`]) and shared by `Arc` with every component.
//! Nothing downstream reads the environment on its own.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Duration as TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::MonitorError;
use crate::event::ResourceKind;
use crate::util::{env_parse, env_string};

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory state (lost on scale-to-zero, cold start on every boot)
    #[serde(rename = "none")]
    None,

    /// SQLite database holding history and alert state
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::None
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./sentinel.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Restarts inside the window that raise a warning
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: u32,

    /// Restarts per minute above which a restart warning escalates to critical
    #[serde(default = "default_restart_rate_critical")]
    pub restart_rate_critical: f64,

    #[serde(default = "default_time_window_minutes")]
    pub time_window_minutes: u32,

    #[serde(default = "default_disk_warn_pct")]
    pub disk_warn_pct: f64,

    #[serde(default = "default_disk_critical_pct")]
    pub disk_critical_pct: f64,

    /// Percentage points below `disk_warn_pct` required to clear a usage alert
    #[serde(default = "default_disk_hysteresis_pct")]
    pub disk_hysteresis_pct: f64,

    #[serde(default = "default_notify_base_url")]
    pub notify_base_url: String,

    #[serde(default = "default_notify_topic")]
    pub notify_topic: String,

    #[serde(default = "default_renotify_interval_minutes")]
    pub renotify_interval_minutes: u32,

    #[serde(default)]
    pub notify_on_startup: bool,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pass: PassConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub drift: DriftConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum entries retained per resource
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,

    /// Keys without a newer entry than this are purged
    #[serde(default = "default_history_ttl_minutes")]
    pub ttl_minutes: u32,

    /// How long alert state outlives a deleted resource
    #[serde(default = "default_tombstone_grace_minutes")]
    pub tombstone_grace_minutes: u32,

    /// Per-kind overrides; kinds not listed use `time_window_minutes` and `capacity`
    #[serde(default)]
    pub windows: HashMap<ResourceKind, WindowPolicy>,

    /// Minimum time between purges triggered by push deliveries
    #[serde(default = "default_housekeeping_secs")]
    pub housekeeping_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            ttl_minutes: default_history_ttl_minutes(),
            tombstone_grace_minutes: default_tombstone_grace_minutes(),
            windows: HashMap::new(),
            housekeeping_secs: default_housekeeping_secs(),
        }
    }
}

/// Retention of one resource kind in the history store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    pub window_minutes: u32,
    pub capacity: usize,
}

impl WindowPolicy {
    pub fn window(&self) -> TimeDelta {
        TimeDelta::minutes(self.window_minutes as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(default = "default_refill_per_minute")]
    pub refill_per_minute: u32,

    /// How long a throttled notification may wait for a token
    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            refill_per_minute: default_refill_per_minute(),
            queue_wait_ms: default_queue_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-request timeout for the notification transport
    #[serde(default = "default_transport_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_transport_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassConfig {
    /// Size of the evaluation worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Global deadline for one pass
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Scheduled pass interval; `None` disables the scheduler (manual triggers only)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: Option<u64>,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            deadline_secs: default_deadline_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token file (service account token when running in-cluster)
    #[serde(default = "default_token_file")]
    pub token_file: Option<PathBuf>,

    /// PEM bundle used to verify the API server
    #[serde(default = "default_ca_file")]
    pub ca_file: Option<PathBuf>,

    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_argocd_namespace")]
    pub argocd_namespace: String,

    /// Kinds polled on every pass
    #[serde(default = "default_kinds")]
    pub kinds: Vec<ResourceKind>,

    /// Log lines attached to pod restart alerts; 0 disables log collection
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,

    /// Logs of one container are collected at most once per interval
    #[serde(default = "default_log_interval_minutes")]
    pub log_interval_minutes: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_file: default_token_file(),
            ca_file: default_ca_file(),
            timeout_secs: default_source_timeout_secs(),
            argocd_namespace: default_argocd_namespace(),
            kinds: default_kinds(),
            log_tail_lines: default_log_tail_lines(),
            log_interval_minutes: default_log_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Namespaces whose deployments must carry the ownership label
    #[serde(default = "default_managed_namespaces")]
    pub managed_namespaces: Vec<String>,

    #[serde(default = "default_ownership_label")]
    pub ownership_label: String,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            managed_namespaces: default_managed_namespaces(),
            ownership_label: default_ownership_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: IpAddr,

    #[serde(default = "crate::util::get_default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            port: crate::util::get_default_port(),
        }
    }
}

fn default_cluster_name() -> String {
    String::from("kubernetes")
}

fn default_restart_threshold() -> u32 {
    3
}

fn default_restart_rate_critical() -> f64 {
    1.0
}

fn default_time_window_minutes() -> u32 {
    60
}

fn default_disk_warn_pct() -> f64 {
    80.0
}

fn default_disk_critical_pct() -> f64 {
    90.0
}

fn default_disk_hysteresis_pct() -> f64 {
    5.0
}

fn default_notify_base_url() -> String {
    String::from("https://ntfy.sh")
}

fn default_notify_topic() -> String {
    String::from("kube-sentinel")
}

fn default_renotify_interval_minutes() -> u32 {
    240
}

fn default_history_capacity() -> usize {
    120
}

fn default_history_ttl_minutes() -> u32 {
    120
}

fn default_tombstone_grace_minutes() -> u32 {
    10
}

fn default_housekeeping_secs() -> u64 {
    60
}

fn default_burst() -> u32 {
    10
}

fn default_refill_per_minute() -> u32 {
    20
}

fn default_queue_wait_ms() -> u64 {
    2_000
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_transport_timeout_secs() -> u64 {
    10
}

fn default_workers() -> usize {
    8
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_interval_secs() -> Option<u64> {
    Some(60)
}

fn default_api_url() -> String {
    String::from("https://kubernetes.default.svc")
}

fn default_token_file() -> Option<PathBuf> {
    Some(PathBuf::from(
        "/var/run/secrets/kubernetes.io/serviceaccount/token",
    ))
}

fn default_ca_file() -> Option<PathBuf> {
    Some(PathBuf::from(
        "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
    ))
}

fn default_source_timeout_secs() -> u64 {
    30
}

fn default_argocd_namespace() -> String {
    String::from("argocd")
}

fn default_kinds() -> Vec<ResourceKind> {
    ResourceKind::ALL.to_vec()
}

fn default_log_tail_lines() -> u32 {
    50
}

fn default_log_interval_minutes() -> u32 {
    5
}

fn default_managed_namespaces() -> Vec<String> {
    [
        "pod-restart-tracker",
        "health-check",
        "scaler-advisor",
        "pvc-monitor",
        "node-disk-monitor",
        "drift-detector",
        "cluster-monitor",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_ownership_label() -> String {
    String::from("argocd.argoproj.io/instance")
}

fn default_server_addr() -> IpAddr {
    IpAddr::V4(crate::util::get_default_addr())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            restart_threshold: default_restart_threshold(),
            restart_rate_critical: default_restart_rate_critical(),
            time_window_minutes: default_time_window_minutes(),
            disk_warn_pct: default_disk_warn_pct(),
            disk_critical_pct: default_disk_critical_pct(),
            disk_hysteresis_pct: default_disk_hysteresis_pct(),
            notify_base_url: default_notify_base_url(),
            notify_topic: default_notify_topic(),
            renotify_interval_minutes: default_renotify_interval_minutes(),
            notify_on_startup: false,
            history: HistoryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            pass: PassConfig::default(),
            source: SourceConfig::default(),
            drift: DriftConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Overlay the environment variables the monitoring services were
    /// historically configured with
    pub fn apply_env(&mut self) {
        if let Some(url) = env_string("NTFY_URL") {
            self.notify_base_url = url;
        }
        if let Some(topic) = env_string("NTFY_TOPIC") {
            self.notify_topic = topic;
        }
        if let Some(cluster) = env_string("CLUSTER_NAME") {
            self.cluster_name = cluster;
        }
        if let Some(threshold) = env_parse("RESTART_THRESHOLD") {
            self.restart_threshold = threshold;
        }
        if let Some(minutes) = env_parse("TIME_WINDOW_MINUTES") {
            self.time_window_minutes = minutes;
        }
        if let Some(pct) = env_parse("WARNING_THRESHOLD") {
            self.disk_warn_pct = pct;
        }
        if let Some(pct) = env_parse("CRITICAL_THRESHOLD") {
            self.disk_critical_pct = pct;
        }
        if let Some(minutes) = env_parse("RENOTIFY_INTERVAL_MINUTES") {
            self.renotify_interval_minutes = minutes;
        }
        if let Some(port) = env_parse(crate::util::SENTINEL_PORT) {
            self.server.port = port;
        }
        if let Some(addr) = env_parse(crate::util::SENTINEL_ADDR) {
            self.server.addr = addr;
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |msg: &str| Err(MonitorError::ConfigInvalid(msg.to_string()));

        if self.restart_threshold == 0 {
            return invalid("restart_threshold must be at least 1");
        }
        if !(self.restart_rate_critical > 0.0) {
            return invalid("restart_rate_critical must be positive");
        }
        if self.time_window_minutes == 0 {
            return invalid("time_window_minutes must be at least 1");
        }
        for (name, pct) in [
            ("disk_warn_pct", self.disk_warn_pct),
            ("disk_critical_pct", self.disk_critical_pct),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(MonitorError::ConfigInvalid(format!(
                    "{name} must be between 0 and 100, got {pct}"
                )));
            }
        }
        if self.disk_warn_pct >= self.disk_critical_pct {
            return invalid("disk_warn_pct must be below disk_critical_pct");
        }
        if !(0.0..self.disk_warn_pct).contains(&self.disk_hysteresis_pct) {
            return invalid("disk_hysteresis_pct must be between 0 and disk_warn_pct");
        }
        if self.notify_base_url.trim().is_empty() || !self.notify_base_url.starts_with("http") {
            return invalid("notify_base_url must be an http(s) URL");
        }
        if self.notify_topic.trim().is_empty() || self.notify_topic.contains('/') {
            return invalid("notify_topic must be a non-empty path segment");
        }
        if self.renotify_interval_minutes == 0 {
            return invalid("renotify_interval_minutes must be at least 1");
        }
        if self.history.capacity == 0 {
            return invalid("history.capacity must be at least 1");
        }
        if self
            .history
            .windows
            .values()
            .any(|policy| policy.window_minutes == 0 || policy.capacity == 0)
        {
            return invalid("history.windows entries need a non-zero window and capacity");
        }
        if self.rate_limit.burst == 0 {
            return invalid("rate_limit.burst must be at least 1");
        }
        if self.retry.attempts == 0 {
            return invalid("retry.attempts must be at least 1");
        }
        if self.pass.workers == 0 {
            return invalid("pass.workers must be at least 1");
        }
        if self.pass.deadline_secs == 0 {
            return invalid("pass.deadline_secs must be at least 1");
        }

        Ok(())
    }

    /// Retention policy for one kind
    pub fn window_policy(&self, kind: ResourceKind) -> WindowPolicy {
        self.history
            .windows
            .get(&kind)
            .copied()
            .unwrap_or(WindowPolicy {
                window_minutes: self.time_window_minutes,
                capacity: self.history.capacity,
            })
    }

    pub fn renotify_interval(&self) -> TimeDelta {
        TimeDelta::minutes(self.renotify_interval_minutes as i64)
    }

    pub fn history_ttl(&self) -> TimeDelta {
        TimeDelta::minutes(self.history.ttl_minutes as i64)
    }

    pub fn tombstone_grace(&self) -> TimeDelta {
        TimeDelta::minutes(self.history.tombstone_grace_minutes as i64)
    }

    pub fn pass_deadline(&self) -> Duration {
        Duration::from_secs(self.pass.deadline_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.history.housekeeping_secs)
    }

    pub fn log_interval(&self) -> TimeDelta {
        TimeDelta::minutes(self.source.log_interval_minutes as i64)
    }

    /// Usage ratio that raises a warning
    pub fn warn_ratio(&self) -> f64 {
        self.disk_warn_pct / 100.0
    }

    pub fn critical_ratio(&self) -> f64 {
        self.disk_critical_pct / 100.0
    }

    /// Usage ratio below which an active usage alert clears
    pub fn recovery_ratio(&self) -> f64 {
        (self.disk_warn_pct - self.disk_hysteresis_pct) / 100.0
    }
}

/// Load the configuration file (if any), overlay the environment and validate
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    config.validate()?;
    trace!("effective config: {config:?}");
    Ok(config)
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
