use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable that overrides `server.cron_secret`.
pub const CRON_SECRET_ENV: &str = "LLMSCOPE_CRON_SECRET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret expected in the `x-cron-secret` header on every
    /// endpoint except `/v1/health`. Empty is a startup error.
    #[serde(default)]
    pub cron_secret: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cron_secret: String::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 控制库连接串（规则 / 事件 / 告警 / 通知）
    #[serde(default = "default_database_url")]
    pub url: String,
    /// 遥测分区库目录（每个 UTC 日一个 SQLite 文件）
    #[serde(default = "default_telemetry_dir")]
    pub telemetry_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            telemetry_dir: default_telemetry_dir(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://data/llmscope.db?mode=rwc".to_string()
}

fn default_telemetry_dir() -> String {
    "data/telemetry".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EvaluatorConfig {
    /// 单周期最多评估的规则数（按 id 排序截断）
    #[serde(default = "default_max_rules_per_cycle")]
    pub max_rules_per_cycle: usize,
    /// 并发评估的规则数上限
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 单条规则评估超时（秒）
    #[serde(default = "default_rule_timeout_secs")]
    pub rule_timeout_secs: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_rules_per_cycle: default_max_rules_per_cycle(),
            max_concurrent: default_max_concurrent(),
            rule_timeout_secs: default_rule_timeout_secs(),
        }
    }
}

fn default_max_rules_per_cycle() -> usize {
    100
}

fn default_max_concurrent() -> usize {
    10
}

fn default_rule_timeout_secs() -> u64 {
    30
}

/// Fallbacks for anomaly rules whose `config_json` leaves fields unset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_lookback_hours")]
    pub default_lookback_hours: u32,
    #[serde(default = "default_deviation_threshold")]
    pub default_deviation_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            default_lookback_hours: default_lookback_hours(),
            default_deviation_threshold: default_deviation_threshold(),
        }
    }
}

fn default_min_samples() -> usize {
    10
}

fn default_lookback_hours() -> u32 {
    24
}

fn default_deviation_threshold() -> f64 {
    3.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_security_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_security_horizon_hours")]
    pub horizon_hours: u32,
    #[serde(default = "default_security_max_events")]
    pub max_events: usize,
    /// Per-event-type count thresholds; unknown type names are rejected
    /// at startup.
    #[serde(default)]
    pub thresholds: HashMap<String, u32>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_security_window_minutes(),
            horizon_hours: default_security_horizon_hours(),
            max_events: default_security_max_events(),
            thresholds: HashMap::new(),
        }
    }
}

fn default_security_window_minutes() -> u32 {
    5
}

fn default_security_horizon_hours() -> u32 {
    24
}

fn default_security_max_events() -> usize {
    10_000
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    llmscope_notify::queue::DEFAULT_QUEUE_CAPACITY
}

/// In-process cycle schedulers for deployments without an external cron.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rule_interval_secs")]
    pub rule_interval_secs: u64,
    #[serde(default = "default_anomaly_interval_secs")]
    pub anomaly_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rule_interval_secs: default_rule_interval_secs(),
            anomaly_interval_secs: default_anomaly_interval_secs(),
        }
    }
}

fn default_rule_interval_secs() -> u64 {
    60
}

fn default_anomaly_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_telemetry_days")]
    pub telemetry_days: u32,
    #[serde(default = "default_incidents_days")]
    pub incidents_days: u32,
    /// Covers alerts, anomalies, and notification rows.
    #[serde(default = "default_alerts_days")]
    pub alerts_days: u32,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            telemetry_days: default_telemetry_days(),
            incidents_days: default_incidents_days(),
            alerts_days: default_alerts_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_telemetry_days() -> u32 {
    30
}

fn default_incidents_days() -> u32 {
    90
}

fn default_alerts_days() -> u32 {
    90
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

// ---- Seed file types (used by the `seed` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub channels: Vec<SeedChannel>,
    #[serde(default)]
    pub rules: Vec<SeedRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedChannel {
    pub name: String,
    pub channel_type: String,
    #[serde(default = "default_seed_min_severity")]
    pub min_severity: String,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRule {
    pub name: String,
    pub project_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub metric: String,
    #[serde(default = "default_seed_aggregation")]
    pub aggregation: String,
    #[serde(default = "default_seed_rule_type")]
    pub rule_type: String,
    #[serde(default = "default_seed_window_minutes")]
    pub window_minutes: i32,
    #[serde(default = "default_seed_severity")]
    pub severity: String,
    /// Channel names (not ids); resolved against the channels table when
    /// the seed is applied. Empty means all enabled channels.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_seed_cooldown_minutes")]
    pub cooldown_minutes: i32,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
    pub config: serde_json::Value,
}

fn default_seed_min_severity() -> String {
    "info".to_string()
}

fn default_seed_enabled() -> bool {
    true
}

fn default_seed_aggregation() -> String {
    "avg".to_string()
}

fn default_seed_rule_type() -> String {
    "threshold".to_string()
}

fn default_seed_window_minutes() -> i32 {
    5
}

fn default_seed_severity() -> String {
    "warning".to_string()
}

fn default_seed_cooldown_minutes() -> i32 {
    10
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        if let Ok(secret) = std::env::var(CRON_SECRET_ENV) {
            config.server.cron_secret = secret;
        }
        Ok(config)
    }

    /// Rejects configurations the server must not start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.cron_secret.is_empty() {
            anyhow::bail!(
                "server.cron_secret is empty; set it in the config file or via {CRON_SECRET_ENV}"
            );
        }
        Ok(())
    }
}
