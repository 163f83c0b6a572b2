use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    pub name: String,
    pub value: f64,
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBatch {
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub points: Vec<MetricPoint>,
}

/// LLM 请求记录（来自 llm_requests 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequestRecord {
    /// 数据库 ID
    pub id: String,
    /// 请求时间
    pub timestamp: DateTime<Utc>,
    /// 所属项目
    pub project_id: String,
    /// 模型名称（如 gpt-4o, claude-3-5-sonnet）
    pub model: String,
    /// 请求耗时（毫秒）
    pub latency_ms: f64,
    /// 输入 token 数
    pub prompt_tokens: i64,
    /// 输出 token 数
    pub completion_tokens: i64,
    /// 总 token 数
    pub total_tokens: i64,
    /// 请求成本（美元）
    pub cost_usd: f64,
    /// 请求状态
    pub status: LlmCallStatus,
    /// 错误类型（仅失败请求）
    pub error_type: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a single proxied LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LlmCallStatus {
    Success,
    Error,
}

impl LlmCallStatus {
    pub fn is_error(self) -> bool {
        matches!(self, LlmCallStatus::Error)
    }
}

impl std::fmt::Display for LlmCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmCallStatus::Success => write!(f, "success"),
            LlmCallStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LlmCallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(LlmCallStatus::Success),
            "error" => Ok(LlmCallStatus::Error),
            _ => Err(format!("unknown llm call status: {s}")),
        }
    }
}

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use llmscope_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.to_string(), "warning");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Which detection path produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertSource {
    Rule,
    Anomaly,
    Security,
}

impl std::fmt::Display for AlertSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSource::Rule => write!(f, "rule"),
            AlertSource::Anomaly => write!(f, "anomaly"),
            AlertSource::Security => write!(f, "security"),
        }
    }
}

impl std::str::FromStr for AlertSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rule" => Ok(AlertSource::Rule),
            "anomaly" => Ok(AlertSource::Anomaly),
            "security" => Ok(AlertSource::Security),
            _ => Err(format!("unknown alert source: {s}")),
        }
    }
}

/// The in-flight alert payload handed to notification channels.
///
/// Distinct from the durable `alerts` audit row: this is what a channel
/// renders and sends, carrying everything a message template needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    /// None for security escalations, which are not bound to a rule.
    pub rule_id: Option<String>,
    pub rule_name: String,
    pub project_id: String,
    pub source: AlertSource,
    pub metric: String,
    pub severity: Severity,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// 安全事件类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    PromptInjection,
    ReplayAttack,
    FailedAuth,
    PiiDetected,
    RateLimitExceeded,
}

impl SecurityEventKind {
    pub const ALL: [SecurityEventKind; 5] = [
        SecurityEventKind::PromptInjection,
        SecurityEventKind::ReplayAttack,
        SecurityEventKind::FailedAuth,
        SecurityEventKind::PiiDetected,
        SecurityEventKind::RateLimitExceeded,
    ];
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityEventKind::PromptInjection => write!(f, "prompt_injection"),
            SecurityEventKind::ReplayAttack => write!(f, "replay_attack"),
            SecurityEventKind::FailedAuth => write!(f, "failed_auth"),
            SecurityEventKind::PiiDetected => write!(f, "pii_detected"),
            SecurityEventKind::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
        }
    }
}

impl std::str::FromStr for SecurityEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt_injection" => Ok(SecurityEventKind::PromptInjection),
            "replay_attack" => Ok(SecurityEventKind::ReplayAttack),
            "failed_auth" => Ok(SecurityEventKind::FailedAuth),
            "pii_detected" => Ok(SecurityEventKind::PiiDetected),
            "rate_limit_exceeded" => Ok(SecurityEventKind::RateLimitExceeded),
            _ => Err(format!("unknown security event type: {s}")),
        }
    }
}

/// A typed security event buffered for windowed counting.
///
/// Held only in the in-memory sliding buffer; durable audit of security
/// events lives outside this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub detail: Option<String>,
}

