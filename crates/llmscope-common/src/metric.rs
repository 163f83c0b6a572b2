//! Metric identity for alert rules.
//!
//! Rule rows store the metric as a free-form string; this module closes it
//! into a tagged [`MetricKind`] at rule-build time. Anything under the
//! reserved `llm.` prefix must name a known [`LlmMetric`], everything else
//! is a generic metric series keyed by name. Unknown `llm.*` keys are a
//! parse error, so a bad rule is rejected before any evaluation runs.

use serde::{Deserialize, Serialize};

/// Reserved prefix routing a rule to the LLM request relation.
pub const LLM_METRIC_PREFIX: &str = "llm.";

/// A validated metric identity.
///
/// # Examples
///
/// ```
/// use llmscope_common::metric::{LlmMetric, MetricKind};
///
/// let kind: MetricKind = "llm.latency_ms".parse().unwrap();
/// assert_eq!(kind, MetricKind::Llm(LlmMetric::LatencyMs));
///
/// let kind: MetricKind = "latency_ms".parse().unwrap();
/// assert_eq!(kind, MetricKind::Generic("latency_ms".to_string()));
///
/// assert!("llm.bogus".parse::<MetricKind>().is_err());
/// assert!("".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Llm(LlmMetric),
    Generic(String),
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Llm(m) => write!(f, "{LLM_METRIC_PREFIX}{m}"),
            MetricKind::Generic(name) => write!(f, "{name}"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("metric name must not be empty".to_string());
        }
        if let Some(suffix) = s.strip_prefix(LLM_METRIC_PREFIX) {
            let metric = suffix.parse::<LlmMetric>()?;
            Ok(MetricKind::Llm(metric))
        } else {
            Ok(MetricKind::Generic(s.to_string()))
        }
    }
}

/// The closed set of LLM-specific metrics.
///
/// Row-backed metrics carry one value per request row and aggregate like a
/// generic series; `ErrorRate` and `RequestCount` are derived from request
/// outcomes over the whole window instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmMetric {
    LatencyMs,
    PromptTokens,
    CompletionTokens,
    TotalTokens,
    CostUsd,
    ErrorRate,
    RequestCount,
}

impl std::fmt::Display for LlmMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmMetric::LatencyMs => write!(f, "latency_ms"),
            LlmMetric::PromptTokens => write!(f, "prompt_tokens"),
            LlmMetric::CompletionTokens => write!(f, "completion_tokens"),
            LlmMetric::TotalTokens => write!(f, "total_tokens"),
            LlmMetric::CostUsd => write!(f, "cost_usd"),
            LlmMetric::ErrorRate => write!(f, "error_rate"),
            LlmMetric::RequestCount => write!(f, "request_count"),
        }
    }
}

impl std::str::FromStr for LlmMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latency_ms" => Ok(LlmMetric::LatencyMs),
            "prompt_tokens" => Ok(LlmMetric::PromptTokens),
            "completion_tokens" => Ok(LlmMetric::CompletionTokens),
            "total_tokens" => Ok(LlmMetric::TotalTokens),
            "cost_usd" => Ok(LlmMetric::CostUsd),
            "error_rate" => Ok(LlmMetric::ErrorRate),
            "request_count" => Ok(LlmMetric::RequestCount),
            _ => Err(format!("unknown LLM metric key: llm.{s}")),
        }
    }
}
