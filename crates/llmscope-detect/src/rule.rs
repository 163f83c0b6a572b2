use crate::aggregate::Aggregation;
use crate::baseline::{baseline_stats, score_anomaly, AnomalyScore, AnomalyVerdict};
use chrono::{DateTime, Utc};
use llmscope_common::metric::MetricKind;
use llmscope_common::types::Severity;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Comparison operator of a threshold rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" | ">" => Ok(Self::Gt),
            "lt" | "<" => Ok(Self::Lt),
            "gte" | ">=" => Ok(Self::Gte),
            "lte" | "<=" => Ok(Self::Lte),
            "eq" | "==" => Ok(Self::Eq),
            "ne" | "!=" => Ok(Self::Ne),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, "gt"),
            Self::Lt => write!(f, "lt"),
            Self::Gte => write!(f, "gte"),
            Self::Lte => write!(f, "lte"),
            Self::Eq => write!(f, "eq"),
            Self::Ne => write!(f, "ne"),
        }
    }
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// Which detection algorithm a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Threshold,
    Anomaly,
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "threshold" => Ok(Self::Threshold),
            "anomaly" => Ok(Self::Anomaly),
            _ => Err(format!("unknown rule type: {s}")),
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Threshold => write!(f, "threshold"),
            Self::Anomaly => write!(f, "anomaly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSpec {
    pub operator: CompareOp,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalySpec {
    pub deviation_threshold: f64,
    pub lookback_hours: u32,
    pub min_samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleCheck {
    Threshold(ThresholdSpec),
    Anomaly(AnomalySpec),
}

impl RuleCheck {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleCheck::Threshold(_) => RuleKind::Threshold,
            RuleCheck::Anomaly(_) => RuleKind::Anomaly,
        }
    }
}

/// A rule row parsed into its typed form.
///
/// Construction happens in the server's rule builder; a row that fails to
/// parse (unknown metric kind, bad operator, invalid config JSON) never
/// becomes a `RuleSpec` and never reaches evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSpec {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub metric: MetricKind,
    pub aggregation: Aggregation,
    pub window_minutes: u32,
    pub severity: Severity,
    pub cooldown_minutes: u32,
    /// Channel ids to notify; empty means every enabled channel whose
    /// minimum severity admits this rule's severity.
    pub channel_ids: Vec<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub check: RuleCheck,
}

impl RuleSpec {
    pub fn kind(&self) -> RuleKind {
        self.check.kind()
    }
}

/// One rule's outcome for one cycle. Ephemeral: feeds the incident and
/// notification stages, then is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub rule_id: String,
    pub rule_name: String,
    pub triggered: bool,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub severity: Severity,
    pub message: String,
    pub evaluated_at: DateTime<Utc>,
    /// Present when an anomaly rule produced a full score.
    pub anomaly: Option<AnomalyScore>,
    /// Set when the evaluation failed (query error, timeout) instead of
    /// evaluating clean. A failed result never drives incident
    /// transitions.
    pub error: Option<String>,
}

impl EvaluationResult {
    /// Synthesizes the non-triggered result for an evaluation that failed
    /// outright. Keeps the batch alive per-rule instead of aborting it.
    pub fn failed(rule: &RuleSpec, error: String, now: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            triggered: false,
            value: None,
            threshold: None,
            severity: rule.severity,
            message: format!("evaluation failed: {error}"),
            evaluated_at: now,
            anomaly: None,
            error: Some(error),
        }
    }
}

/// Applies a threshold check to the windowed aggregate.
///
/// `value == None` is the "no data" case: not an error, evaluates to a
/// non-triggered result whose message says so.
pub fn evaluate_threshold(
    rule: &RuleSpec,
    spec: &ThresholdSpec,
    value: Option<f64>,
    now: DateTime<Utc>,
) -> EvaluationResult {
    let Some(value) = value else {
        return no_data_result(rule, Some(spec.value), now);
    };

    let triggered = spec.operator.check(value, spec.value);
    let message = if triggered {
        format!(
            "{}({}) over {}m is {:.2} ({} {})",
            rule.aggregation,
            rule.metric,
            rule.window_minutes,
            value,
            spec.operator.symbol(),
            spec.value,
        )
    } else {
        format!(
            "{}({}) over {}m is {:.2} (not {} {})",
            rule.aggregation,
            rule.metric,
            rule.window_minutes,
            value,
            spec.operator.symbol(),
            spec.value,
        )
    };

    EvaluationResult {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        triggered,
        value: Some(value),
        threshold: Some(spec.value),
        severity: rule.severity,
        message,
        evaluated_at: now,
        anomaly: None,
        error: None,
    }
}

/// Scores the current aggregate against the baseline series.
///
/// An insufficient baseline (too few samples, or constant) is treated
/// like "no data": non-triggered with an explanatory message, never a
/// spurious flag and never a division by zero.
pub fn evaluate_anomaly(
    rule: &RuleSpec,
    spec: &AnomalySpec,
    value: Option<f64>,
    baseline_series: &[f64],
    now: DateTime<Utc>,
) -> EvaluationResult {
    let Some(value) = value else {
        return no_data_result(rule, Some(spec.deviation_threshold), now);
    };

    let stats = baseline_stats(baseline_series);
    match score_anomaly(value, &stats, spec.deviation_threshold, spec.min_samples) {
        AnomalyVerdict::InsufficientData { sample_count } => EvaluationResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            triggered: false,
            value: Some(value),
            threshold: Some(spec.deviation_threshold),
            severity: rule.severity,
            message: format!(
                "insufficient baseline for {}: {} samples over {}h (minimum {})",
                rule.metric, sample_count, spec.lookback_hours, spec.min_samples,
            ),
            evaluated_at: now,
            anomaly: None,
            error: None,
        },
        AnomalyVerdict::Scored(score) => {
            let message = if score.is_anomaly {
                format!(
                    "{}({}) over {}m is {:.2}, z-score {:.2} exceeds {:.1} (baseline mean {:.2}, stddev {:.2}, confidence {:.2})",
                    rule.aggregation,
                    rule.metric,
                    rule.window_minutes,
                    value,
                    score.z_score,
                    spec.deviation_threshold,
                    score.baseline_mean,
                    score.baseline_stddev,
                    score.confidence,
                )
            } else {
                format!(
                    "{}({}) over {}m is {:.2}, z-score {:.2} within {:.1}",
                    rule.aggregation,
                    rule.metric,
                    rule.window_minutes,
                    value,
                    score.z_score,
                    spec.deviation_threshold,
                )
            };
            EvaluationResult {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                triggered: score.is_anomaly,
                value: Some(value),
                threshold: Some(spec.deviation_threshold),
                severity: rule.severity,
                message,
                evaluated_at: now,
                anomaly: Some(score),
                error: None,
            }
        }
    }
}

fn no_data_result(rule: &RuleSpec, threshold: Option<f64>, now: DateTime<Utc>) -> EvaluationResult {
    EvaluationResult {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        triggered: false,
        value: None,
        threshold,
        severity: rule.severity,
        message: format!(
            "no data for {} in the last {}m",
            rule.metric, rule.window_minutes
        ),
        evaluated_at: now,
        anomaly: None,
        error: None,
    }
}
