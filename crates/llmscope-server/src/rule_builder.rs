use anyhow::Result;
use llmscope_common::metric::MetricKind;
use llmscope_detect::aggregate::Aggregation;
use llmscope_detect::rule::{
    AnomalySpec, CompareOp, RuleCheck, RuleKind, RuleSpec, ThresholdSpec,
};
use llmscope_storage::control::AlertRuleRow;
use serde::{Deserialize, Serialize};

use crate::config::AnomalyConfig;

// ---- Per-rule-type config JSON schemas ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRuleConfig {
    pub operator: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRuleConfig {
    #[serde(default)]
    pub deviation_threshold: Option<f64>,
    #[serde(default)]
    pub lookback_hours: Option<u32>,
    #[serde(default)]
    pub min_samples: Option<usize>,
}

// ---- DB row -> RuleSpec ----

/// Convert a single `AlertRuleRow` into a typed `RuleSpec`.
///
/// Unset anomaly config fields fall back to the `[anomaly]` section
/// defaults.
pub fn build_rule_from_row(row: &AlertRuleRow, defaults: &AnomalyConfig) -> Result<RuleSpec> {
    let metric: MetricKind = row
        .metric
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{e}"))?;
    let aggregation: Aggregation = row
        .aggregation
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{e}"))?;
    let severity = row.severity.parse().unwrap_or(llmscope_common::types::Severity::Info);
    let channel_ids: Vec<String> = serde_json::from_str(&row.channels_json)
        .map_err(|e| anyhow::anyhow!("invalid channels list: {e}"))?;

    let check = match row.rule_type.parse::<RuleKind>() {
        Ok(RuleKind::Threshold) => {
            let cfg: ThresholdRuleConfig = serde_json::from_str(&row.config_json)
                .map_err(|e| anyhow::anyhow!("invalid threshold config: {e}"))?;
            let operator: CompareOp = cfg
                .operator
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{e}"))?;
            RuleCheck::Threshold(ThresholdSpec {
                operator,
                value: cfg.value,
            })
        }
        Ok(RuleKind::Anomaly) => {
            let cfg: AnomalyRuleConfig = serde_json::from_str(&row.config_json)
                .map_err(|e| anyhow::anyhow!("invalid anomaly config: {e}"))?;
            RuleCheck::Anomaly(AnomalySpec {
                deviation_threshold: cfg
                    .deviation_threshold
                    .unwrap_or(defaults.default_deviation_threshold),
                lookback_hours: cfg.lookback_hours.unwrap_or(defaults.default_lookback_hours),
                min_samples: cfg.min_samples.unwrap_or(defaults.min_samples),
            })
        }
        Err(e) => return Err(anyhow::anyhow!("{e}")),
    };

    let window_minutes = u32::try_from(row.window_minutes)
        .map_err(|_| anyhow::anyhow!("window_minutes must be positive: {}", row.window_minutes))?;
    let cooldown_minutes = u32::try_from(row.cooldown_minutes).map_err(|_| {
        anyhow::anyhow!("cooldown_minutes must not be negative: {}", row.cooldown_minutes)
    })?;

    Ok(RuleSpec {
        id: row.id.clone(),
        project_id: row.project_id.clone(),
        name: row.name.clone(),
        metric,
        aggregation,
        window_minutes,
        severity,
        cooldown_minutes,
        channel_ids,
        last_triggered_at: row.last_triggered_at,
        check,
    })
}

/// Convert multiple rows into specs, skipping invalid ones with warnings.
///
/// Returned error strings surface in the cycle summary so a broken rule
/// row is visible to callers, not just in logs.
pub fn build_rules_from_rows(
    rows: &[AlertRuleRow],
    defaults: &AnomalyConfig,
) -> (Vec<RuleSpec>, Vec<String>) {
    let mut specs = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    for row in rows {
        match build_rule_from_row(row, defaults) {
            Ok(spec) => specs.push(spec),
            Err(e) => {
                tracing::warn!(
                    rule_id = %row.id,
                    rule_name = %row.name,
                    rule_type = %row.rule_type,
                    error = %e,
                    "Skipping invalid alert rule"
                );
                errors.push(format!("rule {} ({}): {e}", row.id, row.name));
            }
        }
    }
    (specs, errors)
}
