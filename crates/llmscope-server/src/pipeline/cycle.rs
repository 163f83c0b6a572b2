use chrono::{DateTime, Utc};
use llmscope_common::types::AlertSource;
use llmscope_detect::rule::RuleKind;
use llmscope_storage::control::NewAnomaly;
use llmscope_storage::error::Result;
use llmscope_storage::{ControlStore, TelemetryStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use utoipa::ToSchema;

use crate::config::{AnomalyConfig, ServerConfig};
use crate::rule_builder::build_rules_from_rows;

use super::aggregator::MetricAggregator;
use super::dispatcher::Dispatcher;
use super::evaluator::RuleEvaluator;
use super::incidents::{IncidentManager, IncidentOutcome};

/// 检测周期结果摘要
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    /// 本周期评估的规则数（含失败的评估）
    pub rules_evaluated: usize,
    /// 触发的规则数
    pub triggered: usize,
    /// 自动恢复的事件数
    pub resolved: usize,
    /// 至少投递到一个渠道的规则数
    pub notified: usize,
    /// 规则级错误（无效规则行、评估失败、落库失败）
    pub errors: Vec<String>,
}

/// One full detection pass: fetch rules, evaluate, transition incidents,
/// dispatch notifications.
///
/// Only the initial rule fetch is fatal; everything after is isolated
/// per rule and lands in [`CycleSummary::errors`].
pub struct DetectionCycle {
    control: Arc<ControlStore>,
    evaluator: RuleEvaluator,
    incidents: IncidentManager,
    dispatcher: Arc<Dispatcher>,
    anomaly_defaults: AnomalyConfig,
    max_rules_per_cycle: usize,
    // Per-kind window cursor; rules past the cap are picked up by the
    // following cycles instead of never running.
    cursors: Mutex<HashMap<String, usize>>,
}

impl DetectionCycle {
    pub fn new(
        control: Arc<ControlStore>,
        telemetry: Arc<dyn TelemetryStore>,
        dispatcher: Arc<Dispatcher>,
        config: &ServerConfig,
    ) -> Self {
        let aggregator = Arc::new(MetricAggregator::new(telemetry));
        let evaluator = RuleEvaluator::new(
            aggregator,
            config.evaluator.max_concurrent,
            std::time::Duration::from_secs(config.evaluator.rule_timeout_secs),
        );
        Self {
            control: control.clone(),
            evaluator,
            incidents: IncidentManager::new(control),
            dispatcher,
            anomaly_defaults: config.anomaly,
            max_rules_per_cycle: config.evaluator.max_rules_per_cycle.max(1),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Advances the rotation cursor for this cycle's kind filter and
    /// returns the window start. Successive capped cycles step by `cap`,
    /// so every enabled rule is reached within `ceil(total / cap)` cycles.
    fn next_window_offset(&self, type_filter: Option<&str>, total: usize) -> usize {
        let key = type_filter.unwrap_or("all").to_string();
        let mut cursors = self
            .cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = cursors.entry(key).or_insert(0);
        let offset = *slot % total;
        *slot = (offset + self.max_rules_per_cycle) % total;
        offset
    }

    pub async fn run(&self, kind: Option<RuleKind>) -> Result<CycleSummary> {
        self.run_at(Utc::now(), kind).await
    }

    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
        kind: Option<RuleKind>,
    ) -> Result<CycleSummary> {
        // The kind filter narrows the query itself, so a capped fetch can
        // never be consumed entirely by rules of the other kind.
        let type_filter = kind.map(|k| k.to_string());
        // The one fatal failure: without rule rows there is no cycle.
        let mut rows = self
            .control
            .list_enabled_alert_rules(type_filter.as_deref())
            .await?;

        let cap = self.max_rules_per_cycle;
        if rows.len() > cap {
            let offset = self.next_window_offset(type_filter.as_deref(), rows.len());
            tracing::warn!(
                cap = cap,
                total = rows.len(),
                offset = offset,
                "Enabled rule count exceeds per-cycle cap, rotating window"
            );
            rows.rotate_left(offset);
            rows.truncate(cap);
        }

        let (specs, mut errors) = build_rules_from_rows(&rows, &self.anomaly_defaults);

        let results = self.evaluator.evaluate_all(&specs, now).await;

        let mut summary = CycleSummary {
            rules_evaluated: results.len(),
            ..Default::default()
        };

        for (rule, result) in specs.iter().zip(&results) {
            if let Some(error) = &result.error {
                errors.push(format!("rule {} ({}): {error}", rule.id, rule.name));
                continue;
            }

            // Anomalous scores are recorded whether or not notifications
            // get through later.
            if result.triggered {
                if let Some(score) = &result.anomaly {
                    let new = NewAnomaly {
                        rule_id: rule.id.clone(),
                        project_id: rule.project_id.clone(),
                        metric: rule.metric.to_string(),
                        value: result.value.unwrap_or_default(),
                        baseline_mean: score.baseline_mean,
                        baseline_stddev: score.baseline_stddev,
                        z_score: score.z_score,
                        confidence: score.confidence,
                    };
                    if let Err(e) = self.control.insert_anomaly(&new, now).await {
                        errors.push(format!(
                            "rule {} ({}): anomaly record failed: {e}",
                            rule.id, rule.name
                        ));
                    }
                }
            }

            let incident_id = match self.incidents.apply(rule, result, now).await {
                Ok(IncidentOutcome::Opened(row)) | Ok(IncidentOutcome::Recurred(row)) => {
                    Some(row.id)
                }
                Ok(IncidentOutcome::Resolved(row)) => {
                    tracing::info!(
                        rule_id = %rule.id,
                        incident_id = %row.id,
                        "Incident auto-resolved"
                    );
                    summary.resolved += 1;
                    None
                }
                Ok(IncidentOutcome::Clear) | Ok(IncidentOutcome::Skipped) => None,
                Err(e) => {
                    errors.push(format!(
                        "rule {} ({}): incident transition failed: {e}",
                        rule.id, rule.name
                    ));
                    continue;
                }
            };

            if result.triggered {
                summary.triggered += 1;
                let source = match rule.kind() {
                    RuleKind::Threshold => AlertSource::Rule,
                    RuleKind::Anomaly => AlertSource::Anomaly,
                };
                match self
                    .dispatcher
                    .dispatch_rule_alert(rule, result, incident_id.as_deref(), source, now)
                    .await
                {
                    Ok(outcome) if outcome.notified => summary.notified += 1,
                    Ok(_) => {}
                    Err(e) => errors.push(format!(
                        "rule {} ({}): dispatch failed: {e}",
                        rule.id, rule.name
                    )),
                }
            }
        }

        summary.errors = errors;
        tracing::info!(
            rules_evaluated = summary.rules_evaluated,
            triggered = summary.triggered,
            resolved = summary.resolved,
            notified = summary.notified,
            errors = summary.errors.len(),
            "Detection cycle completed"
        );
        Ok(summary)
    }
}
