use chrono::{DateTime, Utc};
use llmscope_detect::rule::{EvaluationResult, RuleSpec};
use llmscope_storage::control::{IncidentRow, NewIncident};
use llmscope_storage::error::Result;
use llmscope_storage::ControlStore;
use std::sync::Arc;

/// What the incident stage did with one evaluation result.
#[derive(Debug, Clone)]
pub enum IncidentOutcome {
    /// First trigger: a fresh open incident.
    Opened(IncidentRow),
    /// Re-trigger folded into the active incident.
    Recurred(IncidentRow),
    /// Clean non-trigger closed the active incident.
    Resolved(IncidentRow),
    /// Clean non-trigger with nothing active.
    Clear,
    /// Failed evaluation: no transition either way.
    Skipped,
}

/// Drives incident state transitions from evaluation results.
///
/// At most one open or acknowledged incident exists per rule; the partial
/// unique index enforces this even across concurrent cycles, and the
/// losing insert folds into the winner as a recurrence.
pub struct IncidentManager {
    control: Arc<ControlStore>,
}

impl IncidentManager {
    pub fn new(control: Arc<ControlStore>) -> Self {
        Self { control }
    }

    pub async fn apply(
        &self,
        rule: &RuleSpec,
        result: &EvaluationResult,
        now: DateTime<Utc>,
    ) -> Result<IncidentOutcome> {
        // A failed evaluation says nothing about the metric; leaving the
        // incident untouched avoids resolving on a dead telemetry store.
        if result.error.is_some() {
            return Ok(IncidentOutcome::Skipped);
        }

        if result.triggered {
            self.apply_trigger(rule, result, now).await
        } else {
            match self.control.find_active_incident(&rule.id).await? {
                Some(active) => {
                    let row = self.control.resolve_incident(&active.id, now).await?;
                    Ok(IncidentOutcome::Resolved(row))
                }
                None => Ok(IncidentOutcome::Clear),
            }
        }
    }

    async fn apply_trigger(
        &self,
        rule: &RuleSpec,
        result: &EvaluationResult,
        now: DateTime<Utc>,
    ) -> Result<IncidentOutcome> {
        if let Some(active) = self.control.find_active_incident(&rule.id).await? {
            let row = self
                .control
                .record_incident_occurrence(&active.id, result.value, now)
                .await?;
            return Ok(IncidentOutcome::Recurred(row));
        }

        let new = NewIncident {
            rule_id: rule.id.clone(),
            project_id: rule.project_id.clone(),
            title: format!("{}: {}", rule.name, rule.metric),
            severity: result.severity.to_string(),
            metric: rule.metric.to_string(),
            last_value: result.value,
            threshold: result.threshold,
        };
        match self.control.open_incident(&new, now).await {
            Ok(row) => Ok(IncidentOutcome::Opened(row)),
            Err(e) if e.is_unique_violation() => {
                // Lost the open race to a concurrent cycle; fold into the
                // winner's incident.
                match self.control.find_active_incident(&rule.id).await? {
                    Some(active) => {
                        let row = self
                            .control
                            .record_incident_occurrence(&active.id, result.value, now)
                            .await?;
                        Ok(IncidentOutcome::Recurred(row))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use llmscope_common::types::Severity;
    use llmscope_detect::aggregate::Aggregation;
    use llmscope_detect::rule::{CompareOp, RuleCheck, ThresholdSpec};
    use llmscope_storage::control::incident::{STATUS_OPEN, STATUS_RESOLVED};
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn rule(id: &str) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            project_id: "proj-a".to_string(),
            name: format!("rule {id}"),
            metric: "llm.latency_ms".parse().unwrap(),
            aggregation: Aggregation::Avg,
            window_minutes: 5,
            severity: Severity::Critical,
            cooldown_minutes: 0,
            channel_ids: vec![],
            last_triggered_at: None,
            check: RuleCheck::Threshold(ThresholdSpec {
                operator: CompareOp::Gt,
                value: 1000.0,
            }),
        }
    }

    fn triggered_result(rule: &RuleSpec, value: f64) -> EvaluationResult {
        EvaluationResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            triggered: true,
            value: Some(value),
            threshold: Some(1000.0),
            severity: rule.severity,
            message: "over threshold".to_string(),
            evaluated_at: now(),
            anomaly: None,
            error: None,
        }
    }

    fn clean_result(rule: &RuleSpec) -> EvaluationResult {
        EvaluationResult {
            triggered: false,
            value: Some(10.0),
            ..triggered_result(rule, 10.0)
        }
    }

    async fn setup() -> (IncidentManager, Arc<ControlStore>, TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let db_url = format!(
            "sqlite://{}/control.db?mode=rwc",
            temp.path().to_string_lossy()
        );
        let control = Arc::new(ControlStore::new(&db_url).await.unwrap());
        (IncidentManager::new(control.clone()), control, temp)
    }

    #[tokio::test]
    async fn test_open_recur_resolve_lifecycle() {
        let (manager, control, _temp) = setup().await;
        let rule = rule("r-1");

        let outcome = manager
            .apply(&rule, &triggered_result(&rule, 1500.0), now())
            .await
            .unwrap();
        let opened = match outcome {
            IncidentOutcome::Opened(row) => row,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert_eq!(opened.status, STATUS_OPEN);
        assert_eq!(opened.occurrence_count, 1);
        assert_eq!(opened.title, "rule r-1: llm.latency_ms");

        let later = now() + Duration::minutes(1);
        let outcome = manager
            .apply(&rule, &triggered_result(&rule, 1600.0), later)
            .await
            .unwrap();
        let recurred = match outcome {
            IncidentOutcome::Recurred(row) => row,
            other => panic!("expected Recurred, got {other:?}"),
        };
        assert_eq!(recurred.id, opened.id);
        assert_eq!(recurred.occurrence_count, 2);
        assert_eq!(recurred.last_value, Some(1600.0));
        assert!(recurred.last_occurrence_at > opened.last_occurrence_at);

        let outcome = manager
            .apply(&rule, &clean_result(&rule), later + Duration::minutes(1))
            .await
            .unwrap();
        let resolved = match outcome {
            IncidentOutcome::Resolved(row) => row,
            other => panic!("expected Resolved, got {other:?}"),
        };
        assert_eq!(resolved.id, opened.id);
        assert_eq!(resolved.status, STATUS_RESOLVED);
        assert!(resolved.resolved_at.is_some());

        assert!(control.find_active_incident(&rule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_result_with_no_incident_is_clear() {
        let (manager, _control, _temp) = setup().await;
        let rule = rule("r-1");
        let outcome = manager.apply(&rule, &clean_result(&rule), now()).await.unwrap();
        assert!(matches!(outcome, IncidentOutcome::Clear));
    }

    #[tokio::test]
    async fn test_failed_evaluation_leaves_incident_open() {
        let (manager, control, _temp) = setup().await;
        let rule = rule("r-1");

        manager
            .apply(&rule, &triggered_result(&rule, 1500.0), now())
            .await
            .unwrap();

        let failed = EvaluationResult::failed(&rule, "telemetry offline".to_string(), now());
        let outcome = manager.apply(&rule, &failed, now()).await.unwrap();
        assert!(matches!(outcome, IncidentOutcome::Skipped));

        // Still open: a failed query must not resolve anything
        let active = control.find_active_incident(&rule.id).await.unwrap();
        assert!(active.is_some());
        assert_eq!(active.unwrap().occurrence_count, 1);
    }

    #[tokio::test]
    async fn test_unique_violation_folds_into_existing_incident() {
        let (manager, control, _temp) = setup().await;
        let rule = rule("r-1");

        // Simulate a concurrent winner that inserted between our
        // find_active_incident miss and the open_incident call.
        let winner = control
            .open_incident(
                &NewIncident {
                    rule_id: rule.id.clone(),
                    project_id: rule.project_id.clone(),
                    title: "rule r-1: llm.latency_ms".to_string(),
                    severity: "critical".to_string(),
                    metric: "llm.latency_ms".to_string(),
                    last_value: Some(1500.0),
                    threshold: Some(1000.0),
                },
                now(),
            )
            .await
            .unwrap();

        // A direct second insert trips the partial unique index
        let err = control
            .open_incident(
                &NewIncident {
                    rule_id: rule.id.clone(),
                    project_id: rule.project_id.clone(),
                    title: "dup".to_string(),
                    severity: "critical".to_string(),
                    metric: "llm.latency_ms".to_string(),
                    last_value: None,
                    threshold: None,
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        // The manager path folds the trigger into the winner instead
        let outcome = manager
            .apply(&rule, &triggered_result(&rule, 1700.0), now())
            .await
            .unwrap();
        let recurred = match outcome {
            IncidentOutcome::Recurred(row) => row,
            other => panic!("expected Recurred, got {other:?}"),
        };
        assert_eq!(recurred.id, winner.id);
        assert_eq!(recurred.occurrence_count, 2);
    }

    #[tokio::test]
    async fn test_resolved_incident_allows_reopening() {
        let (manager, _control, _temp) = setup().await;
        let rule = rule("r-1");

        let first = match manager
            .apply(&rule, &triggered_result(&rule, 1500.0), now())
            .await
            .unwrap()
        {
            IncidentOutcome::Opened(row) => row,
            other => panic!("expected Opened, got {other:?}"),
        };
        manager
            .apply(&rule, &clean_result(&rule), now() + Duration::minutes(1))
            .await
            .unwrap();

        // Resolved incidents don't block the partial unique index
        let second = match manager
            .apply(
                &rule,
                &triggered_result(&rule, 1800.0),
                now() + Duration::minutes(2),
            )
            .await
            .unwrap()
        {
            IncidentOutcome::Opened(row) => row,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert_ne!(second.id, first.id);
        assert_eq!(second.occurrence_count, 1);
    }
}
