use chrono::{DateTime, Utc};
use llmscope_detect::rule::{evaluate_anomaly, evaluate_threshold, EvaluationResult, RuleCheck, RuleSpec};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::aggregator::MetricAggregator;

/// Evaluates a batch of rules concurrently against the telemetry store.
///
/// Concurrency is bounded by a semaphore and each rule gets its own
/// timeout, so one slow or broken rule cannot stall the cycle. A failure
/// (query error, timeout, panic) becomes a non-triggered result carrying
/// the error instead of aborting the batch.
pub struct RuleEvaluator {
    aggregator: Arc<MetricAggregator>,
    semaphore: Arc<Semaphore>,
    rule_timeout: std::time::Duration,
}

impl RuleEvaluator {
    pub fn new(
        aggregator: Arc<MetricAggregator>,
        max_concurrent: usize,
        rule_timeout: std::time::Duration,
    ) -> Self {
        Self {
            aggregator,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            rule_timeout,
        }
    }

    /// Evaluates all rules at `now`, returning results in input order.
    pub async fn evaluate_all(
        &self,
        rules: &[RuleSpec],
        now: DateTime<Utc>,
    ) -> Vec<EvaluationResult> {
        let mut handles = Vec::with_capacity(rules.len());
        for rule in rules {
            let aggregator = self.aggregator.clone();
            let semaphore = self.semaphore.clone();
            let rule_timeout = self.rule_timeout;
            let rule = rule.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return EvaluationResult::failed(
                            &rule,
                            "evaluator semaphore closed".to_string(),
                            now,
                        )
                    }
                };
                match tokio::time::timeout(rule_timeout, evaluate_one(aggregator, rule.clone(), now))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => EvaluationResult::failed(
                        &rule,
                        format!("timed out after {}s", rule_timeout.as_secs()),
                        now,
                    ),
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (rule, handle) in rules.iter().zip(handles) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(EvaluationResult::failed(
                    rule,
                    format!("evaluation task panicked: {e}"),
                    now,
                )),
            }
        }
        results
    }
}

/// Runs one rule's queries and check on the blocking pool. The queries are
/// synchronous SQLite reads; keeping them off the async workers lets the
/// surrounding timeout actually fire.
async fn evaluate_one(
    aggregator: Arc<MetricAggregator>,
    rule: RuleSpec,
    now: DateTime<Utc>,
) -> EvaluationResult {
    let task_rule = rule.clone();
    let outcome =
        tokio::task::spawn_blocking(move || run_checks(&aggregator, &task_rule, now)).await;
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            EvaluationResult::failed(&rule, format!("telemetry query failed: {e}"), now)
        }
        Err(e) => EvaluationResult::failed(&rule, format!("evaluation task panicked: {e}"), now),
    }
}

fn run_checks(
    aggregator: &MetricAggregator,
    rule: &RuleSpec,
    now: DateTime<Utc>,
) -> llmscope_storage::error::Result<EvaluationResult> {
    let value = aggregator.window_value(rule, now)?;
    match &rule.check {
        RuleCheck::Threshold(spec) => Ok(evaluate_threshold(rule, spec, value, now)),
        RuleCheck::Anomaly(spec) => {
            let series = aggregator.baseline_series(rule, spec, now)?;
            Ok(evaluate_anomaly(rule, spec, value, &series, now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use llmscope_common::types::{LlmRequestRecord, MetricBatch, Severity};
    use llmscope_detect::aggregate::Aggregation;
    use llmscope_detect::rule::{CompareOp, ThresholdSpec};
    use llmscope_storage::error::{Result, StorageError};
    use llmscope_storage::{LlmOutcomes, OutcomePoint, PartitionInfo, TelemetryStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn rule(id: &str, threshold: f64) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            project_id: "proj-a".to_string(),
            name: format!("rule {id}"),
            metric: "queue_depth".parse().unwrap(),
            aggregation: Aggregation::Avg,
            window_minutes: 5,
            severity: Severity::Warning,
            cooldown_minutes: 0,
            channel_ids: vec![],
            last_triggered_at: None,
            check: RuleCheck::Threshold(ThresholdSpec {
                operator: CompareOp::Gt,
                value: threshold,
            }),
        }
    }

    /// Test double: fixed value per query, optional per-call delay or error.
    struct StubStore {
        value: f64,
        delay: Option<std::time::Duration>,
        fail: bool,
    }

    impl StubStore {
        fn with_value(value: f64) -> Self {
            Self {
                value,
                delay: None,
                fail: false,
            }
        }
    }

    impl TelemetryStore for StubStore {
        fn write_metrics(&self, _batch: &MetricBatch) -> Result<()> {
            Ok(())
        }

        fn write_llm_requests(&self, _records: &[LlmRequestRecord]) -> Result<()> {
            Ok(())
        }

        fn query_metric_values(
            &self,
            _project_id: &str,
            _name: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<f64>> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail {
                return Err(StorageError::Other("partition offline".to_string()));
            }
            Ok(vec![self.value])
        }

        fn query_llm_values(
            &self,
            _project_id: &str,
            _metric: llmscope_common::metric::LlmMetric,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<f64>> {
            Ok(vec![])
        }

        fn query_llm_outcomes(
            &self,
            _project_id: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<LlmOutcomes> {
            Ok(LlmOutcomes {
                errored: 0,
                total: 0,
            })
        }

        fn query_llm_outcome_series(
            &self,
            _project_id: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<OutcomePoint>> {
            Ok(vec![])
        }

        fn cleanup(&self, _retention_days: u32) -> Result<u32> {
            Ok(0)
        }

        fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
            Ok(vec![])
        }
    }

    fn evaluator_over(store: StubStore, timeout: std::time::Duration) -> RuleEvaluator {
        let aggregator = Arc::new(MetricAggregator::new(Arc::new(store)));
        RuleEvaluator::new(aggregator, 10, timeout)
    }

    #[tokio::test]
    async fn test_results_preserve_rule_order() {
        let evaluator = evaluator_over(
            StubStore::with_value(50.0),
            std::time::Duration::from_secs(5),
        );
        let rules = vec![rule("r-1", 10.0), rule("r-2", 100.0), rule("r-3", 40.0)];

        let results = evaluator.evaluate_all(&rules, now()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].rule_id, "r-1");
        assert_eq!(results[1].rule_id, "r-2");
        assert_eq!(results[2].rule_id, "r-3");
        assert!(results[0].triggered);
        assert!(!results[1].triggered);
        assert!(results[2].triggered);
    }

    #[tokio::test]
    async fn test_query_failure_is_isolated() {
        let store = StubStore {
            value: 0.0,
            delay: None,
            fail: true,
        };
        let evaluator = evaluator_over(store, std::time::Duration::from_secs(5));
        let rules = vec![rule("r-1", 10.0)];

        let results = evaluator.evaluate_all(&rules, now()).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].triggered);
        let error = results[0].error.as_deref().unwrap();
        assert!(error.contains("partition offline"), "got: {error}");
        assert!(results[0].message.starts_with("evaluation failed:"));
    }

    #[tokio::test]
    async fn test_slow_rule_times_out() {
        let store = StubStore {
            value: 50.0,
            delay: Some(std::time::Duration::from_millis(300)),
            fail: false,
        };
        let evaluator = evaluator_over(store, std::time::Duration::from_millis(50));
        let rules = vec![rule("r-1", 10.0)];

        let results = evaluator.evaluate_all(&rules, now()).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].triggered);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_no_data_does_not_trigger() {
        struct EmptyStore;
        impl TelemetryStore for EmptyStore {
            fn write_metrics(&self, _b: &MetricBatch) -> Result<()> {
                Ok(())
            }
            fn write_llm_requests(&self, _r: &[LlmRequestRecord]) -> Result<()> {
                Ok(())
            }
            fn query_metric_values(
                &self,
                _p: &str,
                _n: &str,
                _f: DateTime<Utc>,
                _t: DateTime<Utc>,
            ) -> Result<Vec<f64>> {
                Ok(vec![])
            }
            fn query_llm_values(
                &self,
                _p: &str,
                _m: llmscope_common::metric::LlmMetric,
                _f: DateTime<Utc>,
                _t: DateTime<Utc>,
            ) -> Result<Vec<f64>> {
                Ok(vec![])
            }
            fn query_llm_outcomes(
                &self,
                _p: &str,
                _f: DateTime<Utc>,
                _t: DateTime<Utc>,
            ) -> Result<LlmOutcomes> {
                Ok(LlmOutcomes {
                    errored: 0,
                    total: 0,
                })
            }
            fn query_llm_outcome_series(
                &self,
                _p: &str,
                _f: DateTime<Utc>,
                _t: DateTime<Utc>,
            ) -> Result<Vec<OutcomePoint>> {
                Ok(vec![])
            }
            fn cleanup(&self, _d: u32) -> Result<u32> {
                Ok(0)
            }
            fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
                Ok(vec![])
            }
        }

        let aggregator = Arc::new(MetricAggregator::new(Arc::new(EmptyStore)));
        let evaluator = RuleEvaluator::new(aggregator, 10, std::time::Duration::from_secs(5));
        let rules = vec![rule("r-1", 10.0)];

        let results = evaluator.evaluate_all(&rules, now()).await;
        assert!(!results[0].triggered);
        assert!(results[0].error.is_none());
        assert!(results[0].message.contains("no data"));
    }
}
