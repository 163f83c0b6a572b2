use chrono::{DateTime, Duration, Utc};
use llmscope_common::metric::{LlmMetric, MetricKind};
use llmscope_detect::aggregate::aggregate;
use llmscope_detect::rule::{AnomalySpec, RuleSpec};
use llmscope_storage::error::Result;
use llmscope_storage::{LlmOutcomes, OutcomePoint, TelemetryStore};
use std::sync::Arc;

/// Computes windowed metric values against the telemetry store.
///
/// Column-backed metrics aggregate per-request values; the relation-level
/// metrics (`llm.error_rate`, `llm.request_count`) derive from outcome
/// counts instead. `None` always means "no data in the window", never zero.
pub struct MetricAggregator {
    telemetry: Arc<dyn TelemetryStore>,
}

impl MetricAggregator {
    pub fn new(telemetry: Arc<dyn TelemetryStore>) -> Self {
        Self { telemetry }
    }

    /// The rule's current evaluation-window value over
    /// `[now - window_minutes, now)`.
    pub fn window_value(&self, rule: &RuleSpec, now: DateTime<Utc>) -> Result<Option<f64>> {
        let from = now - Duration::minutes(i64::from(rule.window_minutes));
        self.value_in_range(rule, from, now)
    }

    fn value_in_range(
        &self,
        rule: &RuleSpec,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        match &rule.metric {
            MetricKind::Generic(name) => {
                let values = self
                    .telemetry
                    .query_metric_values(&rule.project_id, name, from, to)?;
                Ok(aggregate(&values, rule.aggregation))
            }
            MetricKind::Llm(metric) => match metric {
                LlmMetric::ErrorRate => {
                    let outcomes = self.telemetry.query_llm_outcomes(&rule.project_id, from, to)?;
                    if outcomes.total == 0 {
                        Ok(None)
                    } else {
                        Ok(Some(outcomes.errored as f64 / outcomes.total as f64 * 100.0))
                    }
                }
                LlmMetric::RequestCount => {
                    let outcomes = self.telemetry.query_llm_outcomes(&rule.project_id, from, to)?;
                    if outcomes.total == 0 {
                        Ok(None)
                    } else {
                        Ok(Some(outcomes.total as f64))
                    }
                }
                metric => {
                    let values =
                        self.telemetry
                            .query_llm_values(&rule.project_id, *metric, from, to)?;
                    Ok(aggregate(&values, rule.aggregation))
                }
            },
        }
    }

    /// Historical series an anomaly rule's baseline is computed from,
    /// covering `[now - lookback_hours, now - window_minutes)` so the
    /// current evaluation window never contaminates its own baseline.
    ///
    /// Column-backed metrics return the raw per-request values. The
    /// relation-level metrics return one value per `window_minutes` bucket;
    /// buckets with no requests are no-data windows and are skipped rather
    /// than counted as zero.
    pub fn baseline_series(
        &self,
        rule: &RuleSpec,
        spec: &AnomalySpec,
        now: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let from = now - Duration::hours(i64::from(spec.lookback_hours));
        let to = now - Duration::minutes(i64::from(rule.window_minutes));
        if to <= from {
            return Ok(Vec::new());
        }
        match &rule.metric {
            MetricKind::Generic(name) => {
                self.telemetry
                    .query_metric_values(&rule.project_id, name, from, to)
            }
            MetricKind::Llm(metric) => match metric {
                LlmMetric::ErrorRate => {
                    let points =
                        self.telemetry
                            .query_llm_outcome_series(&rule.project_id, from, to)?;
                    let buckets = bucketed_outcomes(&points, from, to, rule.window_minutes);
                    Ok(buckets
                        .iter()
                        .filter(|b| b.total > 0)
                        .map(|b| b.errored as f64 / b.total as f64 * 100.0)
                        .collect())
                }
                LlmMetric::RequestCount => {
                    let points =
                        self.telemetry
                            .query_llm_outcome_series(&rule.project_id, from, to)?;
                    let buckets = bucketed_outcomes(&points, from, to, rule.window_minutes);
                    Ok(buckets
                        .iter()
                        .filter(|b| b.total > 0)
                        .map(|b| b.total as f64)
                        .collect())
                }
                metric => self
                    .telemetry
                    .query_llm_values(&rule.project_id, *metric, from, to),
            },
        }
    }
}

/// Groups outcome points into consecutive `bucket_minutes` windows over
/// `[from, to)`. Points must be sorted ascending, which the telemetry
/// queries guarantee.
fn bucketed_outcomes(
    points: &[OutcomePoint],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    bucket_minutes: u32,
) -> Vec<LlmOutcomes> {
    let bucket = Duration::minutes(i64::from(bucket_minutes.max(1)));
    let mut buckets = Vec::new();
    let mut start = from;
    let mut idx = 0;
    while start < to {
        let end = std::cmp::min(start + bucket, to);
        let mut outcomes = LlmOutcomes {
            errored: 0,
            total: 0,
        };
        while idx < points.len() && points[idx].timestamp < end {
            outcomes.total += 1;
            if points[idx].is_error {
                outcomes.errored += 1;
            }
            idx += 1;
        }
        buckets.push(outcomes);
        start = end;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use llmscope_common::types::{
        LlmCallStatus, LlmRequestRecord, MetricBatch, MetricPoint, Severity,
    };
    use llmscope_detect::aggregate::Aggregation;
    use llmscope_detect::rule::{CompareOp, RuleCheck, ThresholdSpec};
    use llmscope_storage::SqliteTelemetryStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn rule(metric: &str, aggregation: Aggregation, window_minutes: u32) -> RuleSpec {
        RuleSpec {
            id: "r-1".to_string(),
            project_id: "proj-a".to_string(),
            name: "test rule".to_string(),
            metric: metric.parse().unwrap(),
            aggregation,
            window_minutes,
            severity: Severity::Warning,
            cooldown_minutes: 0,
            channel_ids: vec![],
            last_triggered_at: None,
            check: RuleCheck::Threshold(ThresholdSpec {
                operator: CompareOp::Gt,
                value: 0.0,
            }),
        }
    }

    fn setup() -> (MetricAggregator, Arc<SqliteTelemetryStore>, TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteTelemetryStore::new(temp.path()).unwrap());
        let aggregator = MetricAggregator::new(store.clone());
        (aggregator, store, temp)
    }

    fn write_points(store: &SqliteTelemetryStore, project: &str, name: &str, points: &[(i64, f64)]) {
        let ts = now();
        let batch = MetricBatch {
            project_id: project.to_string(),
            timestamp: ts,
            points: points
                .iter()
                .map(|(secs_ago, value)| MetricPoint {
                    id: llmscope_common::id::next_id(),
                    timestamp: ts - Duration::seconds(*secs_ago),
                    project_id: project.to_string(),
                    name: name.to_string(),
                    value: *value,
                    labels: HashMap::new(),
                    created_at: ts,
                    updated_at: ts,
                })
                .collect(),
        };
        store.write_metrics(&batch).unwrap();
    }

    fn write_llm(store: &SqliteTelemetryStore, project: &str, rows: &[(i64, f64, LlmCallStatus)]) {
        let ts = now();
        let records: Vec<LlmRequestRecord> = rows
            .iter()
            .map(|(secs_ago, latency, status)| LlmRequestRecord {
                id: llmscope_common::id::next_id(),
                timestamp: ts - Duration::seconds(*secs_ago),
                project_id: project.to_string(),
                model: "gpt-4o".to_string(),
                latency_ms: *latency,
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
                cost_usd: 0.01,
                status: *status,
                error_type: None,
                created_at: ts,
                updated_at: ts,
            })
            .collect();
        store.write_llm_requests(&records).unwrap();
    }

    #[test]
    fn test_generic_metric_aggregates_window() {
        let (aggregator, store, _temp) = setup();
        // 3 points inside the 5m window, 1 outside
        write_points(
            &store,
            "proj-a",
            "queue_depth",
            &[(60, 10.0), (120, 20.0), (240, 30.0), (600, 99.0)],
        );

        let rule = rule("queue_depth", Aggregation::Avg, 5);
        let value = aggregator.window_value(&rule, now()).unwrap();
        assert_eq!(value, Some(20.0));
    }

    #[test]
    fn test_empty_window_is_none_for_all_aggregations() {
        let (aggregator, _store, _temp) = setup();
        for agg in [
            Aggregation::Avg,
            Aggregation::Sum,
            Aggregation::Min,
            Aggregation::Max,
            Aggregation::Count,
            Aggregation::P95,
        ] {
            let rule = rule("queue_depth", agg, 5);
            assert_eq!(aggregator.window_value(&rule, now()).unwrap(), None);
        }
    }

    #[test]
    fn test_error_rate_is_percentage() {
        let (aggregator, store, _temp) = setup();
        write_llm(
            &store,
            "proj-a",
            &[
                (30, 100.0, LlmCallStatus::Success),
                (60, 100.0, LlmCallStatus::Error),
                (90, 100.0, LlmCallStatus::Success),
                (120, 100.0, LlmCallStatus::Error),
            ],
        );

        let rule = rule("llm.error_rate", Aggregation::Avg, 5);
        let value = aggregator.window_value(&rule, now()).unwrap();
        assert_eq!(value, Some(50.0));
    }

    #[test]
    fn test_request_count_counts_rows() {
        let (aggregator, store, _temp) = setup();
        write_llm(
            &store,
            "proj-a",
            &[
                (30, 100.0, LlmCallStatus::Success),
                (60, 100.0, LlmCallStatus::Success),
                (600, 100.0, LlmCallStatus::Success),
            ],
        );

        let rule = rule("llm.request_count", Aggregation::Avg, 5);
        let value = aggregator.window_value(&rule, now()).unwrap();
        assert_eq!(value, Some(2.0));
    }

    #[test]
    fn test_no_requests_is_none_not_zero() {
        let (aggregator, _store, _temp) = setup();
        let error_rate = rule("llm.error_rate", Aggregation::Avg, 5);
        assert_eq!(aggregator.window_value(&error_rate, now()).unwrap(), None);
        let request_count = rule("llm.request_count", Aggregation::Avg, 5);
        assert_eq!(aggregator.window_value(&request_count, now()).unwrap(), None);
    }

    #[test]
    fn test_llm_latency_p95() {
        let (aggregator, store, _temp) = setup();
        let rows: Vec<(i64, f64, LlmCallStatus)> = (1..=20)
            .map(|i| (i as i64, (i * 100) as f64, LlmCallStatus::Success))
            .collect();
        write_llm(&store, "proj-a", &rows);

        let rule = rule("llm.latency_ms", Aggregation::P95, 5);
        let value = aggregator.window_value(&rule, now()).unwrap();
        // Nearest-rank p95 over 100..2000 step 100
        assert_eq!(value, Some(1900.0));
    }

    #[test]
    fn test_baseline_excludes_current_window() {
        let (aggregator, store, _temp) = setup();
        // One point 2 minutes ago (inside current window), one 10 minutes ago
        write_points(&store, "proj-a", "queue_depth", &[(120, 50.0), (600, 10.0)]);

        let rule = rule("queue_depth", Aggregation::Avg, 5);
        let spec = AnomalySpec {
            deviation_threshold: 3.0,
            lookback_hours: 1,
            min_samples: 1,
        };
        let series = aggregator.baseline_series(&rule, &spec, now()).unwrap();
        assert_eq!(series, vec![10.0]);
    }

    #[test]
    fn test_baseline_empty_when_lookback_inside_window() {
        let (aggregator, store, _temp) = setup();
        write_points(&store, "proj-a", "queue_depth", &[(600, 10.0)]);

        // 60-minute window with a 1-hour lookback: the baseline range is empty
        let rule = rule("queue_depth", Aggregation::Avg, 60);
        let spec = AnomalySpec {
            deviation_threshold: 3.0,
            lookback_hours: 1,
            min_samples: 1,
        };
        let series = aggregator.baseline_series(&rule, &spec, now()).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_bucketed_outcomes_skip_empty_windows() {
        let from = now() - Duration::minutes(20);
        let to = now();
        // Requests only in the first and last 5m buckets
        let points = vec![
            OutcomePoint {
                timestamp: from + Duration::minutes(1),
                is_error: true,
            },
            OutcomePoint {
                timestamp: from + Duration::minutes(2),
                is_error: false,
            },
            OutcomePoint {
                timestamp: from + Duration::minutes(16),
                is_error: false,
            },
        ];
        let buckets = bucketed_outcomes(&points, from, to, 5);
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[0], LlmOutcomes { errored: 1, total: 2 });
        assert_eq!(buckets[1], LlmOutcomes { errored: 0, total: 0 });
        assert_eq!(buckets[3], LlmOutcomes { errored: 0, total: 1 });
    }

    #[test]
    fn test_error_rate_baseline_is_per_bucket() {
        let (aggregator, store, _temp) = setup();
        // Two historical 5m windows with traffic: 10 and 20 minutes ago
        write_llm(
            &store,
            "proj-a",
            &[
                (600, 100.0, LlmCallStatus::Error),
                (610, 100.0, LlmCallStatus::Success),
                (1200, 100.0, LlmCallStatus::Success),
                (1210, 100.0, LlmCallStatus::Success),
            ],
        );

        let rule = rule("llm.error_rate", Aggregation::Avg, 5);
        let spec = AnomalySpec {
            deviation_threshold: 3.0,
            lookback_hours: 1,
            min_samples: 1,
        };
        let series = aggregator.baseline_series(&rule, &spec, now()).unwrap();
        // Empty buckets skipped; one 50% window and one 0% window remain
        assert_eq!(series.len(), 2);
        assert!(series.contains(&50.0));
        assert!(series.contains(&0.0));
    }
}
