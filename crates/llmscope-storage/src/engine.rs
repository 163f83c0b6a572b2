use crate::error::{Result, StorageError};
use crate::partition::PartitionManager;
use crate::{LlmOutcomes, OutcomePoint, PartitionInfo, TelemetryStore};
use chrono::{DateTime, Utc};
use llmscope_common::metric::LlmMetric;
use llmscope_common::types::{LlmRequestRecord, MetricBatch, MetricPoint};
use std::collections::HashMap;
use std::path::Path;

pub struct SqliteTelemetryStore {
    partitions: PartitionManager,
}

impl SqliteTelemetryStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }

    /// Maps a column-backed LLM metric to its `llm_requests` column.
    fn llm_column(metric: LlmMetric) -> Result<&'static str> {
        match metric {
            LlmMetric::LatencyMs => Ok("latency_ms"),
            LlmMetric::PromptTokens => Ok("prompt_tokens"),
            LlmMetric::CompletionTokens => Ok("completion_tokens"),
            LlmMetric::TotalTokens => Ok("total_tokens"),
            LlmMetric::CostUsd => Ok("cost_usd"),
            LlmMetric::ErrorRate | LlmMetric::RequestCount => Err(StorageError::Other(format!(
                "{metric} has no per-request column"
            ))),
        }
    }
}

impl TelemetryStore for SqliteTelemetryStore {
    fn write_metrics(&self, batch: &MetricBatch) -> Result<()> {
        // Points near midnight can straddle partition days, so group per point
        // rather than keying the whole batch by its envelope timestamp.
        let mut by_partition: HashMap<String, Vec<&MetricPoint>> = HashMap::new();
        for point in &batch.points {
            let key = self.partitions.get_or_create(point.timestamp)?;
            by_partition.entry(key).or_default().push(point);
        }

        for (key, points) in by_partition {
            self.partitions.with_partition(&key, |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO metric_points (id, timestamp, project_id, name, value, labels, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )?;
                    for point in &points {
                        let labels_json = serde_json::to_string(&point.labels)?;
                        stmt.execute(rusqlite::params![
                            &point.id,
                            point.timestamp.timestamp_millis(),
                            &point.project_id,
                            &point.name,
                            point.value,
                            labels_json,
                            point.created_at.timestamp_millis(),
                            point.updated_at.timestamp_millis(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn write_llm_requests(&self, records: &[LlmRequestRecord]) -> Result<()> {
        let mut by_partition: HashMap<String, Vec<&LlmRequestRecord>> = HashMap::new();
        for record in records {
            let key = self.partitions.get_or_create(record.timestamp)?;
            by_partition.entry(key).or_default().push(record);
        }

        for (key, records) in by_partition {
            self.partitions.with_partition(&key, |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO llm_requests (id, timestamp, project_id, model, latency_ms,
                             prompt_tokens, completion_tokens, total_tokens, cost_usd, status,
                             error_type, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    )?;
                    for record in &records {
                        stmt.execute(rusqlite::params![
                            &record.id,
                            record.timestamp.timestamp_millis(),
                            &record.project_id,
                            &record.model,
                            record.latency_ms,
                            record.prompt_tokens,
                            record.completion_tokens,
                            record.total_tokens,
                            record.cost_usd,
                            record.status.to_string(),
                            record.error_type.as_deref(),
                            record.created_at.timestamp_millis(),
                            record.updated_at.timestamp_millis(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn query_metric_values(
        &self,
        project_id: &str,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let keys = self.partitions.partitions_in_range(from, to)?;
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();
        let mut rows_out: Vec<(i64, f64)> = Vec::new();

        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT timestamp, value FROM metric_points
                     WHERE project_id = ?1 AND name = ?2 AND timestamp >= ?3 AND timestamp < ?4
                     ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![project_id, name, from_ms, to_ms],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
                )?;
                for row in rows {
                    rows_out.push(row?);
                }
                Ok(())
            })?;
        }

        rows_out.sort_by_key(|(ts, _)| *ts);
        Ok(rows_out.into_iter().map(|(_, value)| value).collect())
    }

    fn query_llm_values(
        &self,
        project_id: &str,
        metric: LlmMetric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let column = Self::llm_column(metric)?;
        let keys = self.partitions.partitions_in_range(from, to)?;
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();
        let mut rows_out: Vec<(i64, f64)> = Vec::new();

        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                // `column` comes from the closed LlmMetric mapping above, never
                // from user input.
                let sql = format!(
                    "SELECT timestamp, {column} FROM llm_requests
                     WHERE project_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                     ORDER BY timestamp ASC"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(rusqlite::params![project_id, from_ms, to_ms], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                })?;
                for row in rows {
                    rows_out.push(row?);
                }
                Ok(())
            })?;
        }

        rows_out.sort_by_key(|(ts, _)| *ts);
        Ok(rows_out.into_iter().map(|(_, value)| value).collect())
    }

    fn query_llm_outcomes(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LlmOutcomes> {
        let keys = self.partitions.partitions_in_range(from, to)?;
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();
        let mut totals = LlmOutcomes {
            errored: 0,
            total: 0,
        };

        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                let (total, errored): (u64, u64) = conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0)
                     FROM llm_requests
                     WHERE project_id = ?1 AND timestamp >= ?2 AND timestamp < ?3",
                    rusqlite::params![project_id, from_ms, to_ms],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                totals.total += total;
                totals.errored += errored;
                Ok(())
            })?;
        }

        Ok(totals)
    }

    fn query_llm_outcome_series(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OutcomePoint>> {
        let keys = self.partitions.partitions_in_range(from, to)?;
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();
        let mut points = Vec::new();

        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT timestamp, status FROM llm_requests
                     WHERE project_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                     ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![project_id, from_ms, to_ms], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (ts_ms, status) = row?;
                    let timestamp = DateTime::from_timestamp_millis(ts_ms).unwrap_or_default();
                    points.push(OutcomePoint {
                        timestamp,
                        is_error: status == "error",
                    });
                }
                Ok(())
            })?;
        }

        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    fn cleanup(&self, retention_days: u32) -> Result<u32> {
        self.partitions.cleanup_older_than(retention_days)
    }

    fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        self.partitions.list_partition_info()
    }
}
