//! Storage layer for telemetry and detection state.
//!
//! Telemetry (generic metric points and LLM request records) goes through the
//! [`TelemetryStore`] trait, whose default implementation
//! ([`engine::SqliteTelemetryStore`]) uses daily time-partitioned SQLite
//! databases with WAL mode for concurrent reads. Detection state (rules,
//! incidents, alerts, anomalies, notifications, channels) lives in a separate
//! relational [`control::ControlStore`] database managed by SeaORM migrations.

pub mod control;
pub mod engine;
pub mod entities;
pub mod error;
pub mod partition;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use error::Result;
use llmscope_common::metric::LlmMetric;
use llmscope_common::types::{LlmRequestRecord, MetricBatch};

/// Error/total request counts over a time range, the inputs to the
/// `llm.error_rate` and `llm.request_count` aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmOutcomes {
    pub errored: u64,
    pub total: u64,
}

/// One LLM request outcome, used to rebuild historical per-window series
/// for relation-level metrics.
#[derive(Debug, Clone, Copy)]
pub struct OutcomePoint {
    pub timestamp: DateTime<Utc>,
    pub is_error: bool,
}

/// Persistence backend for telemetry reads and writes.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the storage is accessed from both the ingestion handlers and the
/// detection cycle concurrently. All time ranges are half-open: a row at
/// exactly `from` is included, a row at exactly `to` is not.
pub trait TelemetryStore: Send + Sync {
    /// Writes a batch of metric points, typically received from an SDK.
    fn write_metrics(&self, batch: &MetricBatch) -> Result<()>;

    /// Writes a batch of LLM request records.
    fn write_llm_requests(&self, records: &[LlmRequestRecord]) -> Result<()>;

    /// Returns the values of one generic metric series in `[from, to)`,
    /// ordered by timestamp ascending.
    fn query_metric_values(
        &self,
        project_id: &str,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>>;

    /// Returns per-request values of a column-backed LLM metric in
    /// `[from, to)`, ordered by timestamp ascending. Relation-level metrics
    /// (`llm.error_rate`, `llm.request_count`) have no per-request value and
    /// are rejected.
    fn query_llm_values(
        &self,
        project_id: &str,
        metric: LlmMetric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>>;

    /// Returns error/total request counts in `[from, to)`.
    fn query_llm_outcomes(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LlmOutcomes>;

    /// Returns every request outcome in `[from, to)` ordered by timestamp
    /// ascending, for callers that bucket outcomes into historical windows.
    fn query_llm_outcome_series(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OutcomePoint>>;

    /// Removes partitions older than `retention_days`. Returns the number of
    /// partitions removed.
    fn cleanup(&self, retention_days: u32) -> Result<u32>;

    /// Returns partition (daily database) information.
    fn list_partitions(&self) -> Result<Vec<PartitionInfo>>;
}

/// Information about a storage partition (daily SQLite database).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PartitionInfo {
    pub date: String,
    pub size_bytes: u64,
    pub path: String,
}

pub use control::ControlStore;
pub use engine::SqliteTelemetryStore;
pub use error::StorageError;
