use crate::error::{Result, StorageError};
use crate::PartitionInfo;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const METRIC_POINTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metric_points (
    id TEXT PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    value REAL NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_points_project_name_time
    ON metric_points(project_id, name, timestamp);
CREATE INDEX IF NOT EXISTS idx_points_time
    ON metric_points(timestamp);
";

const LLM_REQUESTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS llm_requests (
    id TEXT PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    project_id TEXT NOT NULL,
    model TEXT NOT NULL,
    latency_ms REAL NOT NULL,
    prompt_tokens INTEGER NOT NULL,
    completion_tokens INTEGER NOT NULL,
    total_tokens INTEGER NOT NULL,
    cost_usd REAL NOT NULL,
    status TEXT NOT NULL,
    error_type TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_llm_project_time
    ON llm_requests(project_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_llm_status
    ON llm_requests(status);
";

/// Manages one SQLite database file per UTC day under a data directory.
///
/// Telemetry is append-heavy and queried by time range, so daily files keep
/// retention cheap (drop the file) and bound the size of any single index.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    fn open_connection(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(METRIC_POINTS_SCHEMA)?;
        conn.execute_batch(LLM_REQUESTS_SCHEMA)?;
        Ok(conn)
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let path = self.partition_path(&key);
            let existed = path.exists();
            let conn = Self::open_connection(&path)?;
            if !existed {
                tracing::info!(partition = %key, "Created new partition");
            }
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or_else(|| StorageError::Other(format!("Partition {key} not found")))?;
        f(conn)
    }

    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut day = from.date_naive();
        let last = to.date_naive();
        while day <= last {
            let key = day.format("%Y-%m-%d").to_string();
            let path = self.partition_path(&key);
            if path.exists() {
                // 确保连接已缓存，后续 with_partition 才能命中
                let mut conns = self.lock_connections();
                if !conns.contains_key(&key) {
                    conns.insert(key.clone(), Self::open_connection(&path)?);
                }
                keys.push(key);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(keys)
    }

    /// All `YYYY-MM-DD.db` files in the data directory, with their parsed
    /// dates. Files that do not look like partitions are ignored.
    fn scan_partition_files(&self) -> Result<Vec<(NaiveDate, String, PathBuf)>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".db") else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                found.push((date, stem.to_string(), entry.path()));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Drops partition files whose day predates the retention window.
    /// Best-effort per partition: a failed delete is logged and skipped,
    /// never aborts the sweep.
    pub fn cleanup_older_than(&self, retention_days: u32) -> Result<u32> {
        let cutoff_date = (Utc::now() - chrono::Duration::days(retention_days as i64)).date_naive();
        let mut removed = 0u32;

        for (date, key, db_path) in self.scan_partition_files()? {
            if date >= cutoff_date {
                continue;
            }

            // Drop the cached Connection first so WAL checkpoints before the
            // file goes away.
            self.lock_connections().remove(key.as_str());

            if let Err(e) = std::fs::remove_file(&db_path) {
                tracing::error!(partition = %key, error = %e, "Failed to remove partition file");
                continue;
            }
            for suffix in ["-wal", "-shm"] {
                let aux = self.data_dir.join(format!("{key}.db{suffix}"));
                if aux.exists() {
                    if let Err(e) = std::fs::remove_file(&aux) {
                        tracing::warn!(path = %aux.display(), error = %e, "Failed to remove auxiliary file");
                    }
                }
            }

            tracing::info!(partition = %key, "Removed expired partition");
            removed += 1;
        }

        Ok(removed)
    }

    /// 磁盘上所有分区文件的概要（按日期升序）
    pub fn list_partition_info(&self) -> Result<Vec<PartitionInfo>> {
        let mut infos = Vec::new();
        for (_, key, path) in self.scan_partition_files()? {
            let size_bytes = std::fs::metadata(&path)?.len();
            infos.push(PartitionInfo {
                date: key,
                size_bytes,
                path: path.to_string_lossy().to_string(),
            });
        }
        Ok(infos)
    }
}
