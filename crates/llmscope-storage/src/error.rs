/// Errors that can occur within the storage layer.
///
/// Both backends funnel into this type: the partitioned telemetry engine
/// surfaces `rusqlite` failures and the relational control store surfaces
/// SeaORM failures.
///
/// # Examples
///
/// ```rust
/// use llmscope_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert_rule",
///     id: "rule-99".to_string(),
/// };
/// assert!(err.to_string().contains("alert_rule"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error from the telemetry partitions.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An underlying database error from the control store.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Filesystem failure while managing partition files.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failure (e.g. config_json columns).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    /// Whether this error is a SQLite unique-constraint violation.
    ///
    /// The incident table enforces at most one open or acknowledged incident
    /// per rule through a partial unique index, so a losing concurrent insert
    /// is expected and must be distinguishable from real failures.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::Database(err) => err.to_string().contains("UNIQUE constraint failed"),
            StorageError::Sqlite(err) => err.to_string().contains("UNIQUE constraint failed"),
            _ => false,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
