/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use propwatch_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert_instance",
///     id: "42".to_string(),
/// };
/// assert!(err.to_string().contains("alert_instance"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A record expected to exist (e.g. the target of an update) is missing.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (set-valued columns).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
