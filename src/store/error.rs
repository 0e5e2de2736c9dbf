use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to database: {reason}")]
    ConnectionFailed { reason: String },

    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to decode row: {reason}")]
    Decode { reason: String },

    /// Embedding vector length differs from the deployment's fixed dimension.
    /// Checked on every write; mismatches never reach the table.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
