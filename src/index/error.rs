use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Query or indexed vector dimensionality differs from the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid index parameters: {reason}")]
    InvalidParams { reason: String },
}
