use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NliError {
    #[error("NLI model not found at path: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("failed to load NLI model: {reason}")]
    ModelLoadFailed { reason: String },

    #[error("NLI inference failed: {reason}")]
    InferenceFailed { reason: String },

    #[error("tokenization failed: {reason}")]
    TokenizationFailed { reason: String },

    #[error("invalid model configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Empty premise or hypothesis. Batches are all-or-nothing.
    #[error("invalid input pair: {reason}")]
    InvalidInput { reason: String },

    /// The accumulator task is gone (shutdown) and can no longer serve
    /// single-pair requests.
    #[error("batch accumulator unavailable: {reason}")]
    AccumulatorUnavailable { reason: String },
}

impl From<candle_core::Error> for NliError {
    fn from(err: candle_core::Error) -> Self {
        NliError::InferenceFailed {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for NliError {
    fn from(err: std::io::Error) -> Self {
        NliError::ModelLoadFailed {
            reason: err.to_string(),
        }
    }
}
