use thiserror::Error;

use crate::store::StoreError;

use super::ClaimStage;

/// Pipeline-level error taxonomy.
///
/// The variant determines the handling a stage applied before surfacing:
/// validation and model-inference errors are immediate and fatal for the
/// claim, retrieval errors have already been retried and degraded where
/// possible, storage errors have exhausted their retries.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Empty or malformed input; never retried.
    #[error("invalid input: {reason}")]
    Validation { reason: String },

    /// An embedding or NLI model call failed. Fatal for the affected claim
    /// only; sibling claims in a batch are unaffected.
    #[error("model inference failed: {reason}")]
    ModelInference { reason: String },

    /// Vector index unreachable or corrupt after retries.
    #[error("evidence retrieval failed: {reason}")]
    Retrieval { reason: String },

    /// Storage write failed after retries; the caller resubmits.
    #[error("storage operation failed: {0}")]
    Storage(#[from] StoreError),

    /// Cooperative cancellation observed at a stage boundary.
    #[error("cancelled at stage {stage}")]
    Cancelled { stage: ClaimStage },

    /// A worker task panicked or the pool shut down mid-run.
    #[error("internal pipeline error: {reason}")]
    Internal { reason: String },
}

impl PipelineError {
    /// Stable kind tag for logs and callers that branch on error class.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "validation",
            PipelineError::ModelInference { .. } => "model_inference",
            PipelineError::Retrieval { .. } => "retrieval",
            PipelineError::Storage(_) => "storage",
            PipelineError::Cancelled { .. } => "cancelled",
            PipelineError::Internal { .. } => "internal",
        }
    }
}
