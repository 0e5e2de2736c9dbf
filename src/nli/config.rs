use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_SEQ_LEN, DEFAULT_MAX_TEXT_CHARS};

use super::error::NliError;

/// Default NLI inference batch size (throughput knee on CPU).
///
/// Pair-by-pair scoring measures 4-5x slower per pair than batched scoring of
/// the same pairs; callers must never loop over single-pair calls.
pub const DEFAULT_NLI_BATCH_SIZE: usize = 16;

/// Default max wait before the accumulator flushes a partial batch.
pub const DEFAULT_ACCUMULATOR_MAX_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
/// Configuration for [`NliScorer`](super::NliScorer).
pub struct NliConfig {
    /// Directory holding `config.json`, `model.safetensors`, `tokenizer.json`.
    pub model_dir: PathBuf,
    /// Model identity recorded on NLI rows.
    pub model_name: String,
    /// Max tokens per premise/hypothesis pair after truncation.
    pub max_seq_len: usize,
    /// Character cap applied per text at a word boundary before tokenization
    /// (same policy as the embedder).
    pub max_text_chars: usize,
    /// Pairs per forward pass.
    pub batch_size: usize,
    /// If true, run in deterministic stub mode (no model files required).
    pub testing_stub: bool,
}

impl Default for NliConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::new(),
            model_name: "nli-deberta-v3-base".to_string(),
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            batch_size: DEFAULT_NLI_BATCH_SIZE,
            testing_stub: false,
        }
    }
}

impl NliConfig {
    pub fn new<P: Into<PathBuf>>(model_dir: P) -> Self {
        Self {
            model_dir: model_dir.into(),
            ..Default::default()
        }
    }

    /// Creates a deterministic stub config (tests and examples).
    pub fn stub() -> Self {
        Self {
            testing_stub: true,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), NliError> {
        if self.max_seq_len == 0 {
            return Err(NliError::InvalidConfig {
                reason: "max_seq_len cannot be zero".to_string(),
            });
        }
        if self.max_text_chars == 0 {
            return Err(NliError::InvalidConfig {
                reason: "max_text_chars cannot be zero".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(NliError::InvalidConfig {
                reason: "batch_size cannot be zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn model_available(&self) -> bool {
        self.model_dir.join("model.safetensors").is_file()
            && self.model_dir.join("config.json").is_file()
    }

    pub fn tokenizer_available(&self) -> bool {
        self.model_dir.join("tokenizer.json").is_file()
    }
}

#[derive(Debug, Clone)]
/// Configuration for the request-accumulation worker
/// ([`NliBatcher`](super::NliBatcher)).
pub struct BatcherConfig {
    /// Pending pairs that trigger an immediate flush.
    pub target_batch: usize,
    /// Max wait before flushing a partial batch. This bounded wait is the one
    /// intentional latency/throughput tradeoff knob exposed to callers.
    pub max_wait: Duration,
    /// Submission channel capacity.
    pub channel_capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            target_batch: DEFAULT_NLI_BATCH_SIZE,
            max_wait: DEFAULT_ACCUMULATOR_MAX_WAIT,
            channel_capacity: 1024,
        }
    }
}
