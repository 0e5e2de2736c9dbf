use std::path::PathBuf;

use crate::constants::{DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_SEQ_LEN, DEFAULT_MAX_TEXT_CHARS};

use super::error::EmbeddingError;

/// Default embedding inference batch size.
///
/// Sits at the measured throughput knee for CPU backends: larger batches keep
/// gaining throughput but with steep diminishing returns while peak memory
/// grows linearly. Tune at runtime for accelerator backends.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
/// Configuration for [`ClaimEmbedder`](super::ClaimEmbedder).
pub struct EmbedderConfig {
    /// Directory holding `config.json`, `model.safetensors`, `tokenizer.json`.
    pub model_dir: PathBuf,
    /// Model identity recorded on embedding rows.
    pub model_name: String,
    pub model_version: String,
    /// Max tokens per input after truncation.
    pub max_seq_len: usize,
    /// Character cap applied at a word boundary before tokenization.
    pub max_text_chars: usize,
    /// Output embedding dimension.
    pub embedding_dim: usize,
    /// Texts per forward pass.
    pub batch_size: usize,
    /// If true, run in deterministic stub mode (no model files required).
    pub testing_stub: bool,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::new(),
            model_name: "all-MiniLM-L6-v2".to_string(),
            model_version: "1".to_string(),
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
            testing_stub: false,
        }
    }
}

impl EmbedderConfig {
    /// Creates a config for a model directory.
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

    /// Stub config with a non-default dimension.
    pub fn stub_with_dim(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            testing_stub: true,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.embedding_dim == 0 {
            return Err(EmbeddingError::InvalidConfig {
                reason: "embedding_dim cannot be zero".to_string(),
            });
        }
        if self.max_seq_len == 0 {
            return Err(EmbeddingError::InvalidConfig {
                reason: "max_seq_len cannot be zero".to_string(),
            });
        }
        if self.max_text_chars == 0 {
            return Err(EmbeddingError::InvalidConfig {
                reason: "max_text_chars cannot be zero".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(EmbeddingError::InvalidConfig {
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
