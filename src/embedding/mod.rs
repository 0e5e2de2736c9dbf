//! Sentence embedding generation (candle BERT + tokenizer).
//!
//! Use [`EmbedderConfig::stub`] for tests/examples without model files.

pub mod config;
pub mod device;
pub mod error;
pub mod truncate;

mod embedder;


pub use config::{DEFAULT_EMBED_BATCH_SIZE, EmbedderConfig};
pub use embedder::{ClaimEmbedder, LazyEmbedder};
pub use error::EmbeddingError;
pub use truncate::truncate_at_boundary;
