//! Batched natural-language-inference scoring (candle BERT cross-encoder).
//!
//! [`NliScorer`] is the batched inference wrapper; [`NliBatcher`] accumulates
//! concurrent single-pair requests into batched calls. Use
//! [`NliConfig::stub`] for tests/examples without model files.

pub mod config;
pub mod error;

mod batcher;
mod model;
mod scorer;

#[cfg(test)]
mod tests;

pub use batcher::NliBatcher;
pub use config::{
    BatcherConfig, DEFAULT_ACCUMULATOR_MAX_WAIT, DEFAULT_NLI_BATCH_SIZE, NliConfig,
};
pub use error::NliError;
pub use model::{BertNliClassifier, NLI_NUM_CLASSES};
pub use scorer::{LazyScorer, NliScorer, ScoredPair};
