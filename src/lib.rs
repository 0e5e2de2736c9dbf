//! Claimcheck library crate (embedded by API layers and integration tests).
//!
//! Verifies natural-language claims against an evidence corpus: embed the
//! claim, retrieve semantically similar evidence from an in-process IVF
//! index, score each (evidence, claim) pair with a three-way NLI model, and
//! aggregate the per-pair results into a SUPPORTED / REFUTED / INSUFFICIENT
//! verdict persisted with full traceability.
//!
//! # Public API Surface
//!
//! ## Orchestration
//! - [`VerificationPipeline`] - single-claim and batched entry points
//! - [`CancelToken`], [`ClaimStage`] - cooperative cancellation and stages
//! - [`WeightStrategy`] - pluggable aggregation weighting
//!
//! ## Models
//! - [`ClaimEmbedder`], [`LazyEmbedder`] - sentence embeddings (candle BERT)
//! - [`NliScorer`], [`NliBatcher`] - batched NLI scoring and the
//!   request-accumulation path for single-pair callers
//!
//! ## Retrieval & Storage
//! - [`IvfIndex`], [`VectorIndexHandle`] - approximate cosine search with
//!   atomic-swap rebuilds
//! - [`BatchStore`] - batched, single-round-trip persistence primitives
//!
//! ## Configuration
//! - [`PipelineConfig`] - every tunable with documented defaults, overridable
//!   via `CLAIMCHECK_*` environment variables
//!
//! All model wrappers support a deterministic stub backend selected by
//! config, so the full pipeline runs in tests without model files.

pub mod config;
pub mod constants;
pub mod domain;
pub mod embedding;
pub mod index;
pub mod nli;
pub mod pipeline;
pub mod store;

pub use config::{ConfigError, PipelineConfig};
pub use constants::{
    DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_SEQ_LEN, DEFAULT_MAX_TEXT_CHARS, DimConfig,
    DimValidationError, validate_embedding_dim,
};
pub use domain::{
    Claim, Embedding, EntityType, Evidence, NliLabel, NliRecord, VerificationRecord, Verdict,
    bytes_to_vector, vector_to_bytes,
};
pub use embedding::{
    ClaimEmbedder, DEFAULT_EMBED_BATCH_SIZE, EmbedderConfig, EmbeddingError, LazyEmbedder,
    truncate_at_boundary,
};
pub use index::{IndexEntry, IndexError, IndexParams, IvfIndex, SearchHit, VectorIndexHandle};
pub use nli::{
    BatcherConfig, DEFAULT_ACCUMULATOR_MAX_WAIT, DEFAULT_NLI_BATCH_SIZE, LazyScorer, NliBatcher,
    NliConfig, NliError, NliScorer, ScoredPair,
};
pub use pipeline::{
    AggregationParams, CancelToken, ClaimStage, CredibilityWeight, MemoryBudget, PipelineError,
    RetryPolicy, UniformWeight, VerificationPipeline, WeightStrategy,
};
pub use store::{BatchStore, StoreError, StoreResult};
