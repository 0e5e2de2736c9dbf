//! Environment-backed pipeline configuration.
//!
//! Every tunable the pipeline exposes lives here with a documented default.
//! Override with `CLAIMCHECK_*` environment variables and call
//! [`PipelineConfig::validate`] before constructing the pipeline.

pub mod error;


pub use error::ConfigError;

use std::env;
use std::path::PathBuf;

use crate::constants::{DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_TEXT_CHARS};
use crate::embedding::EmbedderConfig;
use crate::index::IndexParams;
use crate::nli::NliConfig;

/// Full set of pipeline tunables with validated ranges.
///
/// Batch sizes default to the measured throughput knee, not the maximum:
/// beyond roughly twice the knee the gain is under 5% while peak memory keeps
/// growing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// SQLite connection string. Default: `sqlite::memory:`.
    pub database_url: String,

    /// Connection pool size. Default: `5`. An in-memory `database_url` needs
    /// a pool of `1`: each `:memory:` connection is its own database.
    pub max_connections: u32,

    /// Directory holding the embedding model files. Default: empty.
    pub embed_model_dir: PathBuf,

    /// Directory holding the NLI model files. Default: empty.
    pub nli_model_dir: PathBuf,

    /// Run both models in deterministic stub mode (no model files required).
    /// Default: `false`.
    pub use_stub_models: bool,

    /// Embedding inference batch size. Default: `32`.
    pub embed_batch_size: usize,

    /// NLI inference batch size. Default: `16`.
    pub nli_batch_size: usize,

    /// Pending single-pair requests that trigger an accumulator flush.
    /// Default: `16`.
    pub accumulator_target: usize,

    /// Max wait before flushing a partial accumulator batch, in milliseconds.
    /// Default: `100`.
    pub accumulator_max_wait_ms: u64,

    /// Evidence candidates retrieved per claim. Default: `10`.
    pub top_k: usize,

    /// Minimum cosine similarity for retrieved evidence. Default: `0.5`.
    pub min_similarity: f32,

    /// Minimum evidence rows required before a SUPPORTED/REFUTED verdict.
    /// Default: `1`.
    pub min_evidence_count: u32,

    /// Minimum aggregate confidence required before a SUPPORTED/REFUTED
    /// verdict. Default: `0.5`.
    pub min_confidence: f32,

    /// If support and refute scores differ by less than this, the verdict is
    /// INSUFFICIENT. Default: `0.05`.
    pub tie_epsilon: f32,

    /// Worker pool size for `verify_batch`. `1` selects sequential mode.
    /// Default: `4`.
    pub max_workers: usize,

    /// Process-wide memory budget enforced by adaptive batch sizing.
    /// Default: 4 GiB.
    pub memory_budget_bytes: u64,

    /// Character cap applied to claim/evidence text before tokenization.
    /// Default: `512`.
    pub max_text_chars: usize,

    /// Embedding dimension (fixed per deployment). Default: `384`.
    pub embedding_dim: usize,

    /// IVF build-time partition count. Seeds the index handle; rebuilds keep
    /// it unless [`ivf_auto_tune`](Self::ivf_auto_tune) is on. Default: `100`.
    pub ivf_partitions: usize,

    /// IVF query-time probe count. Default: `20`.
    pub ivf_probes: usize,

    /// Retune partitions/probes to the corpus size on every index rebuild
    /// (see `IndexParams::recommended`). Disable to pin the configured
    /// `ivf_partitions`/`ivf_probes`. Default: `true`.
    pub ivf_auto_tune: bool,

    /// Corpus growth fraction since the last build that triggers a rebuild.
    /// Default: `0.3`.
    pub rebuild_growth_fraction: f32,

    /// Retry attempts for storage and retrieval stages. Default: `3`.
    pub retry_attempts: u32,

    /// Base backoff delay between retries, in milliseconds (doubles per
    /// attempt). Default: `50`.
    pub retry_base_delay_ms: u64,

    /// Provenance string recorded on every verification row.
    pub pipeline_version: String,

    /// Retrieval method recorded on every verification row.
    pub retrieval_method: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 5,
            embed_model_dir: PathBuf::new(),
            nli_model_dir: PathBuf::new(),
            use_stub_models: false,
            embed_batch_size: 32,
            nli_batch_size: 16,
            accumulator_target: 16,
            accumulator_max_wait_ms: 100,
            top_k: 10,
            min_similarity: 0.5,
            min_evidence_count: 1,
            min_confidence: 0.5,
            tie_epsilon: 0.05,
            max_workers: 4,
            memory_budget_bytes: 4 * 1024 * 1024 * 1024,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            ivf_partitions: 100,
            ivf_probes: 20,
            ivf_auto_tune: true,
            rebuild_growth_fraction: 0.3,
            retry_attempts: 3,
            retry_base_delay_ms: 50,
            pipeline_version: format!("claimcheck-{}", env!("CARGO_PKG_VERSION")),
            retrieval_method: "ivf_cosine".to_string(),
        }
    }
}

impl PipelineConfig {
    const ENV_DATABASE_URL: &'static str = "CLAIMCHECK_DATABASE_URL";
    const ENV_MAX_CONNECTIONS: &'static str = "CLAIMCHECK_MAX_CONNECTIONS";
    const ENV_EMBED_MODEL_DIR: &'static str = "CLAIMCHECK_EMBED_MODEL_DIR";
    const ENV_NLI_MODEL_DIR: &'static str = "CLAIMCHECK_NLI_MODEL_DIR";
    const ENV_USE_STUB_MODELS: &'static str = "CLAIMCHECK_USE_STUB_MODELS";
    const ENV_EMBED_BATCH_SIZE: &'static str = "CLAIMCHECK_EMBED_BATCH_SIZE";
    const ENV_NLI_BATCH_SIZE: &'static str = "CLAIMCHECK_NLI_BATCH_SIZE";
    const ENV_ACCUMULATOR_TARGET: &'static str = "CLAIMCHECK_ACCUMULATOR_TARGET";
    const ENV_ACCUMULATOR_MAX_WAIT_MS: &'static str = "CLAIMCHECK_ACCUMULATOR_MAX_WAIT_MS";
    const ENV_TOP_K: &'static str = "CLAIMCHECK_TOP_K";
    const ENV_MIN_SIMILARITY: &'static str = "CLAIMCHECK_MIN_SIMILARITY";
    const ENV_MIN_EVIDENCE_COUNT: &'static str = "CLAIMCHECK_MIN_EVIDENCE_COUNT";
    const ENV_MIN_CONFIDENCE: &'static str = "CLAIMCHECK_MIN_CONFIDENCE";
    const ENV_TIE_EPSILON: &'static str = "CLAIMCHECK_TIE_EPSILON";
    const ENV_MAX_WORKERS: &'static str = "CLAIMCHECK_MAX_WORKERS";
    const ENV_MEMORY_BUDGET_BYTES: &'static str = "CLAIMCHECK_MEMORY_BUDGET_BYTES";
    const ENV_MAX_TEXT_CHARS: &'static str = "CLAIMCHECK_MAX_TEXT_CHARS";
    const ENV_EMBEDDING_DIM: &'static str = "CLAIMCHECK_EMBEDDING_DIM";
    const ENV_IVF_PARTITIONS: &'static str = "CLAIMCHECK_IVF_PARTITIONS";
    const ENV_IVF_PROBES: &'static str = "CLAIMCHECK_IVF_PROBES";
    const ENV_IVF_AUTO_TUNE: &'static str = "CLAIMCHECK_IVF_AUTO_TUNE";
    const ENV_REBUILD_GROWTH_FRACTION: &'static str = "CLAIMCHECK_REBUILD_GROWTH_FRACTION";
    const ENV_RETRY_ATTEMPTS: &'static str = "CLAIMCHECK_RETRY_ATTEMPTS";
    const ENV_RETRY_BASE_DELAY_MS: &'static str = "CLAIMCHECK_RETRY_BASE_DELAY_MS";

    /// Loads configuration from environment variables on top of defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            database_url: parse_string(Self::ENV_DATABASE_URL, defaults.database_url),
            max_connections: parse_num(Self::ENV_MAX_CONNECTIONS, defaults.max_connections)?,
            embed_model_dir: PathBuf::from(parse_string(
                Self::ENV_EMBED_MODEL_DIR,
                defaults.embed_model_dir.to_string_lossy().into_owned(),
            )),
            nli_model_dir: PathBuf::from(parse_string(
                Self::ENV_NLI_MODEL_DIR,
                defaults.nli_model_dir.to_string_lossy().into_owned(),
            )),
            use_stub_models: parse_num(Self::ENV_USE_STUB_MODELS, defaults.use_stub_models)?,
            embed_batch_size: parse_num(Self::ENV_EMBED_BATCH_SIZE, defaults.embed_batch_size)?,
            nli_batch_size: parse_num(Self::ENV_NLI_BATCH_SIZE, defaults.nli_batch_size)?,
            accumulator_target: parse_num(
                Self::ENV_ACCUMULATOR_TARGET,
                defaults.accumulator_target,
            )?,
            accumulator_max_wait_ms: parse_num(
                Self::ENV_ACCUMULATOR_MAX_WAIT_MS,
                defaults.accumulator_max_wait_ms,
            )?,
            top_k: parse_num(Self::ENV_TOP_K, defaults.top_k)?,
            min_similarity: parse_num(Self::ENV_MIN_SIMILARITY, defaults.min_similarity)?,
            min_evidence_count: parse_num(
                Self::ENV_MIN_EVIDENCE_COUNT,
                defaults.min_evidence_count,
            )?,
            min_confidence: parse_num(Self::ENV_MIN_CONFIDENCE, defaults.min_confidence)?,
            tie_epsilon: parse_num(Self::ENV_TIE_EPSILON, defaults.tie_epsilon)?,
            max_workers: parse_num(Self::ENV_MAX_WORKERS, defaults.max_workers)?,
            memory_budget_bytes: parse_num(
                Self::ENV_MEMORY_BUDGET_BYTES,
                defaults.memory_budget_bytes,
            )?,
            max_text_chars: parse_num(Self::ENV_MAX_TEXT_CHARS, defaults.max_text_chars)?,
            embedding_dim: parse_num(Self::ENV_EMBEDDING_DIM, defaults.embedding_dim)?,
            ivf_partitions: parse_num(Self::ENV_IVF_PARTITIONS, defaults.ivf_partitions)?,
            ivf_probes: parse_num(Self::ENV_IVF_PROBES, defaults.ivf_probes)?,
            ivf_auto_tune: parse_num(Self::ENV_IVF_AUTO_TUNE, defaults.ivf_auto_tune)?,
            rebuild_growth_fraction: parse_num(
                Self::ENV_REBUILD_GROWTH_FRACTION,
                defaults.rebuild_growth_fraction,
            )?,
            retry_attempts: parse_num(Self::ENV_RETRY_ATTEMPTS, defaults.retry_attempts)?,
            retry_base_delay_ms: parse_num(
                Self::ENV_RETRY_BASE_DELAY_MS,
                defaults.retry_base_delay_ms,
            )?,
            pipeline_version: defaults.pipeline_version,
            retrieval_method: defaults.retrieval_method,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks every tunable against its valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embed_batch_size == 0 {
            return invalid(Self::ENV_EMBED_BATCH_SIZE, "must be at least 1");
        }
        if self.nli_batch_size == 0 {
            return invalid(Self::ENV_NLI_BATCH_SIZE, "must be at least 1");
        }
        if self.accumulator_target == 0 {
            return invalid(Self::ENV_ACCUMULATOR_TARGET, "must be at least 1");
        }
        if self.top_k == 0 {
            return invalid(Self::ENV_TOP_K, "must be at least 1");
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return invalid(Self::ENV_MIN_SIMILARITY, "must be within [-1.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return invalid(Self::ENV_MIN_CONFIDENCE, "must be within [0.0, 1.0]");
        }
        if !(0.0..1.0).contains(&self.tie_epsilon) {
            return invalid(Self::ENV_TIE_EPSILON, "must be within [0.0, 1.0)");
        }
        if self.max_workers == 0 {
            return invalid(Self::ENV_MAX_WORKERS, "must be at least 1");
        }
        if self.max_text_chars == 0 {
            return invalid(Self::ENV_MAX_TEXT_CHARS, "must be at least 1");
        }
        if self.embedding_dim == 0 {
            return invalid(Self::ENV_EMBEDDING_DIM, "must be at least 1");
        }
        if self.ivf_partitions == 0 {
            return invalid(Self::ENV_IVF_PARTITIONS, "must be at least 1");
        }
        if self.ivf_probes == 0 || self.ivf_probes > self.ivf_partitions {
            return invalid(
                Self::ENV_IVF_PROBES,
                "must be within [1, ivf_partitions]",
            );
        }
        if !(self.rebuild_growth_fraction > 0.0 && self.rebuild_growth_fraction <= 1.0) {
            return invalid(
                Self::ENV_REBUILD_GROWTH_FRACTION,
                "must be within (0.0, 1.0]",
            );
        }
        if self.retry_attempts == 0 {
            return invalid(Self::ENV_RETRY_ATTEMPTS, "must be at least 1");
        }
        Ok(())
    }

    /// Embedder settings derived from the pipeline tunables.
    pub fn embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            model_dir: self.embed_model_dir.clone(),
            max_text_chars: self.max_text_chars,
            embedding_dim: self.embedding_dim,
            batch_size: self.embed_batch_size,
            testing_stub: self.use_stub_models,
            ..EmbedderConfig::default()
        }
    }

    /// NLI scorer settings derived from the pipeline tunables.
    pub fn nli_config(&self) -> NliConfig {
        NliConfig {
            model_dir: self.nli_model_dir.clone(),
            max_text_chars: self.max_text_chars,
            batch_size: self.nli_batch_size,
            testing_stub: self.use_stub_models,
            ..NliConfig::default()
        }
    }

    /// Index tuning as configured (the seed values when auto-tune is on).
    pub fn index_params(&self) -> IndexParams {
        IndexParams {
            partitions: self.ivf_partitions,
            probes: self.ivf_probes,
        }
    }
}

fn invalid(name: &'static str, reason: &str) -> Result<(), ConfigError> {
    Err(ConfigError::InvalidValue {
        name,
        reason: reason.to_string(),
    })
}

fn parse_string(var_name: &str, default: String) -> String {
    env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_num<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::ParseError { name, value }),
        Err(_) => Ok(default),
    }
}
