use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use once_cell::sync::OnceCell;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use super::config::EmbedderConfig;
use super::device::select_device;
use super::error::EmbeddingError;
use super::truncate::truncate_at_boundary;

enum EmbedderBackend {
    Model {
        model: BertModel,
        tokenizer: Arc<Tokenizer>,
        device: Device,
    },
    Stub,
}

/// Sentence embedder over evidence and claim text (supports stub mode).
///
/// Inference is synchronous and CPU-bound; async callers should wrap calls in
/// `tokio::task::spawn_blocking`. The loaded model is read-only, so one
/// instance is safely shared across workers without locking.
pub struct ClaimEmbedder {
    backend: EmbedderBackend,
    config: EmbedderConfig,
}

impl std::fmt::Debug for ClaimEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimEmbedder")
            .field(
                "backend",
                &match &self.backend {
                    EmbedderBackend::Model { device, .. } => format!("Model({:?})", device),
                    EmbedderBackend::Stub => "Stub".to_string(),
                },
            )
            .field("embedding_dim", &self.config.embedding_dim)
            .field("batch_size", &self.config.batch_size)
            .finish()
    }
}

impl ClaimEmbedder {
    /// Loads the embedder from a config (stub mode is supported).
    pub fn load(config: EmbedderConfig) -> Result<Self, EmbeddingError> {
        config.validate()?;

        if config.testing_stub {
            warn!("Embedder running in STUB mode (testing only)");
            return Ok(Self {
                backend: EmbedderBackend::Stub,
                config,
            });
        }

        if !config.model_available() || !config.tokenizer_available() {
            return Err(EmbeddingError::ModelNotFound {
                path: config.model_dir.clone(),
            });
        }

        let device = select_device()?;
        debug!(?device, "Selected compute device for embedder");

        let (model, tokenizer) = Self::load_model(&config, &device)?;

        info!(
            model_dir = %config.model_dir.display(),
            embedding_dim = config.embedding_dim,
            max_seq_len = config.max_seq_len,
            "Embedding model loaded"
        );

        Ok(Self {
            backend: EmbedderBackend::Model {
                model,
                tokenizer: Arc::new(tokenizer),
                device,
            },
            config,
        })
    }

    fn load_model(
        config: &EmbedderConfig,
        device: &Device,
    ) -> Result<(BertModel, Tokenizer), EmbeddingError> {
        let bert_config: BertConfig = serde_json::from_str(&std::fs::read_to_string(
            config.model_dir.join("config.json"),
        )?)
        .map_err(|e| EmbeddingError::ModelLoadFailed {
            reason: format!("failed to parse config.json: {}", e),
        })?;

        if config.embedding_dim > bert_config.hidden_size {
            return Err(EmbeddingError::InvalidConfig {
                reason: format!(
                    "embedding_dim ({}) exceeds model hidden_size ({})",
                    config.embedding_dim, bert_config.hidden_size
                ),
            });
        }

        let weights_path = config.model_dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)?
        };
        let model = BertModel::load(vb, &bert_config)?;

        let mut tokenizer = Tokenizer::from_file(config.model_dir.join("tokenizer.json"))
            .map_err(|e| EmbeddingError::TokenizationFailed {
                reason: format!("failed to load tokenizer: {}", e),
            })?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: config.max_seq_len,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::TokenizationFailed {
                reason: format!("failed to configure truncation: {}", e),
            })?;

        Ok((model, tokenizer))
    }

    /// Generates an embedding for a single string.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text])?;
        // embed_batch is order-preserving and 1:1, so exactly one vector.
        Ok(vectors.remove(0))
    }

    /// Generates embeddings for a batch of strings, order-preserving, using
    /// the configured batch size.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_batch_with(texts, self.config.batch_size)
    }

    /// Generates embeddings with an explicit batch size (the memory-budget
    /// policy shrinks it under pressure). All-or-nothing: the first failure
    /// aborts the call and no partial output is returned.
    pub fn embed_batch_with(
        &self,
        texts: &[&str],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(EmbeddingError::InvalidInput {
                    reason: format!("text at index {} is empty", i),
                });
            }
        }

        let batch_size = batch_size.max(1);
        let truncated: Vec<&str> = texts
            .iter()
            .map(|t| truncate_at_boundary(t, self.config.max_text_chars))
            .collect();

        debug!(
            texts = texts.len(),
            batch_size,
            "Generating embeddings"
        );

        let mut out = Vec::with_capacity(texts.len());
        for chunk in truncated.chunks(batch_size) {
            match &self.backend {
                EmbedderBackend::Model {
                    model,
                    tokenizer,
                    device,
                } => out.extend(self.embed_chunk(chunk, model, tokenizer, device)?),
                EmbedderBackend::Stub => {
                    out.extend(chunk.iter().map(|t| self.embed_stub(t)));
                }
            }
        }

        Ok(out)
    }

    fn embed_chunk(
        &self,
        texts: &[&str],
        model: &BertModel,
        tokenizer: &Tokenizer,
        device: &Device,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let encodings = tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::TokenizationFailed {
                reason: e.to_string(),
            })?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);
        if max_len == 0 {
            return Err(EmbeddingError::InvalidInput {
                reason: "tokenizer produced no tokens".to_string(),
            });
        }

        let batch = encodings.len();
        let mut ids = Vec::with_capacity(batch * max_len);
        let mut mask = Vec::with_capacity(batch * max_len);
        for encoding in &encodings {
            let token_ids = encoding.get_ids();
            ids.extend_from_slice(token_ids);
            ids.extend(std::iter::repeat_n(0u32, max_len - token_ids.len()));
            mask.extend(std::iter::repeat_n(1f32, token_ids.len()));
            mask.extend(std::iter::repeat_n(0f32, max_len - token_ids.len()));
        }

        let input_ids = Tensor::from_vec(ids, (batch, max_len), device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let mask_f32 = Tensor::from_vec(mask, (batch, max_len), device)?;
        let attention_mask = mask_f32.to_dtype(DType::U32)?;

        // [batch, seq, hidden]
        let hidden = model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mask-aware mean pooling over the sequence dimension.
        let mask_expanded = mask_f32.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask_expanded)?.sum(1)?;
        let counts = mask_expanded.sum(1)?.clamp(1e-9, f64::INFINITY)?;
        let pooled = summed.broadcast_div(&counts)?;

        let rows = pooled
            .narrow(1, 0, self.config.embedding_dim)?
            .to_vec2::<f32>()?;

        Ok(rows.into_iter().map(normalize).collect())
    }

    fn embed_stub(&self, text: &str) -> Vec<f32> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut embedding = Vec::with_capacity(self.config.embedding_dim);
        let mut state = seed;
        for _ in 0..self.config.embedding_dim {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let value = ((state >> 32) as f32 / u32::MAX as f32) * 2.0 - 1.0;
            embedding.push(value);
        }

        normalize(embedding)
    }

    /// Returns the configured output embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        self.config.embedding_dim
    }

    /// Returns `true` if running in stub mode.
    pub fn is_stub(&self) -> bool {
        matches!(self.backend, EmbedderBackend::Stub)
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }
}

fn normalize(mut embedding: Vec<f32>) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut embedding {
            *x /= norm;
        }
    }
    embedding
}

/// Injected, long-lived embedder handle with lazy once-init.
///
/// Model load dominates latency, so the underlying model is constructed at
/// most once per process on first use; concurrent first callers block on the
/// same initialization.
pub struct LazyEmbedder {
    cell: OnceCell<ClaimEmbedder>,
    config: EmbedderConfig,
}

impl LazyEmbedder {
    pub fn new(config: EmbedderConfig) -> Self {
        Self {
            cell: OnceCell::new(),
            config,
        }
    }

    /// Returns the embedder, loading it on first use.
    pub fn get(&self) -> Result<&ClaimEmbedder, EmbeddingError> {
        self.cell
            .get_or_try_init(|| ClaimEmbedder::load(self.config.clone()))
    }

    /// Returns `true` once the model has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }
}

impl std::fmt::Debug for LazyEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEmbedder")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
