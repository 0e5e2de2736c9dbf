use once_cell::sync::OnceCell;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use candle_core::{DType, Device, Tensor};

use crate::domain::NliLabel;
use crate::embedding::device::select_device;
use crate::embedding::truncate::truncate_at_boundary;

use super::config::NliConfig;
use super::error::NliError;
use super::model::BertNliClassifier;

/// Scores for one (premise, hypothesis) pair.
///
/// The three class scores are a softmax distribution (sum ~= 1.0) and `label`
/// is their argmax; `confidence` equals the winning score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair {
    pub label: NliLabel,
    pub confidence: f32,
    pub entailment_score: f32,
    pub contradiction_score: f32,
    pub neutral_score: f32,
}

impl ScoredPair {
    fn from_probs(entailment: f32, contradiction: f32, neutral: f32) -> Self {
        let label = NliLabel::from_scores(entailment, contradiction, neutral);
        let confidence = entailment.max(contradiction).max(neutral);
        Self {
            label,
            confidence,
            entailment_score: entailment,
            contradiction_score: contradiction,
            neutral_score: neutral,
        }
    }
}

enum ScorerBackend {
    Model {
        model: BertNliClassifier,
        tokenizer: Tokenizer,
        device: Device,
    },
    Stub,
}

/// Batched cross-encoder NLI scorer (supports stub mode).
///
/// Batching is purely a performance optimization: label/score output is
/// invariant to batch size. Inference is synchronous and CPU-bound; async
/// callers wrap calls in `spawn_blocking` or go through the
/// [`NliBatcher`](super::NliBatcher).
pub struct NliScorer {
    backend: ScorerBackend,
    config: NliConfig,
}

impl std::fmt::Debug for NliScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NliScorer")
            .field(
                "backend",
                &match &self.backend {
                    ScorerBackend::Model { device, .. } => format!("Model({:?})", device),
                    ScorerBackend::Stub => "Stub".to_string(),
                },
            )
            .field("batch_size", &self.config.batch_size)
            .finish()
    }
}

impl NliScorer {
    /// Loads the scorer from a config (stub mode is supported).
    pub fn load(config: NliConfig) -> Result<Self, NliError> {
        config.validate()?;

        if config.testing_stub {
            warn!("NLI scorer running in STUB mode (testing only)");
            return Ok(Self {
                backend: ScorerBackend::Stub,
                config,
            });
        }

        if !config.model_available() || !config.tokenizer_available() {
            return Err(NliError::ModelNotFound {
                path: config.model_dir.clone(),
            });
        }

        let device = select_device().map_err(|e| NliError::ModelLoadFailed {
            reason: e.to_string(),
        })?;
        debug!(?device, "Selected compute device for NLI scorer");

        let model = BertNliClassifier::load(&config.model_dir, &device).map_err(|e| {
            NliError::ModelLoadFailed {
                reason: format!("failed to load BERT NLI model: {}", e),
            }
        })?;

        let mut tokenizer = Tokenizer::from_file(config.model_dir.join("tokenizer.json"))
            .map_err(|e| NliError::TokenizationFailed {
                reason: format!("failed to load tokenizer: {}", e),
            })?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: config.max_seq_len,
                ..Default::default()
            }))
            .map_err(|e| NliError::TokenizationFailed {
                reason: format!("failed to configure truncation: {}", e),
            })?;

        info!(
            model_dir = %config.model_dir.display(),
            batch_size = config.batch_size,
            "NLI model loaded"
        );

        Ok(Self {
            backend: ScorerBackend::Model {
                model,
                tokenizer,
                device,
            },
            config,
        })
    }

    /// Scores a single pair. Prefer [`verify_batch`](Self::verify_batch) or
    /// the accumulator for anything beyond one-off calls.
    pub fn score_pair(&self, premise: &str, hypothesis: &str) -> Result<ScoredPair, NliError> {
        let mut scored = self.verify_batch(&[(premise, hypothesis)])?;
        Ok(scored.remove(0))
    }

    /// Scores pairs in order, chunked by the configured batch size.
    pub fn verify_batch(&self, pairs: &[(&str, &str)]) -> Result<Vec<ScoredPair>, NliError> {
        self.verify_batch_with(pairs, self.config.batch_size)
    }

    /// Scores pairs with an explicit batch size. All-or-nothing: any invalid
    /// pair or inference failure aborts the whole call.
    pub fn verify_batch_with(
        &self,
        pairs: &[(&str, &str)],
        batch_size: usize,
    ) -> Result<Vec<ScoredPair>, NliError> {
        if pairs.is_empty() {
            return Ok(vec![]);
        }

        for (i, (premise, hypothesis)) in pairs.iter().enumerate() {
            if premise.trim().is_empty() || hypothesis.trim().is_empty() {
                return Err(NliError::InvalidInput {
                    reason: format!("pair at index {} has empty premise or hypothesis", i),
                });
            }
        }

        let batch_size = batch_size.max(1);
        let truncated: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(p, h)| {
                (
                    truncate_at_boundary(p, self.config.max_text_chars),
                    truncate_at_boundary(h, self.config.max_text_chars),
                )
            })
            .collect();

        debug!(pairs = pairs.len(), batch_size, "Scoring NLI pairs");

        let mut out = Vec::with_capacity(pairs.len());
        for chunk in truncated.chunks(batch_size) {
            match &self.backend {
                ScorerBackend::Model {
                    model,
                    tokenizer,
                    device,
                } => out.extend(self.score_chunk(chunk, model, tokenizer, device)?),
                ScorerBackend::Stub => {
                    out.extend(chunk.iter().map(|(p, h)| stub_score(p, h)));
                }
            }
        }

        Ok(out)
    }

    fn score_chunk(
        &self,
        pairs: &[(&str, &str)],
        model: &BertNliClassifier,
        tokenizer: &Tokenizer,
        device: &Device,
    ) -> Result<Vec<ScoredPair>, NliError> {
        let encodings: Vec<_> = pairs
            .iter()
            .map(|(premise, hypothesis)| {
                tokenizer
                    .encode((*premise, *hypothesis), true)
                    .map_err(|e| NliError::TokenizationFailed {
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);
        if max_len == 0 {
            return Err(NliError::InvalidInput {
                reason: "tokenizer produced no tokens".to_string(),
            });
        }

        let batch = encodings.len();
        let mut ids = Vec::with_capacity(batch * max_len);
        let mut type_ids = Vec::with_capacity(batch * max_len);
        let mut mask = Vec::with_capacity(batch * max_len);
        for encoding in &encodings {
            let token_ids = encoding.get_ids();
            let pad = max_len - token_ids.len();
            ids.extend_from_slice(token_ids);
            ids.extend(std::iter::repeat_n(0u32, pad));
            type_ids.extend_from_slice(encoding.get_type_ids());
            type_ids.extend(std::iter::repeat_n(0u32, pad));
            mask.extend_from_slice(encoding.get_attention_mask());
            mask.extend(std::iter::repeat_n(0u32, pad));
        }

        let input_ids = Tensor::from_vec(ids, (batch, max_len), device)?;
        let token_type_ids = Tensor::from_vec(type_ids, (batch, max_len), device)?;
        let attention_mask = Tensor::from_vec(mask, (batch, max_len), device)?;

        let logits = model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| NliError::InferenceFailed {
                reason: e.to_string(),
            })?;

        let probs = candle_nn::ops::softmax(&logits.to_dtype(DType::F32)?, 1)?;
        let rows = probs.to_vec2::<f32>()?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredPair::from_probs(row[0], row[1], row[2]))
            .collect())
    }

    /// Model identity recorded on persisted NLI rows.
    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    /// Returns `true` if running in stub mode.
    pub fn is_stub(&self) -> bool {
        matches!(self.backend, ScorerBackend::Stub)
    }

    pub fn config(&self) -> &NliConfig {
        &self.config
    }
}

/// Injected, long-lived scorer handle with lazy once-init (same discipline as
/// [`LazyEmbedder`](crate::embedding::LazyEmbedder)).
pub struct LazyScorer {
    cell: OnceCell<NliScorer>,
    config: NliConfig,
}

impl LazyScorer {
    pub fn new(config: NliConfig) -> Self {
        Self {
            cell: OnceCell::new(),
            config,
        }
    }

    /// Returns the scorer, loading it on first use.
    pub fn get(&self) -> Result<&NliScorer, NliError> {
        self.cell
            .get_or_try_init(|| NliScorer::load(self.config.clone()))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl std::fmt::Debug for LazyScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyScorer")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

const NEGATION_MARKERS: &[&str] = &[
    "not", "no", "never", "cannot", "cant", "dont", "doesnt", "didnt", "isnt", "arent", "wasnt",
    "werent", "without", "false", "incorrect",
];

/// Deterministic lexical stand-in for the cross-encoder: token-overlap recall
/// drives entailment mass, a negation-polarity mismatch flips it toward
/// contradiction. Per-pair deterministic, so batch invariance holds by
/// construction.
fn stub_score(premise: &str, hypothesis: &str) -> ScoredPair {
    let premise_words = content_words(premise);
    let hypothesis_words = content_words(hypothesis);

    let overlap = hypothesis_words
        .iter()
        .filter(|w| premise_words.contains(*w))
        .count();
    let recall = if hypothesis_words.is_empty() {
        0.0
    } else {
        overlap as f32 / hypothesis_words.len() as f32
    };

    let negations = count_negations(premise) + count_negations(hypothesis);
    let polarity_flip = negations % 2 == 1;

    let (entail_logit, contra_logit) = if polarity_flip {
        (-1.0, 4.0 * recall - 1.5)
    } else {
        (4.0 * recall - 1.5, -1.5)
    };
    let neutral_logit = 0.0;

    let probs = softmax3([entail_logit, contra_logit, neutral_logit]);
    ScoredPair::from_probs(probs[0], probs[1], probs[2])
}

fn content_words(text: &str) -> std::collections::HashSet<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "of", "in", "for", "on",
        "with", "at", "by", "from", "as", "to", "and", "or", "it", "its", "this", "that",
    ];

    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn count_negations(text: &str) -> usize {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| NEGATION_MARKERS.contains(w))
        .count()
}

fn softmax3(logits: [f32; 3]) -> [f32; 3] {
    let max = logits[0].max(logits[1]).max(logits[2]);
    let exps = logits.map(|l| (l - max).exp());
    let sum: f32 = exps.iter().sum();
    exps.map(|e| e / sum)
}
