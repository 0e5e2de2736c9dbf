//! Claim verification orchestration.
//!
//! One claim flows embed -> search -> NLI -> aggregate -> persist through a
//! strict per-claim state machine; `verify_batch` overlaps many claims over a
//! bounded worker pool. Model handles are injected, long-lived, and read-only
//! after load, so workers share them without locking.

pub mod aggregate;
pub mod error;
pub mod memory;
pub mod retry;

#[cfg(test)]
mod tests;

pub use aggregate::{
    AggregationContext, AggregationParams, CredibilityWeight, UniformWeight, WeightStrategy,
};
pub use error::PipelineError;
pub use memory::MemoryBudget;
pub use retry::{RetryPolicy, with_retry};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::{Claim, EntityType, Evidence, NliRecord, VerificationRecord};
use crate::embedding::{EmbeddingError, LazyEmbedder};
use crate::index::{IndexEntry, IndexParams, VectorIndexHandle};
use crate::nli::{BatcherConfig, NliBatcher, NliScorer, ScoredPair};
use crate::store::BatchStore;

/// Per-claim pipeline stage. Stages advance strictly in order; zero
/// retrieved evidence still passes through aggregation (INSUFFICIENT) rather
/// than short-circuiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimStage {
    Submitted,
    Embedded,
    EvidenceRetrieved,
    NliScored,
    Aggregated,
    Persisted,
    Failed,
}

impl ClaimStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStage::Submitted => "SUBMITTED",
            ClaimStage::Embedded => "EMBEDDED",
            ClaimStage::EvidenceRetrieved => "EVIDENCE_RETRIEVED",
            ClaimStage::NliScored => "NLI_SCORED",
            ClaimStage::Aggregated => "AGGREGATED",
            ClaimStage::Persisted => "PERSISTED",
            ClaimStage::Failed => "FAILED",
        }
    }

    fn successor(self) -> Option<ClaimStage> {
        match self {
            ClaimStage::Submitted => Some(ClaimStage::Embedded),
            ClaimStage::Embedded => Some(ClaimStage::EvidenceRetrieved),
            ClaimStage::EvidenceRetrieved => Some(ClaimStage::NliScored),
            ClaimStage::NliScored => Some(ClaimStage::Aggregated),
            ClaimStage::Aggregated => Some(ClaimStage::Persisted),
            ClaimStage::Persisted | ClaimStage::Failed => None,
        }
    }
}

impl std::fmt::Display for ClaimStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one claim's progress and enforces in-order transitions.
struct StageTracker {
    stage: ClaimStage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            stage: ClaimStage::Submitted,
        }
    }

    fn advance(&mut self, next: ClaimStage) {
        debug_assert_eq!(self.stage.successor(), Some(next), "stage skipped");
        self.stage = next;
    }

    fn fail(&mut self) {
        self.stage = ClaimStage::Failed;
    }

    fn stage(&self) -> ClaimStage {
        self.stage
    }
}

/// Cooperative cancellation flag, checked at every stage transition.
///
/// Cancellation after the persistence commit is a no-op: the write stands.
/// A single model inference call is never interrupted mid-batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Orchestrates claims through the verification stages.
///
/// Cheap to clone; clones share the model handles, index, store pool, and
/// the NLI accumulator.
#[derive(Clone)]
pub struct VerificationPipeline {
    embedder: Arc<LazyEmbedder>,
    scorer: Arc<NliScorer>,
    batcher: NliBatcher,
    index: Arc<VectorIndexHandle>,
    store: BatchStore,
    config: PipelineConfig,
    memory: MemoryBudget,
    retry: RetryPolicy,
    strategy: Arc<dyn WeightStrategy>,
    tenant_id: i64,
}

impl std::fmt::Debug for VerificationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationPipeline")
            .field("tenant_id", &self.tenant_id)
            .field("max_workers", &self.config.max_workers)
            .field("indexed_len", &self.index.indexed_len())
            .finish()
    }
}

impl VerificationPipeline {
    /// Builds a pipeline over injected long-lived collaborators. Spawns the
    /// NLI accumulator task on the current runtime.
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<LazyEmbedder>,
        scorer: Arc<NliScorer>,
        index: Arc<VectorIndexHandle>,
        store: BatchStore,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(|e| PipelineError::Validation {
            reason: e.to_string(),
        })?;

        if index.dim() != config.embedding_dim {
            return Err(PipelineError::Validation {
                reason: format!(
                    "index dimension {} does not match configured embedding dimension {}",
                    index.dim(),
                    config.embedding_dim
                ),
            });
        }

        let batcher = NliBatcher::spawn(
            Arc::clone(&scorer),
            BatcherConfig {
                target_batch: config.accumulator_target,
                max_wait: Duration::from_millis(config.accumulator_max_wait_ms),
                ..Default::default()
            },
        );

        let memory = MemoryBudget::new(config.memory_budget_bytes);
        let retry = RetryPolicy::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        );

        Ok(Self {
            embedder,
            scorer,
            batcher,
            index,
            store,
            config,
            memory,
            retry,
            strategy: Arc::new(CredibilityWeight),
            tenant_id: 0,
        })
    }

    /// Builds every collaborator from the config alone: store connection from
    /// `database_url`/`max_connections`, lazily loaded models from the derived
    /// embedder/NLI settings, and an index seeded with the configured IVF
    /// parameters. The NLI model loads eagerly here; the embedder loads on
    /// first use.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(|e| PipelineError::Validation {
            reason: e.to_string(),
        })?;

        let store = BatchStore::connect(&config.database_url, config.max_connections).await?;
        let embedder = Arc::new(LazyEmbedder::new(config.embedder_config()));
        let scorer = Arc::new(NliScorer::load(config.nli_config()).map_err(|e| {
            PipelineError::ModelInference {
                reason: e.to_string(),
            }
        })?);
        let index = Arc::new(VectorIndexHandle::new(
            config.embedding_dim,
            config.index_params(),
            config.rebuild_growth_fraction,
        ));

        Self::new(config, embedder, scorer, index, store)
    }

    /// Replaces the default credibility weighting.
    pub fn with_weight_strategy(mut self, strategy: Arc<dyn WeightStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_tenant(mut self, tenant_id: i64) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndexHandle {
        &self.index
    }

    /// The shared single-pair accumulator (see [`NliBatcher`]).
    pub fn batcher(&self) -> &NliBatcher {
        &self.batcher
    }

    /// Scores one (premise, hypothesis) pair through the accumulator.
    pub async fn score_pair(
        &self,
        premise: impl Into<String>,
        hypothesis: impl Into<String>,
    ) -> Result<ScoredPair, PipelineError> {
        self.batcher
            .score(premise, hypothesis)
            .await
            .map_err(|e| PipelineError::ModelInference {
                reason: e.to_string(),
            })
    }

    /// Verifies one claim to its terminal state. Returns the persisted
    /// verification record or the originating error kind; never a silently
    /// incomplete result.
    pub async fn verify_claim(
        &self,
        claim_id: Uuid,
        text: &str,
    ) -> Result<VerificationRecord, PipelineError> {
        self.verify_claim_cancellable(claim_id, text, &CancelToken::default())
            .await
    }

    #[instrument(skip(self, text, cancel), fields(claim_id = %claim_id))]
    pub async fn verify_claim_cancellable(
        &self,
        claim_id: Uuid,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<VerificationRecord, PipelineError> {
        let mut tracker = StageTracker::new();
        match self.run_stages(claim_id, text, cancel, &mut tracker).await {
            Ok(record) => {
                info!(
                    verdict = %record.verdict,
                    evidence_count = record.evidence_count,
                    confidence = record.confidence,
                    "Claim verified"
                );
                Ok(record)
            }
            Err(err) => {
                tracker.fail();
                warn!(kind = err.kind(), error = %err, "Claim verification failed");
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        claim_id: Uuid,
        text: &str,
        cancel: &CancelToken,
        tracker: &mut StageTracker,
    ) -> Result<VerificationRecord, PipelineError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Validation {
                reason: "claim text is empty".to_string(),
            });
        }

        let claim = Claim::new(claim_id, trimmed);
        with_retry(&self.retry, "insert claim", || {
            self.store.insert_claim(&claim)
        })
        .await?;

        // SUBMITTED -> EMBEDDED
        checkpoint(cancel, tracker)?;
        let embedder = Arc::clone(&self.embedder);
        let claim_text = trimmed.to_string();
        let query = task::spawn_blocking(move || {
            embedder.get().and_then(|e| e.embed(&claim_text))
        })
        .await
        .map_err(|e| PipelineError::Internal {
            reason: format!("embedding task panicked: {}", e),
        })?
        .map_err(map_embedding_error)?;
        tracker.advance(ClaimStage::Embedded);

        // EMBEDDED -> EVIDENCE_RETRIEVED. Retrieval failures degrade to zero
        // evidence after retries: partial service beats total failure.
        checkpoint(cancel, tracker)?;
        let top_k = self.config.top_k;
        let min_similarity = self.config.min_similarity;
        let tenant_id = self.tenant_id;
        let hits = match with_retry(&self.retry, "vector search", || {
            let index = Arc::clone(&self.index);
            let query = query.clone();
            async move { index.search(&query, top_k, tenant_id, min_similarity) }
        })
        .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "Vector search exhausted retries, degrading to zero evidence");
                vec![]
            }
        };

        let hit_ids: Vec<Uuid> = hits.iter().map(|h| h.entity_id).collect();
        let evidence_rows = match with_retry(&self.retry, "fetch evidence", || {
            self.store.fetch_evidence(&hit_ids)
        })
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "Evidence fetch exhausted retries, degrading to zero evidence");
                vec![]
            }
        };

        let evidence_by_id: HashMap<Uuid, Evidence> =
            evidence_rows.into_iter().map(|e| (e.id, e)).collect();
        // Similarity order from the hits, dropping ids the store no longer has.
        let ordered: Vec<&Evidence> = hits
            .iter()
            .filter_map(|h| evidence_by_id.get(&h.entity_id))
            .collect();
        tracker.advance(ClaimStage::EvidenceRetrieved);

        // EVIDENCE_RETRIEVED -> NLI_SCORED. Inference errors are fatal for
        // this claim only.
        checkpoint(cancel, tracker)?;
        let nli_rows = if ordered.is_empty() {
            vec![]
        } else {
            let pairs: Vec<(String, String)> = ordered
                .iter()
                .map(|e| (e.content.clone(), trimmed.to_string()))
                .collect();
            let scorer = Arc::clone(&self.scorer);
            let batch_size = self.memory.clamp_batch(self.config.nli_batch_size);
            let scored = task::spawn_blocking(move || {
                let refs: Vec<(&str, &str)> = pairs
                    .iter()
                    .map(|(p, h)| (p.as_str(), h.as_str()))
                    .collect();
                scorer.verify_batch_with(&refs, batch_size)
            })
            .await
            .map_err(|e| PipelineError::Internal {
                reason: format!("NLI task panicked: {}", e),
            })?
            .map_err(|e| PipelineError::ModelInference {
                reason: e.to_string(),
            })?;

            let now = Utc::now();
            ordered
                .iter()
                .zip(scored)
                .map(|(evidence, pair)| NliRecord {
                    id: Uuid::new_v4(),
                    claim_id,
                    evidence_id: evidence.id,
                    label: pair.label,
                    confidence: pair.confidence,
                    entailment_score: pair.entailment_score,
                    contradiction_score: pair.contradiction_score,
                    neutral_score: pair.neutral_score,
                    model_name: self.scorer.model_name().to_string(),
                    premise_text: evidence.content.clone(),
                    hypothesis_text: trimmed.to_string(),
                    created_at: now,
                })
                .collect()
        };
        tracker.advance(ClaimStage::NliScored);

        // NLI_SCORED -> AGGREGATED (pure; zero rows yields INSUFFICIENT).
        checkpoint(cancel, tracker)?;
        let params = AggregationParams {
            min_evidence_count: self.config.min_evidence_count,
            min_confidence: self.config.min_confidence,
            tie_epsilon: self.config.tie_epsilon,
        };
        let record = aggregate::aggregate(
            claim_id,
            &nli_rows,
            &evidence_by_id,
            &AggregationContext {
                params: &params,
                strategy: self.strategy.as_ref(),
                pipeline_version: &self.config.pipeline_version,
                retrieval_method: &self.config.retrieval_method,
            },
        );
        tracker.advance(ClaimStage::Aggregated);

        // AGGREGATED -> PERSISTED. One transaction after bounded retries.
        checkpoint(cancel, tracker)?;
        with_retry(&self.retry, "persist verification", || {
            self.store.persist_verification(&nli_rows, &record)
        })
        .await?;
        tracker.advance(ClaimStage::Persisted);

        Ok(record)
    }

    /// Verifies many claims, preserving input order in the result vector.
    /// One claim's failure never aborts its siblings.
    pub async fn verify_batch(
        &self,
        claims: Vec<(Uuid, String)>,
    ) -> Vec<Result<VerificationRecord, PipelineError>> {
        self.verify_batch_cancellable(claims, &CancelToken::default())
            .await
    }

    #[instrument(skip_all, fields(claims = claims.len(), max_workers = self.config.max_workers))]
    pub async fn verify_batch_cancellable(
        &self,
        claims: Vec<(Uuid, String)>,
        cancel: &CancelToken,
    ) -> Vec<Result<VerificationRecord, PipelineError>> {
        if self.config.max_workers <= 1 {
            let mut results = Vec::with_capacity(claims.len());
            for (claim_id, text) in claims {
                results.push(self.verify_claim_cancellable(claim_id, &text, cancel).await);
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let total = claims.len();
        let mut set = JoinSet::new();

        for (slot, (claim_id, text)) in claims.into_iter().enumerate() {
            let pipeline = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        pipeline
                            .verify_claim_cancellable(claim_id, &text, &cancel)
                            .await
                    }
                    Err(_) => Err(PipelineError::Internal {
                        reason: "worker pool shut down".to_string(),
                    }),
                };
                (slot, result)
            });
        }

        let mut results: Vec<Option<Result<VerificationRecord, PipelineError>>> =
            (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(err) => warn!(error = %err, "Verification worker panicked"),
            }
        }

        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(PipelineError::Internal {
                        reason: "verification worker panicked".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Loads the evidence corpus from the store and rebuilds the index
    /// (atomic swap; readers never block). With `ivf_auto_tune` on,
    /// partitions/probes are retuned to the corpus size first; otherwise the
    /// configured values stay pinned. Returns the corpus size.
    #[instrument(skip(self))]
    pub async fn rebuild_index(&self) -> Result<usize, PipelineError> {
        let embeddings = with_retry(&self.retry, "load corpus embeddings", || {
            self.store
                .fetch_embeddings(EntityType::Evidence, self.tenant_id)
        })
        .await?;

        let entries: Vec<IndexEntry> = embeddings
            .into_iter()
            .map(|e| IndexEntry {
                entity_id: e.entity_id,
                tenant_id: e.tenant_id,
                vector: e.vector,
            })
            .collect();
        let corpus_size = entries.len();

        if corpus_size > 0 && self.config.ivf_auto_tune {
            self.index.set_params(IndexParams::recommended(corpus_size));
        }

        let index = Arc::clone(&self.index);
        task::spawn_blocking(move || index.rebuild(entries))
            .await
            .map_err(|e| PipelineError::Internal {
                reason: format!("index build task panicked: {}", e),
            })?
            .map_err(|e| PipelineError::Retrieval {
                reason: e.to_string(),
            })?;

        Ok(corpus_size)
    }

    /// Rebuilds only when corpus growth since the last build crosses the
    /// configured fraction. Returns whether a rebuild ran.
    pub async fn rebuild_index_if_needed(&self) -> Result<bool, PipelineError> {
        if !self.index.needs_rebuild() {
            return Ok(false);
        }
        self.rebuild_index().await?;
        Ok(true)
    }
}

fn checkpoint(cancel: &CancelToken, tracker: &StageTracker) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled {
            stage: tracker.stage(),
        });
    }
    Ok(())
}

fn map_embedding_error(err: EmbeddingError) -> PipelineError {
    match err {
        EmbeddingError::InvalidInput { reason } => PipelineError::Validation { reason },
        other => PipelineError::ModelInference {
            reason: other.to_string(),
        },
    }
}
