use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::{Evidence, NliLabel, NliRecord, Verdict};
use crate::embedding::{EmbedderConfig, LazyEmbedder};
use crate::index::{IndexParams, VectorIndexHandle};
use crate::nli::{NliConfig, NliScorer};
use crate::store::BatchStore;

use super::*;

fn nli_row(claim_id: Uuid, label: NliLabel, confidence: f32) -> NliRecord {
    let (e, c, n) = match label {
        NliLabel::Entailment => (confidence, (1.0 - confidence) / 2.0, (1.0 - confidence) / 2.0),
        NliLabel::Contradiction => ((1.0 - confidence) / 2.0, confidence, (1.0 - confidence) / 2.0),
        NliLabel::Neutral => ((1.0 - confidence) / 2.0, (1.0 - confidence) / 2.0, confidence),
    };
    NliRecord {
        id: Uuid::new_v4(),
        claim_id,
        evidence_id: Uuid::new_v4(),
        label,
        confidence,
        entailment_score: e,
        contradiction_score: c,
        neutral_score: n,
        model_name: "stub".to_string(),
        premise_text: "premise".to_string(),
        hypothesis_text: "hypothesis".to_string(),
        created_at: Utc::now(),
    }
}

fn params() -> AggregationParams {
    AggregationParams {
        min_evidence_count: 1,
        min_confidence: 0.5,
        tie_epsilon: 0.05,
    }
}

fn ctx<'a>(params: &'a AggregationParams, strategy: &'a dyn WeightStrategy) -> AggregationContext<'a> {
    AggregationContext {
        params,
        strategy,
        pipeline_version: "test",
        retrieval_method: "ivf_cosine",
    }
}

#[test]
fn zero_evidence_aggregates_to_insufficient() {
    let p = params();
    let record = aggregate::aggregate(Uuid::new_v4(), &[], &HashMap::new(), &ctx(&p, &UniformWeight));
    assert_eq!(record.verdict, Verdict::Insufficient);
    assert_eq!(record.evidence_count, 0);
    assert_eq!(record.confidence, 0.0);
    assert!(record.nli_result_ids.is_empty());
    assert!(record.counts_consistent());
}

#[test]
fn dominant_entailment_is_supported() {
    let claim_id = Uuid::new_v4();
    let rows = vec![
        nli_row(claim_id, NliLabel::Entailment, 0.9),
        nli_row(claim_id, NliLabel::Entailment, 0.8),
        nli_row(claim_id, NliLabel::Neutral, 0.6),
    ];
    let p = params();
    let record = aggregate::aggregate(claim_id, &rows, &HashMap::new(), &ctx(&p, &UniformWeight));
    assert_eq!(record.verdict, Verdict::Supported);
    assert_eq!(record.evidence_count, 3);
    assert_eq!(record.supporting_evidence_count, 2);
    assert_eq!(record.neutral_evidence_count, 1);
    assert_eq!(record.nli_result_ids.len(), 3);
    assert!(record.counts_consistent());
    assert!((record.support_score - 0.85).abs() < 1e-5);
    assert!(record.reasoning.contains("uniform"));
}

#[test]
fn dominant_contradiction_is_refuted() {
    let claim_id = Uuid::new_v4();
    let rows = vec![
        nli_row(claim_id, NliLabel::Contradiction, 0.9),
        nli_row(claim_id, NliLabel::Contradiction, 0.85),
    ];
    let p = params();
    let record = aggregate::aggregate(claim_id, &rows, &HashMap::new(), &ctx(&p, &UniformWeight));
    assert_eq!(record.verdict, Verdict::Refuted);
    assert_eq!(record.refuting_evidence_count, 2);
}

#[test]
fn near_tie_forces_insufficient() {
    let claim_id = Uuid::new_v4();
    let rows = vec![
        nli_row(claim_id, NliLabel::Entailment, 0.82),
        nli_row(claim_id, NliLabel::Contradiction, 0.80),
    ];
    let p = params();
    let record = aggregate::aggregate(claim_id, &rows, &HashMap::new(), &ctx(&p, &UniformWeight));
    assert_eq!(record.verdict, Verdict::Insufficient);
    assert!(record.reasoning.contains("balanced"));
}

#[test]
fn low_confidence_forces_insufficient() {
    let claim_id = Uuid::new_v4();
    let rows = vec![nli_row(claim_id, NliLabel::Entailment, 0.4)];
    let p = params();
    let record = aggregate::aggregate(claim_id, &rows, &HashMap::new(), &ctx(&p, &UniformWeight));
    assert_eq!(record.verdict, Verdict::Insufficient);
}

#[test]
fn below_min_evidence_count_forces_insufficient() {
    let claim_id = Uuid::new_v4();
    let rows = vec![nli_row(claim_id, NliLabel::Entailment, 0.95)];
    let p = AggregationParams {
        min_evidence_count: 3,
        ..params()
    };
    let record = aggregate::aggregate(claim_id, &rows, &HashMap::new(), &ctx(&p, &UniformWeight));
    assert_eq!(record.verdict, Verdict::Insufficient);
}

#[test]
fn credibility_weighting_discounts_weak_sources() {
    let claim_id = Uuid::new_v4();
    let strong = nli_row(claim_id, NliLabel::Entailment, 0.95);
    let weak = nli_row(claim_id, NliLabel::Entailment, 0.55);

    let mut evidence = HashMap::new();
    let now = Utc::now();
    evidence.insert(
        strong.evidence_id,
        Evidence {
            id: strong.evidence_id,
            content: "strong".to_string(),
            source_url: None,
            source_type: None,
            credibility_score: Some(1.0),
            created_at: now,
        },
    );
    evidence.insert(
        weak.evidence_id,
        Evidence {
            id: weak.evidence_id,
            content: "weak".to_string(),
            source_url: None,
            source_type: None,
            credibility_score: Some(0.05),
            created_at: now,
        },
    );

    let rows = vec![strong, weak];
    let p = params();
    let weighted = aggregate::aggregate(claim_id, &rows, &evidence, &ctx(&p, &CredibilityWeight));
    let uniform = aggregate::aggregate(claim_id, &rows, &evidence, &ctx(&p, &UniformWeight));

    // Discounting the weak source pulls the support score toward the strong row.
    assert!(weighted.support_score > uniform.support_score);
    assert_eq!(weighted.verdict, Verdict::Supported);
}

#[tokio::test]
async fn retry_succeeds_after_transient_failures() {
    let policy = RetryPolicy::new(3, Duration::from_millis(1));
    let attempts = AtomicU32::new(0);
    let result: Result<u32, String> = with_retry(&policy, "test op", || {
        let n = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err("transient".to_string())
            } else {
                Ok(7)
            }
        }
    })
    .await;
    assert_eq!(result, Ok(7));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_surfaces_last_error_when_exhausted() {
    let policy = RetryPolicy::new(2, Duration::from_millis(1));
    let attempts = AtomicU32::new(0);
    let result: Result<u32, String> = with_retry(&policy, "test op", || {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err("still down".to_string()) }
    })
    .await;
    assert_eq!(result, Err("still down".to_string()));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn memory_clamp_never_returns_zero() {
    let tight = MemoryBudget::new(1);
    assert!(tight.clamp_batch(32) >= 1);
    assert_eq!(tight.clamp_batch(0), 1);
}

#[test]
fn memory_clamp_passes_through_with_headroom() {
    let generous = MemoryBudget::new(u64::MAX);
    assert_eq!(generous.clamp_batch(32), 32);
}

#[test]
fn stage_order_is_strict() {
    let mut tracker = StageTracker::new();
    assert_eq!(tracker.stage(), ClaimStage::Submitted);
    for next in [
        ClaimStage::Embedded,
        ClaimStage::EvidenceRetrieved,
        ClaimStage::NliScored,
        ClaimStage::Aggregated,
        ClaimStage::Persisted,
    ] {
        tracker.advance(next);
        assert_eq!(tracker.stage(), next);
    }
    assert_eq!(ClaimStage::Persisted.successor(), None);
}

async fn stub_pipeline() -> VerificationPipeline {
    let config = PipelineConfig {
        embedding_dim: 16,
        retry_attempts: 2,
        retry_base_delay_ms: 1,
        ..PipelineConfig::default()
    };
    let embedder = Arc::new(LazyEmbedder::new(EmbedderConfig::stub_with_dim(16)));
    let scorer = Arc::new(NliScorer::load(NliConfig::stub()).unwrap());
    let index = Arc::new(VectorIndexHandle::new(
        16,
        IndexParams::default(),
        config.rebuild_growth_fraction,
    ));
    let store = BatchStore::in_memory().await.unwrap();
    VerificationPipeline::new(config, embedder, scorer, index, store).unwrap()
}

#[tokio::test]
async fn empty_claim_text_is_a_validation_error() {
    let pipeline = stub_pipeline().await;
    let err = pipeline
        .verify_claim(Uuid::new_v4(), "   ")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn cancelled_token_stops_before_embedding() {
    let pipeline = stub_pipeline().await;
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pipeline
        .verify_claim_cancellable(Uuid::new_v4(), "the sky is blue", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "cancelled");
    assert!(matches!(
        err,
        PipelineError::Cancelled {
            stage: ClaimStage::Submitted
        }
    ));
}

#[tokio::test]
async fn empty_corpus_yields_insufficient_with_zero_evidence() {
    let pipeline = stub_pipeline().await;
    let record = pipeline
        .verify_claim(Uuid::new_v4(), "water boils at 100 degrees")
        .await
        .unwrap();
    assert_eq!(record.verdict, Verdict::Insufficient);
    assert_eq!(record.evidence_count, 0);
    assert!(record.nli_result_ids.is_empty());
    assert!(record.counts_consistent());
}

#[tokio::test]
async fn mismatched_index_dimension_is_rejected_at_construction() {
    let config = PipelineConfig {
        embedding_dim: 16,
        ..PipelineConfig::default()
    };
    let embedder = Arc::new(LazyEmbedder::new(EmbedderConfig::stub_with_dim(16)));
    let scorer = Arc::new(NliScorer::load(NliConfig::stub()).unwrap());
    let index = Arc::new(VectorIndexHandle::new(8, IndexParams::default(), 0.3));
    let store = BatchStore::in_memory().await.unwrap();

    let err = VerificationPipeline::new(config, embedder, scorer, index, store).unwrap_err();
    assert_eq!(err.kind(), "validation");
}
