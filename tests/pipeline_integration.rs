//! End-to-end pipeline tests over stub models and in-memory SQLite.
//!
//! The stub embedder is deterministic per text, so identical texts embed to
//! identical vectors (similarity 1.0) and the corpus scenarios below control
//! retrieval purely through text equality.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use claimcheck::{
    BatchStore, ClaimEmbedder, EmbedderConfig, Embedding, EntityType, Evidence, IndexParams,
    LazyEmbedder, NliConfig, NliScorer, PipelineConfig, VectorIndexHandle, VerificationPipeline,
    Verdict,
};

const DIM: usize = 64;

fn test_config() -> PipelineConfig {
    PipelineConfig {
        embedding_dim: DIM,
        retry_base_delay_ms: 1,
        ..PipelineConfig::default()
    }
}

async fn build_pipeline(config: PipelineConfig) -> VerificationPipeline {
    let embedder = Arc::new(LazyEmbedder::new(EmbedderConfig::stub_with_dim(DIM)));
    let scorer = Arc::new(NliScorer::load(NliConfig::stub()).unwrap());
    let index = Arc::new(VectorIndexHandle::new(
        DIM,
        IndexParams::default(),
        config.rebuild_growth_fraction,
    ));
    let store = BatchStore::in_memory().await.unwrap();
    VerificationPipeline::new(config, embedder, scorer, index, store).unwrap()
}

fn evidence_row(content: &str) -> Evidence {
    Evidence {
        id: Uuid::new_v4(),
        content: content.to_string(),
        source_url: Some("https://example.org".to_string()),
        source_type: Some("encyclopedia".to_string()),
        credibility_score: Some(0.9),
        created_at: Utc::now(),
    }
}

/// Inserts evidence rows with their embeddings and rebuilds the index.
/// A second stub embedder produces the same vectors as the pipeline's.
async fn ingest(pipeline: &VerificationPipeline, contents: &[&str]) {
    let rows: Vec<Evidence> = contents.iter().map(|c| evidence_row(c)).collect();
    let store = pipeline.store();
    let ids = store.insert_evidence_batch(&rows).await.unwrap();

    let embedder = ClaimEmbedder::load(EmbedderConfig::stub_with_dim(DIM)).unwrap();
    let vectors = embedder.embed_batch(contents).unwrap();

    let now = Utc::now();
    let embeddings: Vec<Embedding> = ids
        .iter()
        .zip(vectors)
        .map(|(id, vector)| Embedding {
            id: Uuid::new_v4(),
            entity_type: EntityType::Evidence,
            entity_id: *id,
            vector,
            model_name: "stub".to_string(),
            model_version: "1".to_string(),
            tenant_id: 0,
            created_at: now,
            updated_at: now,
        })
        .collect();
    store.upsert_embeddings(&embeddings, DIM).await.unwrap();

    pipeline.index().record_appended(contents.len());
    pipeline.rebuild_index().await.unwrap();
}

#[tokio::test]
async fn supported_claim_against_matching_corpus() {
    let pipeline = build_pipeline(test_config()).await;
    ingest(
        &pipeline,
        &[
            "Water boils at 100°C at sea level",
            "The Eiffel Tower is in Paris",
            "Photosynthesis converts light into chemical energy",
            "Mount Everest is the tallest mountain above sea level",
            "Sound travels faster in water than in air",
        ],
    )
    .await;

    let claim_id = Uuid::new_v4();
    let record = pipeline
        .verify_claim(claim_id, "Water boils at 100°C at sea level")
        .await
        .unwrap();

    assert_eq!(record.verdict, Verdict::Supported);
    assert!(record.evidence_count > 0);
    assert!(!record.nli_result_ids.is_empty());
    assert!(record.counts_consistent());
    assert!(record.confidence >= 0.5);

    // The persisted record and its NLI rows come back in one joined fetch.
    let (stored, nli) = pipeline
        .store()
        .verification_with_nli(claim_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, record.id);
    assert_eq!(
        nli.iter().map(|r| r.id).collect::<Vec<_>>(),
        record.nli_result_ids
    );
    for row in &nli {
        assert!(row.scores_consistent());
    }
}

#[tokio::test]
async fn refuted_claim_against_contradicting_corpus() {
    // Retrieval filters are relaxed so the contradicting evidence is
    // retrieved despite differing wording.
    let config = PipelineConfig {
        min_similarity: -1.0,
        ..test_config()
    };
    let pipeline = build_pipeline(config).await;
    ingest(
        &pipeline,
        &["Water never boils at 50 degrees under normal pressure"],
    )
    .await;

    let record = pipeline
        .verify_claim(Uuid::new_v4(), "Water boils at 50 degrees under normal pressure")
        .await
        .unwrap();

    assert_eq!(record.verdict, Verdict::Refuted);
    assert_eq!(record.refuting_evidence_count, 1);
}

#[tokio::test]
async fn empty_corpus_claim_is_insufficient() {
    let pipeline = build_pipeline(test_config()).await;

    let claim_id = Uuid::new_v4();
    let record = pipeline
        .verify_claim(claim_id, "The moon is made of cheese")
        .await
        .unwrap();

    assert_eq!(record.verdict, Verdict::Insufficient);
    assert_eq!(record.evidence_count, 0);
    assert!(record.nli_result_ids.is_empty());

    let latest = pipeline
        .store()
        .latest_verification(claim_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, record.id);
}

#[tokio::test]
async fn thousand_item_corpus_recall_and_batched_writes() {
    let pipeline = build_pipeline(test_config()).await;

    let contents: Vec<String> = (0..1000)
        .map(|i| format!("Background fact number {} about the physical world", i))
        .collect();
    let refs: Vec<&str> = contents.iter().map(String::as_str).collect();

    let store = pipeline.store();
    store.reset_round_trips();
    ingest(&pipeline, &refs).await;
    // insert batch + upsert batch + corpus load for the rebuild.
    assert_eq!(store.round_trips(), 3);

    // Auto-tune (the default) retunes partitions/probes to the corpus size.
    let params = pipeline.index().params();
    assert_eq!((params.partitions, params.probes), (158, 31));

    // Query with the exact text of a known item: its vector is identical, so
    // it must come back as the top hit with similarity ~1.0.
    let embedder = ClaimEmbedder::load(EmbedderConfig::stub_with_dim(DIM)).unwrap();
    let query = embedder.embed(&contents[700]).unwrap();
    let hits = pipeline.index().search(&query, 1, 0, 0.9).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].similarity > 0.999);

    let target = store
        .fetch_evidence(&[hits[0].entity_id])
        .await
        .unwrap();
    assert_eq!(target[0].content, contents[700]);
}

#[tokio::test]
async fn pipeline_builds_entirely_from_config() {
    let config = PipelineConfig {
        max_connections: 1,
        use_stub_models: true,
        embedding_dim: DIM,
        embed_batch_size: 8,
        nli_batch_size: 4,
        ivf_auto_tune: false,
        ivf_partitions: 8,
        ivf_probes: 3,
        retry_base_delay_ms: 1,
        ..PipelineConfig::default()
    };
    let pipeline = VerificationPipeline::from_config(config).await.unwrap();
    ingest(&pipeline, &["The Nile flows north"]).await;

    // With auto-tune off the configured IVF parameters survive the rebuild.
    let params = pipeline.index().params();
    assert_eq!((params.partitions, params.probes), (8, 3));

    let record = pipeline
        .verify_claim(Uuid::new_v4(), "The Nile flows north")
        .await
        .unwrap();
    assert_eq!(record.verdict, Verdict::Supported);
}

#[tokio::test]
async fn storage_outage_surfaces_after_retries() {
    let config = PipelineConfig {
        retry_attempts: 2,
        ..test_config()
    };
    let pipeline = build_pipeline(config).await;
    pipeline.store().pool().close().await;

    pipeline.store().reset_round_trips();
    let err = pipeline
        .verify_claim(Uuid::new_v4(), "water is wet")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "storage");
    // The first write was retried the configured number of times.
    assert_eq!(pipeline.store().round_trips(), 2);
}

#[tokio::test]
async fn accumulator_batches_concurrent_single_pair_requests() {
    let pipeline = build_pipeline(test_config()).await;
    let premise = "The cat sat on the mat";
    let hypothesis = "The cat sat on the mat";

    let calls: Vec<_> = (0..20)
        .map(|_| pipeline.score_pair(premise, hypothesis))
        .collect();
    let results = futures::future::join_all(calls).await;

    for result in results {
        let scored = result.unwrap();
        assert_eq!(scored.label, claimcheck::NliLabel::Entailment);
    }

    let batcher = pipeline.batcher();
    assert_eq!(batcher.pairs_scored(), 20);
    assert!(
        batcher.batches_flushed() <= 3,
        "20 concurrent pairs flushed {} batches",
        batcher.batches_flushed()
    );
}

#[tokio::test]
async fn one_failing_claim_does_not_abort_the_batch() {
    let pipeline = build_pipeline(test_config()).await;
    ingest(&pipeline, &["Rust compiles to native code"]).await;

    let claims = vec![
        (Uuid::new_v4(), "Rust compiles to native code".to_string()),
        (Uuid::new_v4(), "   ".to_string()),
        (Uuid::new_v4(), "Bananas are a fruit".to_string()),
    ];
    let results = pipeline.verify_batch(claims).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(results[2].is_ok());
}

#[tokio::test]
async fn sequential_mode_matches_parallel_results() {
    let sequential = PipelineConfig {
        max_workers: 1,
        ..test_config()
    };
    let pipeline = build_pipeline(sequential).await;
    ingest(&pipeline, &["The sun rises in the east"]).await;

    let claims = vec![
        (Uuid::new_v4(), "The sun rises in the east".to_string()),
        (Uuid::new_v4(), "Glass is made from sand".to_string()),
    ];
    let results = pipeline.verify_batch(claims).await;

    assert_eq!(results.len(), 2);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.verdict, Verdict::Supported);
    let second = results[1].as_ref().unwrap();
    assert_eq!(second.verdict, Verdict::Insufficient);
}

#[tokio::test]
async fn reverifying_a_claim_keeps_the_latest_verdict() {
    let pipeline = build_pipeline(test_config()).await;
    let claim_id = Uuid::new_v4();

    let first = pipeline
        .verify_claim(claim_id, "Honey never spoils when stored sealed")
        .await
        .unwrap();

    ingest(&pipeline, &["Honey never spoils when stored sealed"]).await;
    let second = pipeline
        .verify_claim(claim_id, "Honey never spoils when stored sealed")
        .await
        .unwrap();

    assert_eq!(first.verdict, Verdict::Insufficient);
    assert!(second.evidence_count > 0);

    let latest = pipeline
        .store()
        .latest_verification(claim_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, second.id);
}
