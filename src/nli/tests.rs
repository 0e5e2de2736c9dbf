use std::sync::Arc;
use std::time::Duration;

use crate::domain::NliLabel;

use super::*;

fn stub_scorer() -> NliScorer {
    NliScorer::load(NliConfig::stub()).expect("stub scorer should load")
}

#[test]
fn scores_sum_to_one_and_label_is_argmax() {
    let scorer = stub_scorer();
    let pairs = [
        ("water boils at 100 degrees", "water boils at 100 degrees"),
        ("water boils at 100 degrees", "water does not boil at 100 degrees"),
        ("the moon orbits the earth", "bananas are yellow"),
    ];
    for scored in scorer.verify_batch(&pairs).unwrap() {
        let sum = scored.entailment_score + scored.contradiction_score + scored.neutral_score;
        assert!((sum - 1.0).abs() < 1e-3, "scores summed to {}", sum);
        assert_eq!(
            scored.label,
            NliLabel::from_scores(
                scored.entailment_score,
                scored.contradiction_score,
                scored.neutral_score
            )
        );
        assert_eq!(
            scored.confidence,
            scored
                .entailment_score
                .max(scored.contradiction_score)
                .max(scored.neutral_score)
        );
    }
}

#[test]
fn stub_labels_follow_lexical_signal() {
    let scorer = stub_scorer();

    let supporting = scorer
        .score_pair(
            "water boils at 100 degrees celsius at sea level",
            "water boils at 100 degrees",
        )
        .unwrap();
    assert_eq!(supporting.label, NliLabel::Entailment);

    let contradicting = scorer
        .score_pair(
            "water boils at 100 degrees celsius at sea level",
            "water does not boil at 100 degrees",
        )
        .unwrap();
    assert_eq!(contradicting.label, NliLabel::Contradiction);

    let unrelated = scorer
        .score_pair("the moon orbits the earth", "bananas contain potassium")
        .unwrap();
    assert_eq!(unrelated.label, NliLabel::Neutral);
}

#[test]
fn batch_size_never_changes_results() {
    let scorer = stub_scorer();
    let pairs: Vec<(String, String)> = (0..10)
        .map(|i| {
            (
                format!("evidence statement number {}", i),
                format!("claim statement number {}", i % 3),
            )
        })
        .collect();
    let refs: Vec<(&str, &str)> = pairs.iter().map(|(p, h)| (p.as_str(), h.as_str())).collect();

    let one = scorer.verify_batch_with(&refs, 1).unwrap();
    let three = scorer.verify_batch_with(&refs, 3).unwrap();
    let all = scorer.verify_batch_with(&refs, 64).unwrap();
    assert_eq!(one, three);
    assert_eq!(three, all);
}

#[test]
fn empty_pair_rejected_all_or_nothing() {
    let scorer = stub_scorer();
    let result = scorer.verify_batch(&[("premise", "hypothesis"), ("premise", "  ")]);
    assert!(matches!(result, Err(NliError::InvalidInput { .. })));
}

#[test]
fn empty_batch_is_fine() {
    let scorer = stub_scorer();
    assert!(scorer.verify_batch(&[]).unwrap().is_empty());
}

#[test]
fn missing_model_files_fail_load() {
    let config = NliConfig::new("/nonexistent/nli/model");
    assert!(matches!(
        NliScorer::load(config),
        Err(NliError::ModelNotFound { .. })
    ));
}

#[tokio::test]
async fn accumulator_batches_concurrent_requests() {
    let scorer = Arc::new(stub_scorer());
    let batcher = NliBatcher::spawn(
        Arc::clone(&scorer),
        BatcherConfig {
            target_batch: 20,
            max_wait: Duration::from_millis(100),
            channel_capacity: 64,
        },
    );

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .score("water boils at 100 degrees", "water boils at 100 degrees")
                    .await
            })
        })
        .collect();

    for handle in handles {
        let scored = handle.await.unwrap().unwrap();
        assert_eq!(scored.label, NliLabel::Entailment);
    }

    // 20 concurrent submissions must collapse into one (or few) batched
    // inference calls, never 20 individual calls.
    assert_eq!(batcher.pairs_scored(), 20);
    assert!(
        batcher.batches_flushed() <= 3,
        "expected few flushes, got {}",
        batcher.batches_flushed()
    );
}

#[tokio::test]
async fn accumulator_flushes_partial_batch_on_timeout() {
    let scorer = Arc::new(stub_scorer());
    let batcher = NliBatcher::spawn(
        scorer,
        BatcherConfig {
            target_batch: 64,
            max_wait: Duration::from_millis(20),
            channel_capacity: 8,
        },
    );

    // A single request can never fill the target batch; the timer must flush.
    let scored = batcher
        .score("the sky is blue on clear days", "the sky is blue")
        .await
        .unwrap();
    assert_eq!(scored.label, NliLabel::Entailment);
    assert_eq!(batcher.batches_flushed(), 1);
}

#[tokio::test]
async fn accumulator_result_matches_direct_call() {
    let scorer = Arc::new(stub_scorer());
    let direct = scorer
        .score_pair("the cat sat on the mat", "a cat sat on a mat")
        .unwrap();

    let batcher = NliBatcher::spawn(Arc::clone(&scorer), BatcherConfig::default());
    let batched = batcher
        .score("the cat sat on the mat", "a cat sat on a mat")
        .await
        .unwrap();

    assert_eq!(direct, batched);
}

#[tokio::test]
async fn accumulator_propagates_inference_errors() {
    let scorer = Arc::new(stub_scorer());
    let batcher = NliBatcher::spawn(scorer, BatcherConfig::default());

    let result = batcher.score("premise", "   ").await;
    assert!(matches!(result, Err(NliError::InferenceFailed { .. })));
}
