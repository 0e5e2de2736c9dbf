//! Request accumulation for single-pair NLI callers.
//!
//! Pair-by-pair inference is 4-5x slower per pair than batched inference, so
//! concurrent single-pair submissions are buffered and flushed as one batched
//! call when the target batch size is reached or the max-wait timer elapses,
//! whichever comes first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use super::config::BatcherConfig;
use super::error::NliError;
use super::scorer::{NliScorer, ScoredPair};

struct Pending {
    premise: String,
    hypothesis: String,
    reply: oneshot::Sender<Result<ScoredPair, NliError>>,
}

/// Handle to the accumulator worker. Cheap to clone; all clones feed the same
/// buffer.
#[derive(Clone)]
pub struct NliBatcher {
    tx: mpsc::Sender<Pending>,
    batches_flushed: Arc<AtomicU64>,
    pairs_scored: Arc<AtomicU64>,
}

impl NliBatcher {
    /// Spawns the accumulator task on the current tokio runtime.
    pub fn spawn(scorer: Arc<NliScorer>, config: BatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let batches_flushed = Arc::new(AtomicU64::new(0));
        let pairs_scored = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_loop(
            rx,
            scorer,
            config,
            Arc::clone(&batches_flushed),
            Arc::clone(&pairs_scored),
        ));

        Self {
            tx,
            batches_flushed,
            pairs_scored,
        }
    }

    /// Submits one pair and waits for its batched result.
    pub async fn score(
        &self,
        premise: impl Into<String>,
        hypothesis: impl Into<String>,
    ) -> Result<ScoredPair, NliError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Pending {
                premise: premise.into(),
                hypothesis: hypothesis.into(),
                reply,
            })
            .await
            .map_err(|_| NliError::AccumulatorUnavailable {
                reason: "accumulator task has shut down".to_string(),
            })?;

        response.await.map_err(|_| NliError::AccumulatorUnavailable {
            reason: "accumulator dropped the request".to_string(),
        })?
    }

    /// Number of batched inference calls issued so far.
    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    /// Number of pairs scored through the accumulator so far.
    pub fn pairs_scored(&self) -> u64 {
        self.pairs_scored.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for NliBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NliBatcher")
            .field("batches_flushed", &self.batches_flushed())
            .field("pairs_scored", &self.pairs_scored())
            .finish()
    }
}

async fn run_loop(
    mut rx: mpsc::Receiver<Pending>,
    scorer: Arc<NliScorer>,
    config: BatcherConfig,
    batches_flushed: Arc<AtomicU64>,
    pairs_scored: Arc<AtomicU64>,
) {
    let target = config.target_batch.max(1);

    while let Some(first) = rx.recv().await {
        let mut pending = Vec::with_capacity(target);
        pending.push(first);

        // Flush when full OR when the max wait elapses, whichever first.
        let deadline = Instant::now() + config.max_wait;
        while pending.len() < target {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(item)) => pending.push(item),
                // Channel closed: score what we have, then the outer loop ends.
                Ok(None) => break,
                // Timer elapsed with a partial batch.
                Err(_) => break,
            }
        }

        debug!(batch = pending.len(), target, "Flushing accumulated NLI batch");
        batches_flushed.fetch_add(1, Ordering::Relaxed);
        pairs_scored.fetch_add(pending.len() as u64, Ordering::Relaxed);

        flush(&scorer, pending).await;
    }
}

async fn flush(scorer: &Arc<NliScorer>, pending: Vec<Pending>) {
    let pairs: Vec<(String, String)> = pending
        .iter()
        .map(|p| (p.premise.clone(), p.hypothesis.clone()))
        .collect();

    let scorer = Arc::clone(scorer);
    let scored = tokio::task::spawn_blocking(move || {
        let refs: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(p, h)| (p.as_str(), h.as_str()))
            .collect();
        scorer.verify_batch(&refs)
    })
    .await;

    match scored {
        Ok(Ok(results)) => {
            // verify_batch is order-preserving and 1:1 with its input.
            for (item, result) in pending.into_iter().zip(results) {
                let _ = item.reply.send(Ok(result));
            }
        }
        Ok(Err(err)) => {
            warn!(error = %err, "Batched NLI call failed, failing all waiters");
            let reason = err.to_string();
            for item in pending {
                let _ = item.reply.send(Err(NliError::InferenceFailed {
                    reason: reason.clone(),
                }));
            }
        }
        Err(join_err) => {
            warn!(error = %join_err, "NLI inference task panicked");
            for item in pending {
                let _ = item.reply.send(Err(NliError::InferenceFailed {
                    reason: "inference task panicked".to_string(),
                }));
            }
        }
    }
}
