//! Pure verdict aggregation over a claim's NLI rows.
//!
//! Aggregation is a total function of its inputs: no I/O, no clock reads
//! beyond timestamping the produced record, so it is directly unit-testable.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{Evidence, NliLabel, NliRecord, VerificationRecord, Verdict};

/// Pluggable weighting of individual NLI rows within their label bucket.
///
/// The weighting formula is deliberately a strategy: how source credibility
/// should factor into support/refute scores is a product decision, not a
/// pipeline invariant.
pub trait WeightStrategy: Send + Sync {
    /// Non-negative weight for one NLI row. `evidence` is the row's source
    /// when it could be resolved.
    fn weight(&self, row: &NliRecord, evidence: Option<&Evidence>) -> f32;

    /// Short name recorded in the reasoning string.
    fn name(&self) -> &'static str;
}

/// Every row counts equally; bucket scores are plain mean confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformWeight;

impl WeightStrategy for UniformWeight {
    fn weight(&self, _row: &NliRecord, _evidence: Option<&Evidence>) -> f32 {
        1.0
    }

    fn name(&self) -> &'static str {
        "uniform"
    }
}

/// Weights each row by its NLI confidence times the source credibility.
/// Unrated sources count at full credibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredibilityWeight;

impl WeightStrategy for CredibilityWeight {
    fn weight(&self, row: &NliRecord, evidence: Option<&Evidence>) -> f32 {
        let credibility = evidence.and_then(|e| e.credibility_score).unwrap_or(1.0);
        (row.confidence * credibility).max(0.0)
    }

    fn name(&self) -> &'static str {
        "credibility"
    }
}

/// Verdict thresholds (see [`PipelineConfig`](crate::config::PipelineConfig)).
#[derive(Debug, Clone)]
pub struct AggregationParams {
    pub min_evidence_count: u32,
    pub min_confidence: f32,
    pub tie_epsilon: f32,
}

pub struct AggregationContext<'a> {
    pub params: &'a AggregationParams,
    pub strategy: &'a dyn WeightStrategy,
    pub pipeline_version: &'a str,
    pub retrieval_method: &'a str,
}

/// Derives the claim-level verdict from its NLI rows.
///
/// Bucket scores are weighted mean confidence per label. The verdict is the
/// highest-scoring bucket (neutral maps to INSUFFICIENT), forced to
/// INSUFFICIENT when evidence is too thin, the winning score is below the
/// confidence threshold, or support and refute are within epsilon of each
/// other. Zero rows always yield INSUFFICIENT with `evidence_count == 0`.
pub fn aggregate(
    claim_id: Uuid,
    rows: &[NliRecord],
    evidence_by_id: &HashMap<Uuid, Evidence>,
    ctx: &AggregationContext<'_>,
) -> VerificationRecord {
    // Index 0: entailment, 1: contradiction, 2: neutral.
    let mut sums = [0.0f32; 3];
    let mut weights = [0.0f32; 3];
    let mut counts = [0u32; 3];

    for row in rows {
        let slot = match row.label {
            NliLabel::Entailment => 0,
            NliLabel::Contradiction => 1,
            NliLabel::Neutral => 2,
        };
        let weight = ctx.strategy.weight(row, evidence_by_id.get(&row.evidence_id));
        sums[slot] += weight * row.confidence;
        weights[slot] += weight;
        counts[slot] += 1;
    }

    let bucket = |slot: usize| {
        if weights[slot] > 0.0 {
            sums[slot] / weights[slot]
        } else {
            0.0
        }
    };
    let support_score = bucket(0);
    let refute_score = bucket(1);
    let neutral_score = bucket(2);
    let evidence_count = rows.len() as u32;

    let candidate = if support_score > 0.0
        && support_score >= refute_score
        && support_score >= neutral_score
    {
        Verdict::Supported
    } else if refute_score > 0.0 && refute_score >= neutral_score {
        Verdict::Refuted
    } else {
        Verdict::Insufficient
    };

    let params = ctx.params;
    let (verdict, note) = if evidence_count == 0 {
        (Verdict::Insufficient, "no evidence retrieved".to_string())
    } else if evidence_count < params.min_evidence_count {
        (
            Verdict::Insufficient,
            format!(
                "only {} evidence items where {} are required",
                evidence_count, params.min_evidence_count
            ),
        )
    } else if candidate != Verdict::Insufficient
        && (support_score - refute_score).abs() <= params.tie_epsilon
    {
        // Ambiguous evidence is INSUFFICIENT, not a coin flip.
        (
            Verdict::Insufficient,
            "support and refutation are balanced".to_string(),
        )
    } else if candidate == Verdict::Supported && support_score < params.min_confidence {
        (
            Verdict::Insufficient,
            format!(
                "support confidence {:.2} is below the {:.2} threshold",
                support_score, params.min_confidence
            ),
        )
    } else if candidate == Verdict::Refuted && refute_score < params.min_confidence {
        (
            Verdict::Insufficient,
            format!(
                "refute confidence {:.2} is below the {:.2} threshold",
                refute_score, params.min_confidence
            ),
        )
    } else {
        let note = match candidate {
            Verdict::Supported => "supporting evidence prevails",
            Verdict::Refuted => "contradicting evidence prevails",
            Verdict::Insufficient => "evidence is predominantly neutral",
        };
        (candidate, note.to_string())
    };

    let confidence = match verdict {
        Verdict::Supported => support_score,
        Verdict::Refuted => refute_score,
        Verdict::Insufficient if evidence_count == 0 => 0.0,
        Verdict::Insufficient => neutral_score,
    };

    let reasoning = format!(
        "{} of {} evidence items entail the claim, {} contradict, {} neutral \
         (support {:.2}, refute {:.2}, neutral {:.2}, {} weighting): {}",
        counts[0],
        evidence_count,
        counts[1],
        counts[2],
        support_score,
        refute_score,
        neutral_score,
        ctx.strategy.name(),
        note
    );

    let now = Utc::now();
    VerificationRecord {
        id: Uuid::new_v4(),
        claim_id,
        verdict,
        confidence,
        support_score,
        refute_score,
        neutral_score,
        evidence_count,
        supporting_evidence_count: counts[0],
        refuting_evidence_count: counts[1],
        neutral_evidence_count: counts[2],
        reasoning,
        nli_result_ids: rows.iter().map(|r| r.id).collect(),
        pipeline_version: ctx.pipeline_version.to_string(),
        retrieval_method: ctx.retrieval_method.to_string(),
        created_at: now,
        updated_at: now,
    }
}
