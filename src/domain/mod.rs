//! Core records shared across the pipeline: claims, evidence, embeddings,
//! NLI results, and verification verdicts.
//!
//! These mirror the persisted schema (see [`crate::store`]). Rows are
//! append-only from the pipeline's perspective: NLI and verification records
//! are never mutated, only superseded by newer rows with a later `created_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A natural-language claim submitted for verification. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(id: Uuid, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// An append-only corpus entry the pipeline retrieves as potential evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub content: String,
    pub source_url: Option<String>,
    pub source_type: Option<String>,
    /// Source credibility in `[0.0, 1.0]`, when known.
    pub credibility_score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

/// Which table an embedding row points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Evidence,
    Claim,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Evidence => "evidence",
            EntityType::Claim => "claim",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "evidence" => Some(EntityType::Evidence),
            "claim" => Some(EntityType::Claim),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored embedding vector. Exactly one row exists per
/// `(entity_type, entity_id, tenant_id)`; re-embedding upserts in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub vector: Vec<f32>,
    pub model_name: String,
    pub model_version: String,
    pub tenant_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Three-way NLI classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NliLabel {
    Entailment,
    Contradiction,
    Neutral,
}

impl NliLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NliLabel::Entailment => "ENTAILMENT",
            NliLabel::Contradiction => "CONTRADICTION",
            NliLabel::Neutral => "NEUTRAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTAILMENT" => Some(NliLabel::Entailment),
            "CONTRADICTION" => Some(NliLabel::Contradiction),
            "NEUTRAL" => Some(NliLabel::Neutral),
            _ => None,
        }
    }

    /// Argmax over `(entailment, contradiction, neutral)` scores.
    pub fn from_scores(entailment: f32, contradiction: f32, neutral: f32) -> Self {
        if entailment >= contradiction && entailment >= neutral {
            NliLabel::Entailment
        } else if contradiction >= neutral {
            NliLabel::Contradiction
        } else {
            NliLabel::Neutral
        }
    }
}

impl std::fmt::Display for NliLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored claim-evidence pair. Multiple rows may exist for the same pair
/// over time (re-verification); no uniqueness constraint applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NliRecord {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub evidence_id: Uuid,
    pub label: NliLabel,
    pub confidence: f32,
    pub entailment_score: f32,
    pub contradiction_score: f32,
    pub neutral_score: f32,
    pub model_name: String,
    pub premise_text: String,
    pub hypothesis_text: String,
    pub created_at: DateTime<Utc>,
}

impl NliRecord {
    /// Class scores must sum to ~1.0 and `label` must equal the argmax.
    pub fn scores_consistent(&self) -> bool {
        let sum = self.entailment_score + self.contradiction_score + self.neutral_score;
        (sum - 1.0).abs() <= 1e-3
            && self.label
                == NliLabel::from_scores(
                    self.entailment_score,
                    self.contradiction_score,
                    self.neutral_score,
                )
    }
}

/// Claim-level conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Supported,
    Refuted,
    Insufficient,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Supported => "SUPPORTED",
            Verdict::Refuted => "REFUTED",
            Verdict::Insufficient => "INSUFFICIENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUPPORTED" => Some(Verdict::Supported),
            "REFUTED" => Some(Verdict::Refuted),
            "INSUFFICIENT" => Some(Verdict::Insufficient),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal output of one pipeline run for a claim. The latest row by
/// `created_at` is authoritative when a claim has been re-verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub verdict: Verdict,
    pub confidence: f32,
    pub support_score: f32,
    pub refute_score: f32,
    pub neutral_score: f32,
    pub evidence_count: u32,
    pub supporting_evidence_count: u32,
    pub refuting_evidence_count: u32,
    pub neutral_evidence_count: u32,
    pub reasoning: String,
    /// Ordered NLI row ids backing this verdict, for traceability.
    pub nli_result_ids: Vec<Uuid>,
    pub pipeline_version: String,
    pub retrieval_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationRecord {
    /// `evidence_count` must equal the sum of the per-label counts, and
    /// `nli_result_ids` may only be empty for a zero-evidence INSUFFICIENT.
    pub fn counts_consistent(&self) -> bool {
        let sum = self.supporting_evidence_count
            + self.refuting_evidence_count
            + self.neutral_evidence_count;
        if self.evidence_count != sum {
            return false;
        }
        if self.nli_result_ids.is_empty() {
            self.verdict == Verdict::Insufficient && self.evidence_count == 0
        } else {
            true
        }
    }
}

/// Serializes a vector as little-endian f32 bytes (the persisted BLOB format).
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Parses little-endian f32 bytes back into a vector.
///
/// Returns `None` when the byte length is not a multiple of 4.
pub fn bytes_to_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if !bytes.len().is_multiple_of(4) {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
