//! Persisted schema bootstrap.
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` DDL so embedded and test
//! deployments self-initialize. Uuids are stored as canonical text,
//! timestamps as RFC 3339 text, embedding vectors as little-endian f32 BLOBs.
//! The approximate-similarity index over vectors lives in-process (see
//! [`crate::index`]), not in SQLite.

use sqlx::SqlitePool;

use super::error::{StoreError, StoreResult};

/// Table + index DDL, in dependency order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS claims (
        id TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS evidence (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        source_url TEXT,
        source_type TEXT,
        credibility_score REAL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS embeddings (
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        vector BLOB NOT NULL,
        model_name TEXT NOT NULL,
        model_version TEXT NOT NULL,
        tenant_id INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    // One embedding per entity per tenant; re-embedding upserts in place.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_embeddings_entity
        ON embeddings (entity_type, entity_id, tenant_id)",
    "CREATE TABLE IF NOT EXISTS nli_results (
        id TEXT PRIMARY KEY,
        claim_id TEXT NOT NULL,
        evidence_id TEXT NOT NULL,
        label TEXT NOT NULL,
        confidence REAL NOT NULL,
        entailment_score REAL NOT NULL,
        contradiction_score REAL NOT NULL,
        neutral_score REAL NOT NULL,
        model_name TEXT NOT NULL,
        premise_text TEXT NOT NULL,
        hypothesis_text TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_nli_claim_evidence
        ON nli_results (claim_id, evidence_id)",
    "CREATE TABLE IF NOT EXISTS verification_results (
        id TEXT PRIMARY KEY,
        claim_id TEXT NOT NULL,
        verdict TEXT NOT NULL,
        confidence REAL NOT NULL,
        support_score REAL NOT NULL,
        refute_score REAL NOT NULL,
        neutral_score REAL NOT NULL,
        evidence_count INTEGER NOT NULL,
        supporting_evidence_count INTEGER NOT NULL,
        refuting_evidence_count INTEGER NOT NULL,
        neutral_evidence_count INTEGER NOT NULL,
        reasoning TEXT NOT NULL,
        nli_result_ids TEXT NOT NULL,
        pipeline_version TEXT NOT NULL,
        retrieval_method TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    // Latest verdict per claim in one indexed lookup.
    "CREATE INDEX IF NOT EXISTS idx_verification_claim_created
        ON verification_results (claim_id, created_at DESC)",
];

/// Applies the schema (safe to call repeatedly).
pub async fn migrate(pool: &SqlitePool) -> StoreResult<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::MigrationFailed {
                reason: e.to_string(),
            })?;
    }
    Ok(())
}
