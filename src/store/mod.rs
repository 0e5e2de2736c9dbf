//! Batched persistence layer.
//!
//! Every primitive here issues exactly one round-trip to the database
//! regardless of batch size. Looping single-row queries over more than a
//! handful of items is a defect in this layer: per-round-trip overhead
//! dominates the underlying work, making N calls of batch size 1 tens of
//! times slower than one call of batch size N. A shared round-trip counter
//! makes the guarantee assertable in tests.

pub mod error;
pub mod schema;


pub use error::{StoreError, StoreResult};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    Claim, Embedding, EntityType, Evidence, NliLabel, NliRecord, VerificationRecord, Verdict,
    bytes_to_vector, vector_to_bytes,
};

/// Batch-oriented store over the four pipeline tables (plus claims).
///
/// Cheap to clone; clones share the pool and the round-trip counter.
#[derive(Clone)]
pub struct BatchStore {
    pool: SqlitePool,
    round_trips: Arc<AtomicU64>,
}

impl std::fmt::Debug for BatchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStore")
            .field("round_trips", &self.round_trips())
            .finish()
    }
}

impl BatchStore {
    /// Connects a pool and applies the schema.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                reason: format!("{}: {}", url, e),
            })?;

        schema::migrate(&pool).await?;
        info!(url, max_connections, "Batch store connected");

        Ok(Self {
            pool,
            round_trips: Arc::new(AtomicU64::new(0)),
        })
    }

    /// In-memory store for tests and examples.
    ///
    /// Uses a single connection: each `:memory:` connection is its own
    /// database, so a larger pool would see different data per connection.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Statements issued so far (migrations excluded).
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Resets the statement counter (test hook).
    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::Relaxed);
    }

    fn count_round_trip(&self) {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- claims ----

    /// Inserts a claim row. Claims are immutable once created: re-verifying
    /// an existing claim leaves the original row untouched and only appends
    /// new verification results.
    pub async fn insert_claim(&self, claim: &Claim) -> StoreResult<()> {
        self.count_round_trip();
        sqlx::query(
            "INSERT INTO claims (id, text, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
            .bind(claim.id.to_string())
            .bind(&claim.text)
            .bind(claim.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetches many claims in one query. Order is not guaranteed to match the
    /// input; re-sort by id if it matters.
    pub async fn fetch_claims(&self, ids: &[Uuid]) -> StoreResult<Vec<Claim>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.count_round_trip();
        let mut qb = QueryBuilder::new("SELECT id, text, created_at FROM claims WHERE id IN (");
        push_id_set(&mut qb, ids);
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(claim_from_row).collect()
    }

    // ---- evidence ----

    /// Inserts many evidence rows in one statement; returns their ids in
    /// insertion order. Atomic: all rows commit or none do.
    pub async fn insert_evidence_batch(&self, rows: &[Evidence]) -> StoreResult<Vec<Uuid>> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        self.count_round_trip();
        let mut qb = QueryBuilder::new(
            "INSERT INTO evidence (id, content, source_url, source_type, credibility_score, created_at) ",
        );
        qb.push_values(rows, |mut b, e| {
            b.push_bind(e.id.to_string())
                .push_bind(&e.content)
                .push_bind(&e.source_url)
                .push_bind(&e.source_type)
                .push_bind(e.credibility_score)
                .push_bind(e.created_at);
        });
        qb.build().execute(&self.pool).await?;

        debug!(rows = rows.len(), "Inserted evidence batch");
        Ok(rows.iter().map(|e| e.id).collect())
    }

    /// Fetches many evidence rows by id in one `IN`-set query.
    pub async fn fetch_evidence(&self, ids: &[Uuid]) -> StoreResult<Vec<Evidence>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.count_round_trip();
        let mut qb = QueryBuilder::new(
            "SELECT id, content, source_url, source_type, credibility_score, created_at \
             FROM evidence WHERE id IN (",
        );
        push_id_set(&mut qb, ids);
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(evidence_from_row).collect()
    }

    // ---- embeddings ----

    /// Inserts-or-updates many embeddings atomically, keyed by the
    /// `(entity_type, entity_id, tenant_id)` uniqueness constraint.
    /// Re-upserting replaces the vector in place rather than duplicating.
    ///
    /// Vector dimensionality is validated against `expected_dim` before
    /// anything is written.
    pub async fn upsert_embeddings(
        &self,
        rows: &[Embedding],
        expected_dim: usize,
    ) -> StoreResult<Vec<Uuid>> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        for row in rows {
            if row.vector.len() != expected_dim {
                return Err(StoreError::DimensionMismatch {
                    expected: expected_dim,
                    actual: row.vector.len(),
                });
            }
        }

        self.count_round_trip();
        let mut qb = QueryBuilder::new(
            "INSERT INTO embeddings \
             (id, entity_type, entity_id, vector, model_name, model_version, tenant_id, created_at, updated_at) ",
        );
        qb.push_values(rows, |mut b, e| {
            b.push_bind(e.id.to_string())
                .push_bind(e.entity_type.as_str())
                .push_bind(e.entity_id.to_string())
                .push_bind(vector_to_bytes(&e.vector))
                .push_bind(&e.model_name)
                .push_bind(&e.model_version)
                .push_bind(e.tenant_id)
                .push_bind(e.created_at)
                .push_bind(e.updated_at);
        });
        qb.push(
            " ON CONFLICT(entity_type, entity_id, tenant_id) DO UPDATE SET \
             vector = excluded.vector, \
             model_name = excluded.model_name, \
             model_version = excluded.model_version, \
             updated_at = excluded.updated_at",
        );
        qb.build().execute(&self.pool).await?;

        debug!(rows = rows.len(), "Upserted embedding batch");
        Ok(rows.iter().map(|e| e.id).collect())
    }

    /// Loads all embeddings of one entity type for a tenant (index builds).
    pub async fn fetch_embeddings(
        &self,
        entity_type: EntityType,
        tenant_id: i64,
    ) -> StoreResult<Vec<Embedding>> {
        self.count_round_trip();
        let rows = sqlx::query(
            "SELECT id, entity_type, entity_id, vector, model_name, model_version, tenant_id, created_at, updated_at \
             FROM embeddings WHERE entity_type = ? AND tenant_id = ?",
        )
        .bind(entity_type.as_str())
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(embedding_from_row).collect()
    }

    /// Evidence rows joined with their embeddings in one query (the N+1
    /// shape this layer exists to prevent).
    pub async fn evidence_with_embeddings(
        &self,
        ids: &[Uuid],
        tenant_id: i64,
    ) -> StoreResult<Vec<(Evidence, Embedding)>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.count_round_trip();
        let mut qb = QueryBuilder::new(
            "SELECT e.id AS e_id, e.content AS e_content, e.source_url AS e_source_url, \
                    e.source_type AS e_source_type, e.credibility_score AS e_credibility_score, \
                    e.created_at AS e_created_at, \
                    m.id, m.entity_type, m.entity_id, m.vector, m.model_name, m.model_version, \
                    m.tenant_id, m.created_at, m.updated_at \
             FROM evidence e \
             JOIN embeddings m ON m.entity_type = 'evidence' AND m.entity_id = e.id \
             WHERE m.tenant_id = ",
        );
        qb.push_bind(tenant_id);
        qb.push(" AND e.id IN (");
        push_id_set(&mut qb, ids);
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let evidence = Evidence {
                    id: parse_uuid(row, "e_id")?,
                    content: row.try_get("e_content")?,
                    source_url: row.try_get("e_source_url")?,
                    source_type: row.try_get("e_source_type")?,
                    credibility_score: row.try_get("e_credibility_score")?,
                    created_at: row.try_get("e_created_at")?,
                };
                let embedding = embedding_from_row(row)?;
                Ok((evidence, embedding))
            })
            .collect()
    }

    // ---- NLI results ----

    /// Inserts many NLI rows in one statement; ids returned in insertion
    /// order.
    pub async fn insert_nli_batch(&self, rows: &[NliRecord]) -> StoreResult<Vec<Uuid>> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        self.count_round_trip();
        let mut qb = nli_insert_builder();
        qb.push_values(rows, push_nli_row);
        qb.build().execute(&self.pool).await?;

        Ok(rows.iter().map(|r| r.id).collect())
    }

    /// All NLI rows for a claim, newest first.
    pub async fn fetch_nli_by_claim(&self, claim_id: Uuid) -> StoreResult<Vec<NliRecord>> {
        self.count_round_trip();
        let rows = sqlx::query(
            "SELECT id, claim_id, evidence_id, label, confidence, entailment_score, \
                    contradiction_score, neutral_score, model_name, premise_text, hypothesis_text, created_at \
             FROM nli_results WHERE claim_id = ? ORDER BY created_at DESC",
        )
        .bind(claim_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(nli_from_row).collect()
    }

    // ---- verification results ----

    /// Persists one claim's NLI rows and verification result in a single
    /// transaction: either everything from the run commits or nothing does.
    pub async fn persist_verification(
        &self,
        nli_rows: &[NliRecord],
        verification: &VerificationRecord,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        if !nli_rows.is_empty() {
            self.count_round_trip();
            let mut qb = nli_insert_builder();
            qb.push_values(nli_rows, push_nli_row);
            qb.build().execute(&mut *tx).await?;
        }

        self.count_round_trip();
        let ids_json = serde_json::to_string(
            &verification
                .nli_result_ids
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>(),
        )
        .map_err(|e| StoreError::Decode {
            reason: format!("failed to serialize nli_result_ids: {}", e),
        })?;

        sqlx::query(
            "INSERT INTO verification_results \
             (id, claim_id, verdict, confidence, support_score, refute_score, neutral_score, \
              evidence_count, supporting_evidence_count, refuting_evidence_count, neutral_evidence_count, \
              reasoning, nli_result_ids, pipeline_version, retrieval_method, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(verification.id.to_string())
        .bind(verification.claim_id.to_string())
        .bind(verification.verdict.as_str())
        .bind(verification.confidence)
        .bind(verification.support_score)
        .bind(verification.refute_score)
        .bind(verification.neutral_score)
        .bind(verification.evidence_count as i64)
        .bind(verification.supporting_evidence_count as i64)
        .bind(verification.refuting_evidence_count as i64)
        .bind(verification.neutral_evidence_count as i64)
        .bind(&verification.reasoning)
        .bind(ids_json)
        .bind(&verification.pipeline_version)
        .bind(&verification.retrieval_method)
        .bind(verification.created_at)
        .bind(verification.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            claim_id = %verification.claim_id,
            verdict = %verification.verdict,
            nli_rows = nli_rows.len(),
            "Persisted verification"
        );
        Ok(())
    }

    /// Latest verification for a claim via the `(claim_id, created_at desc)`
    /// index, one lookup.
    pub async fn latest_verification(
        &self,
        claim_id: Uuid,
    ) -> StoreResult<Option<VerificationRecord>> {
        self.count_round_trip();
        let row = sqlx::query(
            "SELECT id, claim_id, verdict, confidence, support_score, refute_score, neutral_score, \
                    evidence_count, supporting_evidence_count, refuting_evidence_count, neutral_evidence_count, \
                    reasoning, nli_result_ids, pipeline_version, retrieval_method, created_at, updated_at \
             FROM verification_results WHERE claim_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(claim_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(verification_from_row).transpose()
    }

    /// Latest verification plus its referenced NLI rows in one joined query.
    ///
    /// The join brings back all NLI rows for the claim; rows are filtered to
    /// the result's `nli_result_ids` and re-ordered to match client-side.
    pub async fn verification_with_nli(
        &self,
        claim_id: Uuid,
    ) -> StoreResult<Option<(VerificationRecord, Vec<NliRecord>)>> {
        self.count_round_trip();
        let rows = sqlx::query(
            "SELECT v.id AS v_id, v.claim_id AS v_claim_id, v.verdict AS v_verdict, \
                    v.confidence AS v_confidence, v.support_score AS v_support_score, \
                    v.refute_score AS v_refute_score, v.neutral_score AS v_neutral_score, \
                    v.evidence_count AS v_evidence_count, \
                    v.supporting_evidence_count AS v_supporting_evidence_count, \
                    v.refuting_evidence_count AS v_refuting_evidence_count, \
                    v.neutral_evidence_count AS v_neutral_evidence_count, \
                    v.reasoning AS v_reasoning, v.nli_result_ids AS v_nli_result_ids, \
                    v.pipeline_version AS v_pipeline_version, v.retrieval_method AS v_retrieval_method, \
                    v.created_at AS v_created_at, v.updated_at AS v_updated_at, \
                    n.id, n.claim_id, n.evidence_id, n.label, n.confidence, n.entailment_score, \
                    n.contradiction_score, n.neutral_score, n.model_name, n.premise_text, \
                    n.hypothesis_text, n.created_at \
             FROM verification_results v \
             LEFT JOIN nli_results n ON n.claim_id = v.claim_id \
             WHERE v.id = (SELECT id FROM verification_results \
                           WHERE claim_id = ? ORDER BY created_at DESC LIMIT 1)",
        )
        .bind(claim_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let verification = verification_from_prefixed_row(first)?;

        let mut by_id = std::collections::HashMap::new();
        for row in &rows {
            // LEFT JOIN: n.* is NULL when the claim has no NLI rows.
            let nli_id: Option<String> = row.try_get("id")?;
            if nli_id.is_some() {
                let record = nli_from_row(row)?;
                by_id.insert(record.id, record);
            }
        }

        let nli = verification
            .nli_result_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();

        Ok(Some((verification, nli)))
    }
}

// ---- row mapping ----

fn push_id_set(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, ids: &[Uuid]) {
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(id.to_string());
    }
}

fn nli_insert_builder() -> QueryBuilder<'static, sqlx::Sqlite> {
    QueryBuilder::new(
        "INSERT INTO nli_results \
         (id, claim_id, evidence_id, label, confidence, entailment_score, contradiction_score, \
          neutral_score, model_name, premise_text, hypothesis_text, created_at) ",
    )
}

fn push_nli_row(
    mut b: sqlx::query_builder::Separated<'_, '_, sqlx::Sqlite, &'static str>,
    r: &NliRecord,
) {
    b.push_bind(r.id.to_string())
        .push_bind(r.claim_id.to_string())
        .push_bind(r.evidence_id.to_string())
        .push_bind(r.label.as_str())
        .push_bind(r.confidence)
        .push_bind(r.entailment_score)
        .push_bind(r.contradiction_score)
        .push_bind(r.neutral_score)
        .push_bind(r.model_name.clone())
        .push_bind(r.premise_text.clone())
        .push_bind(r.hypothesis_text.clone());
    b.push_bind(r.created_at);
}

fn parse_uuid(row: &SqliteRow, column: &str) -> StoreResult<Uuid> {
    let value: String = row.try_get(column)?;
    Uuid::parse_str(&value).map_err(|e| StoreError::Decode {
        reason: format!("{} is not a uuid: {}", column, e),
    })
}

fn claim_from_row(row: &SqliteRow) -> StoreResult<Claim> {
    Ok(Claim {
        id: parse_uuid(row, "id")?,
        text: row.try_get("text")?,
        created_at: row.try_get("created_at")?,
    })
}

fn evidence_from_row(row: &SqliteRow) -> StoreResult<Evidence> {
    Ok(Evidence {
        id: parse_uuid(row, "id")?,
        content: row.try_get("content")?,
        source_url: row.try_get("source_url")?,
        source_type: row.try_get("source_type")?,
        credibility_score: row.try_get("credibility_score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn embedding_from_row(row: &SqliteRow) -> StoreResult<Embedding> {
    let entity_type: String = row.try_get("entity_type")?;
    let entity_type = EntityType::parse(&entity_type).ok_or_else(|| StoreError::Decode {
        reason: format!("unknown entity_type: {}", entity_type),
    })?;

    let bytes: Vec<u8> = row.try_get("vector")?;
    let vector = bytes_to_vector(&bytes).ok_or_else(|| StoreError::Decode {
        reason: format!("vector blob has invalid length {}", bytes.len()),
    })?;

    Ok(Embedding {
        id: parse_uuid(row, "id")?,
        entity_type,
        entity_id: parse_uuid(row, "entity_id")?,
        vector,
        model_name: row.try_get("model_name")?,
        model_version: row.try_get("model_version")?,
        tenant_id: row.try_get("tenant_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn nli_from_row(row: &SqliteRow) -> StoreResult<NliRecord> {
    let label: String = row.try_get("label")?;
    let label = NliLabel::parse(&label).ok_or_else(|| StoreError::Decode {
        reason: format!("unknown NLI label: {}", label),
    })?;

    Ok(NliRecord {
        id: parse_uuid(row, "id")?,
        claim_id: parse_uuid(row, "claim_id")?,
        evidence_id: parse_uuid(row, "evidence_id")?,
        label,
        confidence: row.try_get("confidence")?,
        entailment_score: row.try_get("entailment_score")?,
        contradiction_score: row.try_get("contradiction_score")?,
        neutral_score: row.try_get("neutral_score")?,
        model_name: row.try_get("model_name")?,
        premise_text: row.try_get("premise_text")?,
        hypothesis_text: row.try_get("hypothesis_text")?,
        created_at: row.try_get("created_at")?,
    })
}

fn verification_fields(
    row: &SqliteRow,
    prefix: &str,
) -> StoreResult<VerificationRecord> {
    let col = |name: &str| format!("{}{}", prefix, name);

    let verdict: String = row.try_get(col("verdict").as_str())?;
    let verdict = Verdict::parse(&verdict).ok_or_else(|| StoreError::Decode {
        reason: format!("unknown verdict: {}", verdict),
    })?;

    let ids_json: String = row.try_get(col("nli_result_ids").as_str())?;
    let ids: Vec<String> = serde_json::from_str(&ids_json).map_err(|e| StoreError::Decode {
        reason: format!("nli_result_ids is not a JSON array: {}", e),
    })?;
    let nli_result_ids = ids
        .iter()
        .map(|s| {
            Uuid::parse_str(s).map_err(|e| StoreError::Decode {
                reason: format!("nli_result_ids contains a non-uuid: {}", e),
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;

    let count = |name: &str| -> StoreResult<u32> {
        let value: i64 = row.try_get(col(name).as_str())?;
        u32::try_from(value).map_err(|_| StoreError::Decode {
            reason: format!("{} is negative", name),
        })
    };

    Ok(VerificationRecord {
        id: parse_uuid(row, col("id").as_str())?,
        claim_id: parse_uuid(row, col("claim_id").as_str())?,
        verdict,
        confidence: row.try_get(col("confidence").as_str())?,
        support_score: row.try_get(col("support_score").as_str())?,
        refute_score: row.try_get(col("refute_score").as_str())?,
        neutral_score: row.try_get(col("neutral_score").as_str())?,
        evidence_count: count("evidence_count")?,
        supporting_evidence_count: count("supporting_evidence_count")?,
        refuting_evidence_count: count("refuting_evidence_count")?,
        neutral_evidence_count: count("neutral_evidence_count")?,
        reasoning: row.try_get(col("reasoning").as_str())?,
        nli_result_ids,
        pipeline_version: row.try_get(col("pipeline_version").as_str())?,
        retrieval_method: row.try_get(col("retrieval_method").as_str())?,
        created_at: row.try_get(col("created_at").as_str())?,
        updated_at: row.try_get(col("updated_at").as_str())?,
    })
}

fn verification_from_row(row: &SqliteRow) -> StoreResult<VerificationRecord> {
    verification_fields(row, "")
}

fn verification_from_prefixed_row(row: &SqliteRow) -> StoreResult<VerificationRecord> {
    verification_fields(row, "v_")
}
