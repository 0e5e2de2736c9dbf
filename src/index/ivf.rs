//! Inverted-file (IVF) approximate nearest-neighbor index.
//!
//! Vectors are clustered into `partitions` lists at build time; a query scans
//! only the `probes` closest lists. Both knobs trade recall for latency:
//! more partitions speed up queries but raise build cost, more probes raise
//! recall (roughly linearly in latency). All similarity is cosine; vectors
//! are normalized on ingest so cosine reduces to a dot product.

use uuid::Uuid;

use super::error::IndexError;
use super::params::IndexParams;

/// One corpus vector with its tenant scope.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub entity_id: Uuid,
    pub tenant_id: i64,
    pub vector: Vec<f32>,
}

/// A search match, ordered descending by similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entity_id: Uuid,
    pub similarity: f32,
}

/// Immutable IVF index snapshot. Built offline and swapped in atomically by
/// [`VectorIndexHandle`](super::VectorIndexHandle); never mutated after build.
pub struct IvfIndex {
    dim: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<IndexEntry>>,
    len: usize,
}

impl std::fmt::Debug for IvfIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvfIndex")
            .field("dim", &self.dim)
            .field("partitions", &self.centroids.len())
            .field("len", &self.len)
            .finish()
    }
}

const KMEANS_ITERATIONS: usize = 10;
const KMEANS_SEED: u64 = 0x5eed_c1a1;

impl IvfIndex {
    /// Builds an index over `entries` with `partitions` k-means clusters.
    ///
    /// The effective partition count is capped at the corpus size. Every
    /// entry must match `dim`; a mismatch fails the whole build.
    pub fn build(
        dim: usize,
        partitions: usize,
        mut entries: Vec<IndexEntry>,
    ) -> Result<Self, IndexError> {
        if dim == 0 {
            return Err(IndexError::InvalidParams {
                reason: "dimension cannot be zero".to_string(),
            });
        }
        if partitions == 0 {
            return Err(IndexError::InvalidParams {
                reason: "partition count cannot be zero".to_string(),
            });
        }

        for entry in &mut entries {
            if entry.vector.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: entry.vector.len(),
                });
            }
            normalize(&mut entry.vector);
        }

        if entries.is_empty() {
            return Ok(Self {
                dim,
                centroids: vec![],
                lists: vec![],
                len: 0,
            });
        }

        let k = partitions.min(entries.len());
        let centroids = kmeans(dim, k, &entries);

        let mut lists: Vec<Vec<IndexEntry>> = (0..k).map(|_| Vec::new()).collect();
        let len = entries.len();
        for entry in entries {
            let list = nearest_centroid(&centroids, &entry.vector);
            lists[list].push(entry);
        }

        Ok(Self {
            dim,
            centroids,
            lists,
            len,
        })
    }

    /// Searches the `probes` closest partitions for the `top_k` most similar
    /// vectors, descending, filtered by tenant and minimum similarity.
    ///
    /// A malformed query fails fast; an empty index returns an empty list.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        tenant_id: i64,
        min_similarity: f32,
        probes: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if self.len == 0 || top_k == 0 {
            return Ok(vec![]);
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        // Rank partitions by centroid similarity, keep the closest `probes`.
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dot(c, &query)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(probes.max(1));

        let mut hits: Vec<SearchHit> = ranked
            .iter()
            .flat_map(|&(list, _)| self.lists[list].iter())
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| SearchHit {
                entity_id: entry.entity_id,
                similarity: dot(&entry.vector, &query),
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn partitions(&self) -> usize {
        self.centroids.len()
    }

    /// Convenience constructor using [`IndexParams::recommended`] for the
    /// corpus size at hand.
    pub fn build_recommended(dim: usize, entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        let params = IndexParams::recommended(entries.len());
        Self::build(dim, params.partitions, entries)
    }
}

/// Lloyd's k-means over normalized vectors, deterministic seeding.
fn kmeans(dim: usize, k: usize, entries: &[IndexEntry]) -> Vec<Vec<f32>> {
    // Deterministic LCG for reproducible builds (no RNG dependency).
    let mut state = KMEANS_SEED ^ (entries.len() as u64);
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        state
    };

    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let mut chosen = std::collections::HashSet::new();
    while centroids.len() < k {
        let idx = (next() % entries.len() as u64) as usize;
        if chosen.insert(idx) {
            centroids.push(entries[idx].vector.clone());
        }
    }

    let mut assignment = vec![0usize; entries.len()];
    for _ in 0..KMEANS_ITERATIONS {
        let mut moved = false;
        for (i, entry) in entries.iter().enumerate() {
            let best = nearest_centroid(&centroids, &entry.vector);
            if assignment[i] != best {
                assignment[i] = best;
                moved = true;
            }
        }

        let mut sums = vec![vec![0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (entry, &list) in entries.iter().zip(&assignment) {
            counts[list] += 1;
            for (s, v) in sums[list].iter_mut().zip(&entry.vector) {
                *s += v;
            }
        }
        for (list, sum) in sums.into_iter().enumerate() {
            if counts[list] == 0 {
                // Re-seed empty clusters from an arbitrary entry.
                let idx = (next() % entries.len() as u64) as usize;
                centroids[list] = entries[idx].vector.clone();
                continue;
            }
            let mut centroid = sum;
            for v in &mut centroid {
                *v /= counts[list] as f32;
            }
            normalize(&mut centroid);
            centroids[list] = centroid;
        }

        if !moved {
            break;
        }
    }

    centroids
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_sim = f32::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let sim = dot(centroid, vector);
        if sim > best_sim {
            best_sim = sim;
            best = i;
        }
    }
    best
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
