use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::error::IndexError;
use super::ivf::{IndexEntry, IvfIndex, SearchHit};
use super::params::IndexParams;

/// Shared, swap-on-rebuild handle over the current [`IvfIndex`].
///
/// Reads take a cheap clone of the current snapshot; rebuilds happen entirely
/// off-lock and then swap the snapshot atomically, so concurrent searches
/// never block on a build. Partition boundaries go stale as the corpus grows,
/// so the handle tracks appends since the last build and reports
/// [`needs_rebuild`](Self::needs_rebuild) once growth crosses the configured
/// fraction (default 30%).
pub struct VectorIndexHandle {
    dim: usize,
    params: RwLock<IndexParams>,
    current: RwLock<Option<Arc<IvfIndex>>>,
    appended_since_build: AtomicUsize,
    rebuild_growth_fraction: f32,
}

impl VectorIndexHandle {
    pub fn new(dim: usize, params: IndexParams, rebuild_growth_fraction: f32) -> Self {
        Self {
            dim,
            params: RwLock::new(params),
            current: RwLock::new(None),
            appended_since_build: AtomicUsize::new(0),
            rebuild_growth_fraction,
        }
    }

    /// Searches the current snapshot.
    ///
    /// A malformed query fails fast with a dimension mismatch even when no
    /// index exists; a missing/empty index otherwise yields an empty list.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        tenant_id: i64,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let snapshot = self.current.read().clone();
        match snapshot {
            Some(index) => {
                let probes = self.params.read().probes;
                index.search(query, top_k, tenant_id, min_similarity, probes)
            }
            None => {
                debug!("Search against missing index, returning empty result");
                Ok(vec![])
            }
        }
    }

    /// Builds a fresh index over `entries` and swaps it in.
    pub fn rebuild(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let corpus_size = entries.len();
        let params = *self.params.read();

        // Build off-lock; only the pointer swap holds the write lock.
        let index = Arc::new(IvfIndex::build(self.dim, params.partitions, entries)?);

        info!(
            corpus_size,
            partitions = index.partitions(),
            probes = params.probes,
            "Vector index rebuilt"
        );

        *self.current.write() = Some(index);
        self.appended_since_build.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Records `n` corpus vectors appended since the last build.
    pub fn record_appended(&self, n: usize) {
        self.appended_since_build.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns `true` when the corpus has grown enough that partition
    /// boundaries are stale and recall is degrading.
    pub fn needs_rebuild(&self) -> bool {
        let appended = self.appended_since_build.load(Ordering::Relaxed);
        match self.indexed_len() {
            0 => appended > 0,
            indexed => appended as f32 > self.rebuild_growth_fraction * indexed as f32,
        }
    }

    /// Vectors in the current snapshot (0 when no index has been built).
    pub fn indexed_len(&self) -> usize {
        self.current.read().as_ref().map_or(0, |i| i.len())
    }

    /// Replaces the tuning parameters; takes effect on the next query
    /// (probes) and next rebuild (partitions).
    pub fn set_params(&self, params: IndexParams) {
        *self.params.write() = params;
    }

    pub fn params(&self) -> IndexParams {
        *self.params.read()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl std::fmt::Debug for VectorIndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndexHandle")
            .field("dim", &self.dim)
            .field("indexed_len", &self.indexed_len())
            .field(
                "appended_since_build",
                &self.appended_since_build.load(Ordering::Relaxed),
            )
            .finish()
    }
}
