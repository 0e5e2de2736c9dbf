use uuid::Uuid;

use super::*;

fn entry(tenant_id: i64, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
        entity_id: Uuid::new_v4(),
        tenant_id,
        vector,
    }
}

/// Deterministic pseudo-random unit-ish vector.
fn seeded_vector(dim: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(1);
    (0..dim)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 32) as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

#[test]
fn empty_index_returns_empty_results() {
    let index = IvfIndex::build(4, 8, vec![]).unwrap();
    assert!(index.is_empty());
    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 5, 0, 0.0, 4).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn dimension_mismatch_fails_fast() {
    let index = IvfIndex::build(4, 8, vec![entry(0, vec![1.0, 0.0, 0.0, 0.0])]).unwrap();
    let result = index.search(&[1.0, 0.0], 5, 0, 0.0, 4);
    assert!(matches!(
        result,
        Err(IndexError::DimensionMismatch {
            expected: 4,
            actual: 2
        })
    ));
}

#[test]
fn build_rejects_mismatched_entry() {
    let result = IvfIndex::build(4, 8, vec![entry(0, vec![1.0, 0.0])]);
    assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
}

#[test]
fn search_orders_by_similarity_descending() {
    let entries = vec![
        entry(0, vec![1.0, 0.0, 0.0, 0.0]),
        entry(0, vec![0.9, 0.1, 0.0, 0.0]),
        entry(0, vec![0.0, 1.0, 0.0, 0.0]),
        entry(0, vec![0.0, 0.0, 1.0, 0.0]),
    ];
    let index = IvfIndex::build(4, 2, entries).unwrap();

    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 10, 0, -1.0, 2).unwrap();
    assert!(!hits.is_empty());
    for pair in hits.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);
}

#[test]
fn min_similarity_filters_results() {
    let entries = vec![
        entry(0, vec![1.0, 0.0, 0.0, 0.0]),
        entry(0, vec![0.0, 1.0, 0.0, 0.0]),
    ];
    let index = IvfIndex::build(4, 1, entries).unwrap();

    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 10, 0, 0.5, 1).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn tenant_filter_excludes_other_tenants() {
    let entries = vec![
        entry(1, vec![1.0, 0.0, 0.0, 0.0]),
        entry(2, vec![1.0, 0.0, 0.0, 0.0]),
    ];
    let index = IvfIndex::build(4, 1, entries).unwrap();

    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 10, 1, 0.0, 1).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn known_nearest_is_top_one_in_large_corpus() {
    let dim = 32;
    let mut entries: Vec<IndexEntry> = (0..1000)
        .map(|i| entry(0, seeded_vector(dim, i)))
        .collect();

    // A known target plus a query very close to it.
    let target = seeded_vector(dim, 424242);
    let target_id = Uuid::new_v4();
    entries.push(IndexEntry {
        entity_id: target_id,
        tenant_id: 0,
        vector: target.clone(),
    });

    let mut query = target.clone();
    query[0] += 0.01;

    let params = IndexParams::recommended(entries.len());
    let index = IvfIndex::build(dim, params.partitions, entries).unwrap();
    let hits = index
        .search(&query, 1, 0, 0.9, params.probes)
        .unwrap();

    assert_eq!(hits.len(), 1, "expected the known neighbor in top-1");
    assert_eq!(hits[0].entity_id, target_id);
    assert!(hits[0].similarity > 0.99);
}

#[test]
fn more_probes_never_reduce_recall() {
    let dim = 16;
    let entries: Vec<IndexEntry> = (0..500)
        .map(|i| entry(0, seeded_vector(dim, i)))
        .collect();
    let query = seeded_vector(dim, 77);

    let index = IvfIndex::build(dim, 50, entries).unwrap();
    let few = index.search(&query, 10, 0, -1.0, 2).unwrap();
    let many = index.search(&query, 10, 0, -1.0, 50).unwrap();

    assert!(many.len() >= few.len());
    if let (Some(few_top), Some(many_top)) = (few.first(), many.first()) {
        assert!(many_top.similarity >= few_top.similarity);
    }
}

#[test]
fn handle_search_without_index_is_empty_not_error() {
    let handle = VectorIndexHandle::new(4, IndexParams::default(), 0.3);
    let hits = handle.search(&[1.0, 0.0, 0.0, 0.0], 5, 0, 0.0).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn handle_validates_query_dim_even_without_index() {
    let handle = VectorIndexHandle::new(4, IndexParams::default(), 0.3);
    assert!(matches!(
        handle.search(&[1.0], 5, 0, 0.0),
        Err(IndexError::DimensionMismatch { .. })
    ));
}

#[test]
fn handle_rebuild_swaps_in_new_snapshot() {
    let handle = VectorIndexHandle::new(4, IndexParams::default(), 0.3);
    assert_eq!(handle.indexed_len(), 0);

    handle
        .rebuild(vec![entry(0, vec![1.0, 0.0, 0.0, 0.0])])
        .unwrap();
    assert_eq!(handle.indexed_len(), 1);

    let hits = handle.search(&[1.0, 0.0, 0.0, 0.0], 5, 0, 0.5).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn rebuild_policy_triggers_past_growth_fraction() {
    let handle = VectorIndexHandle::new(4, IndexParams::default(), 0.3);

    // No index yet: any pending vector warrants a build.
    assert!(!handle.needs_rebuild());
    handle.record_appended(1);
    assert!(handle.needs_rebuild());

    let entries: Vec<IndexEntry> = (0..10)
        .map(|i| entry(0, seeded_vector(4, i)))
        .collect();
    handle.rebuild(entries).unwrap();
    assert!(!handle.needs_rebuild());

    // 30% growth threshold: 3 appends is within, 4 is past.
    handle.record_appended(3);
    assert!(!handle.needs_rebuild());
    handle.record_appended(1);
    assert!(handle.needs_rebuild());
}
