use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use vibecheck::vector::{
    BuildParams, Compression, ExternalId, Index, IndexBuilder, IndexMeta, InvertedList, Metric,
    Payload, SearchEngine, SearchParams, VectorError, VectorStore, FORMAT_VERSION,
};

fn random_store(rows: usize, dim: usize, seed: u64) -> VectorStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = VectorStore::with_dimension(dim);
    for row in 0..rows {
        let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        store.add(&v, format!("song-{row}")).unwrap();
    }
    store
}

fn build(store: &VectorStore, clusters: usize, metric: Metric, compression: Compression) -> Index {
    IndexBuilder::new(BuildParams {
        clusters,
        max_iterations: 20,
        seed: 17,
        metric,
        compression,
    })
    .run(store)
    .unwrap()
}

fn engine(index: Index) -> SearchEngine {
    SearchEngine::new(Arc::new(index))
}

/// Exact top-k rows, ordered the same way the index orders ties.
fn brute_force(store: &VectorStore, metric: Metric, query: &[f32], k: usize) -> Vec<usize> {
    let q = metric.prepare(query);
    let mut scored: Vec<(f32, usize)> = store
        .iter()
        .map(|(row, _, v)| (metric.distance(&q, &metric.prepare(v)), row))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, row)| row).collect()
}

#[test]
fn two_obvious_clusters_single_probe() {
    let mut store = VectorStore::new();
    let rows = [
        ("a0", [0.0f32, 0.0]),
        ("a1", [0.2, 0.1]),
        ("a2", [0.1, 0.3]),
        ("b0", [10.0, 10.0]),
        ("b1", [10.2, 9.9]),
        ("b2", [9.8, 10.1]),
    ];
    for (id, v) in &rows {
        store.add(v, *id).unwrap();
    }
    let index = build(&store, 2, Metric::L2, Compression::None);
    let mut sizes = index.list_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![3, 3]);

    let hits = engine(index).search(&[0.1, 0.1], 1, 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, ExternalId::from("a1"));
    assert!((hits[0].distance - 0.01).abs() < 1e-6);
}

#[test]
fn results_are_bounded_sorted_and_unique() {
    let store = random_store(600, 16, 1);
    let engine = engine(build(&store, 12, Metric::L2, Compression::None));
    let mut rng = StdRng::seed_from_u64(2);
    for k in [1usize, 5, 10, 50] {
        for nprobe in [1usize, 3, 12] {
            let query: Vec<f32> = (0..16).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            let params = SearchParams {
                k,
                num_probes: nprobe,
                timeout: None,
            };
            let outcome = engine.search_with(&query, &params).unwrap();
            let hits = &outcome.neighbors;
            assert!(hits.len() <= k);
            assert_eq!(hits.len(), k.min(outcome.scanned));
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
            let ids: HashSet<&ExternalId> = hits.iter().map(|h| &h.id).collect();
            assert_eq!(ids.len(), hits.len(), "k={k} nprobe={nprobe}");
        }
    }
}

#[test]
fn recall_never_drops_as_probes_grow() {
    let store = random_store(800, 8, 3);
    let clusters = 16;
    let engine = engine(build(&store, clusters, Metric::L2, Compression::None));
    let mut rng = StdRng::seed_from_u64(4);
    let k = 10;
    for _ in 0..20 {
        let query: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        let truth: HashSet<usize> = brute_force(&store, Metric::L2, &query, k)
            .into_iter()
            .collect();
        let mut last = 0usize;
        for nprobe in 1..=clusters {
            let hits = engine.search(&query, k, nprobe).unwrap();
            let found = hits.iter().filter(|h| truth.contains(&h.row)).count();
            assert!(found >= last, "nprobe={nprobe} found={found} last={last}");
            last = found;
        }
        assert_eq!(last, k);
    }
}

#[test]
fn exhaustive_probe_matches_brute_force() {
    for metric in [Metric::L2, Metric::InnerProduct, Metric::Cosine] {
        let store = random_store(300, 12, 5);
        let engine = engine(build(&store, 8, metric, Compression::None));
        let query: Vec<f32> = (0..12).map(|i| (i as f32 * 0.37).sin()).collect();
        let rows: Vec<usize> = engine
            .search_exact(&query, 7)
            .unwrap()
            .iter()
            .map(|h| h.row)
            .collect();
        assert_eq!(rows, brute_force(&store, metric, &query, 7), "{metric:?}");
    }
}

#[test]
fn inner_product_prefers_magnitude_cosine_does_not() {
    let mut store = VectorStore::new();
    store.add(&[1.0, 0.0], "aligned").unwrap();
    store.add(&[4.0, 3.0], "long").unwrap();
    store.add(&[-1.0, 0.5], "opposed").unwrap();
    let query = [1.0, 0.0];

    let ip = engine(build(&store, 1, Metric::InnerProduct, Compression::None));
    let hits = ip.search(&query, 3, 1).unwrap();
    assert_eq!(hits[0].id, ExternalId::from("long"));
    assert_eq!(Metric::InnerProduct.score(hits[0].distance), 4.0);

    let cos = engine(build(&store, 1, Metric::Cosine, Compression::None));
    let hits = cos.search(&query, 3, 1).unwrap();
    assert_eq!(hits[0].id, ExternalId::from("aligned"));
    assert!((Metric::Cosine.score(hits[0].distance) - 1.0).abs() < 1e-6);
    assert_eq!(hits[2].id, ExternalId::from("opposed"));
}

#[test]
fn zero_k_returns_nothing_after_dimension_check() {
    let store = random_store(20, 4, 6);
    let engine = engine(build(&store, 2, Metric::L2, Compression::None));
    assert!(engine.search(&[0.0; 4], 0, 2).unwrap().is_empty());
    let err = engine.search(&[0.0; 3], 0, 2).unwrap_err();
    assert!(matches!(
        err,
        VectorError::DimensionMismatch {
            expected: 4,
            actual: 3
        }
    ));
}

#[test]
fn non_finite_queries_are_rejected() {
    let store = random_store(30, 2, 12);
    let engine = engine(build(&store, 2, Metric::L2, Compression::None));
    for bad in [
        [f32::NAN, 0.0],
        [0.0, f32::INFINITY],
        [f32::NEG_INFINITY, 1.0],
    ] {
        let err = engine.search(&bad, 2, 2).unwrap_err();
        assert!(matches!(err, VectorError::InvalidVector { .. }), "{err}");
    }
    // Dimension is still checked first.
    assert!(matches!(
        engine.search(&[f32::NAN], 2, 2).unwrap_err(),
        VectorError::DimensionMismatch { .. }
    ));
    let results = engine.search_batch(
        &[vec![f32::NAN, 0.0], vec![0.1, 0.2]],
        &SearchParams {
            k: 2,
            num_probes: 2,
            timeout: None,
        },
    );
    assert!(matches!(results[0], Err(VectorError::InvalidVector { .. })));
    assert_eq!(results[1].as_ref().unwrap().neighbors.len(), 2);
}

#[test]
fn repeated_ids_never_reach_results() {
    let mut store = VectorStore::new();
    store.add(&[0.0, 0.0], "track-x").unwrap();
    assert!(matches!(
        store.add(&[0.1, 0.0], "track-x"),
        Err(VectorError::DuplicateId(_))
    ));
    store.add(&[0.0, 0.1], "track-y").unwrap();
    let engine = engine(build(&store, 1, Metric::L2, Compression::None));
    let hits = engine.search(&[0.0, 0.0], 3, 1).unwrap();
    let ids: Vec<String> = hits.iter().map(|h| h.id.to_string()).collect();
    assert_eq!(ids, vec!["track-x", "track-y"]);
}

#[test]
fn single_vector_index_returns_one_hit() {
    let mut store = VectorStore::new();
    store.add(&[0.5, 0.5, 0.5], 42u64).unwrap();
    let engine = engine(build(&store, 1, Metric::L2, Compression::None));
    let hits = engine.search(&[0.0, 0.0, 0.0], 5, 4).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, ExternalId::Int(42));
    assert_eq!(hits[0].row, 0);
}

#[test]
fn probe_count_is_clamped() {
    let store = random_store(200, 6, 7);
    let engine = engine(build(&store, 5, Metric::L2, Compression::None));
    let query = vec![0.1; 6];
    let run = |num_probes| {
        engine
            .search_with(
                &query,
                &SearchParams {
                    k: 10,
                    num_probes,
                    timeout: None,
                },
            )
            .unwrap()
    };
    assert_eq!(run(0).probed, 1);
    assert_eq!(run(0).neighbors, run(1).neighbors);
    let wide = run(1_000);
    assert_eq!(wide.probed, 5);
    assert_eq!(wide.scanned, 200);
    assert_eq!(wide.neighbors, run(5).neighbors);
}

#[test]
fn empty_index_is_reported_after_dimension_check() {
    let index = Index::from_parts(
        IndexMeta {
            version: FORMAT_VERSION,
            dim: 2,
            metric: Metric::L2,
            clusters: 1,
            vector_count: 0,
            compression: Compression::None,
        },
        vec![vec![0.0, 0.0]],
        vec![InvertedList::default()],
        Vec::new(),
        Payload::Flat(Vec::new()),
    )
    .unwrap();
    let engine = engine(index);
    assert!(matches!(
        engine.search(&[1.0, 2.0], 3, 1).unwrap_err(),
        VectorError::EmptyIndex
    ));
    assert!(matches!(
        engine.search(&[1.0], 3, 1).unwrap_err(),
        VectorError::DimensionMismatch { .. }
    ));
}

#[test]
fn residual_q8_still_finds_the_stored_vector() {
    let store = random_store(200, 8, 8);
    let index = build(&store, 8, Metric::L2, Compression::ResidualQ8);
    assert_eq!(index.compression(), Compression::ResidualQ8);
    let engine = engine(index);
    for row in [0usize, 17, 99, 199] {
        let query = store.get(row).unwrap().to_vec();
        let hits = engine.search_exact(&query, 3).unwrap();
        assert_eq!(hits[0].row, row);
        assert!(hits[0].distance < 1e-2, "distance={}", hits[0].distance);
    }
}

#[test]
fn expired_deadline_returns_flagged_partial_result() {
    let store = random_store(100, 4, 9);
    let engine = engine(build(&store, 4, Metric::L2, Compression::None));
    let outcome = engine
        .search_with(
            &[0.0; 4],
            &SearchParams {
                k: 5,
                num_probes: 4,
                timeout: Some(Duration::ZERO),
            },
        )
        .unwrap();
    assert!(outcome.timed_out);
    assert!(outcome.neighbors.len() <= 5);
    assert_eq!(outcome.probed, 0);

    let relaxed = engine
        .search_with(
            &[0.0; 4],
            &SearchParams {
                k: 5,
                num_probes: 4,
                timeout: Some(Duration::from_secs(60)),
            },
        )
        .unwrap();
    assert!(!relaxed.timed_out);
    assert_eq!(relaxed.neighbors.len(), 5);
}

#[test]
fn batch_search_keeps_order_and_isolates_errors() {
    let store = random_store(150, 5, 10);
    let engine = engine(build(&store, 6, Metric::Cosine, Compression::None));
    let queries = vec![
        store.get(3).unwrap().to_vec(),
        vec![1.0; 4],
        store.get(77).unwrap().to_vec(),
    ];
    let params = SearchParams {
        k: 4,
        num_probes: 2,
        timeout: None,
    };
    let results = engine.search_batch(&queries, &params);
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].as_ref().unwrap(),
        &engine.search_with(&queries[0], &params).unwrap()
    );
    assert!(matches!(
        results[1],
        Err(VectorError::DimensionMismatch { .. })
    ));
    assert_eq!(results[2].as_ref().unwrap().neighbors[0].row, 77);
}

#[test]
fn builds_are_deterministic_for_a_seed() {
    let store = random_store(400, 10, 11);
    let a = build(&store, 10, Metric::Cosine, Compression::ResidualQ8);
    let b = build(&store, 10, Metric::Cosine, Compression::ResidualQ8);
    assert_eq!(a, b);
}
