use std::io::Cursor;
use vibecheck::config::Config;
use vibecheck::engine::Engine;
use vibecheck::vector::{persist, ExternalId, IndexBuilder, Metric, VectorError, VectorStore};

const SONGS: &str = r#"
{"id": "4uLU6hMCjMI75M1A2tKUQC", "vector": [0.9, 0.1, 0.0]}
{"id": "7ouMYWpwJ422jRcDASZB7P", "vector": [0.8, 0.2, 0.1]}

{"id": 3, "vector": [0.0, 0.1, 0.95]}
{"id": 4, "vector": [0.1, 0.0, 0.9]}
{"id": "0VjIjW4GlUZAMYd2vXMi3b", "vector": [0.05, 0.95, 0.1]}
{"id": "2takcwOaAZWiXQijPHIx7B", "vector": [0.1, 0.9, 0.0]}
"#;

#[test]
fn jsonl_to_engine_round_trip() {
    let store = VectorStore::from_jsonl(Cursor::new(SONGS)).unwrap();
    assert_eq!(store.size(), 6);
    assert_eq!(store.dimension(), 3);
    assert_eq!(store.id(2), Some(&ExternalId::Int(3)));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("songs.vibx");
    let config = Config {
        index_path: Some(path.clone()),
        clusters: 3,
        metric: Metric::Cosine,
        nprobe: 3,
        top_k: 2,
        ..Config::default()
    };
    let index = IndexBuilder::new(config.build_params()).run(&store).unwrap();
    assert_eq!(index.cluster_count(), 3);
    persist::save(&index, &path).unwrap();

    let engine = Engine::open(config).unwrap();
    let outcome = engine.search(&[0.0, 0.2, 1.0]).unwrap();
    let ids: Vec<String> = outcome.neighbors.iter().map(|n| n.id.to_string()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"3".to_string()) && ids.contains(&"4".to_string()), "{ids:?}");
}

#[test]
fn jsonl_errors_name_the_line() {
    let input = "{\"id\": 1, \"vector\": [1.0, 2.0]}\n{\"id\": 2, \"vector\": [1.0]}\n";
    let err = VectorStore::from_jsonl(Cursor::new(input)).unwrap_err();
    assert!(format!("{err:#}").contains("line 2"), "{err:#}");
    let cause = err.downcast_ref::<VectorError>();
    assert!(matches!(
        cause,
        Some(VectorError::DimensionMismatch {
            expected: 2,
            actual: 1
        })
    ));
}

#[test]
fn more_clusters_than_songs_is_rejected() {
    let store = VectorStore::from_jsonl(Cursor::new(SONGS)).unwrap();
    let config = Config {
        clusters: 7,
        ..Config::default()
    };
    let err = IndexBuilder::new(config.build_params())
        .run(&store)
        .unwrap_err();
    assert!(matches!(
        err,
        VectorError::InsufficientData {
            clusters: 7,
            vectors: 6
        }
    ));
}
