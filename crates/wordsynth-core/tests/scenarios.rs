use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use wordsynth_core::{
    build_local_vocabulary, mix, Backend, BatchRequest, EmbeddingFormat, EmbeddingStore,
    RandomProjector, SearchSettings, ServiceState, SimilarityEngine,
};

fn royalty() -> EmbeddingStore {
    EmbeddingStore::from_pairs(vec![
        ("king", vec![1.0, 1.0, 0.0, 0.0]),
        ("queen", vec![1.0, 0.0, 1.0, 0.0]),
        ("man", vec![0.0, 1.0, 0.0, 0.2]),
        ("woman", vec![0.0, 0.0, 1.0, 0.2]),
        ("prince", vec![0.9, 1.0, 0.0, 0.1]),
        ("apple", vec![0.0, 0.0, 0.0, 1.0]),
    ])
    .unwrap()
}

fn exclude(words: &[&str]) -> HashSet<String> {
    words.iter().map(|w| w.to_string()).collect()
}

#[test]
fn king_minus_man_plus_woman_is_queen() {
    let store = Arc::new(royalty());
    let mixed = mix(&store, &[("king", 1.0), ("man", -1.0), ("woman", 1.0)]).unwrap();
    for backend in [Backend::Exact, Backend::LinearScan] {
        let engine = SimilarityEngine::build(Arc::clone(&store), backend);
        let res = engine.top_k(&mixed, 3, &exclude(&["king", "man", "woman"]));
        assert_eq!(res[0].word, "queen", "{backend:?}");
        assert!((res[0].score - 1.0).abs() < 1e-5);
    }
}

#[test]
fn backends_agree_on_top_one() {
    let store = Arc::new(royalty());
    let exact = SimilarityEngine::build(Arc::clone(&store), Backend::Exact);
    let scan = SimilarityEngine::build(store, Backend::LinearScan);
    for q in [[0.3, 0.9, 0.1, 0.0], [0.0, 0.1, 0.2, 0.9], [1.0, 0.0, 0.8, 0.0]] {
        let a = exact.top_k(&q, 1, &HashSet::new());
        let b = scan.top_k(&q, 1, &HashSet::new());
        assert_eq!(a[0].word, b[0].word);
        assert!((a[0].score - b[0].score).abs() < 1e-6);
    }
}

#[test]
fn top_k_never_returns_excluded_words() {
    let engine = SimilarityEngine::build(Arc::new(royalty()), Backend::Exact);
    let ex = exclude(&["queen", "prince"]);
    for k in 1..=6 {
        let res = engine.top_k(&[1.0, 0.5, 0.5, 0.0], k, &ex);
        assert!(res.iter().all(|n| !ex.contains(&n.word)));
        assert_eq!(res.len(), k.min(4));
    }
}

#[test]
fn local_vocabulary_keeps_anchors() {
    let engine = SimilarityEngine::build(Arc::new(royalty()), Backend::Exact);
    let v = build_local_vocabulary(&engine, &["apple", "king", "dragon"], 3);
    assert!(v.len() <= 3);
    assert!(v.contains(&"apple".to_string()));
    assert!(v.contains(&"king".to_string()));
}

fn animals() -> EmbeddingStore {
    let mut pairs = vec![("cat".to_string(), vec![1.0, 0.0, 0.0])];
    for i in 1..=15 {
        let t = i as f32 * 0.02;
        pairs.push((format!("feline{i}"), vec![1.0, t, 0.0]));
    }
    pairs.push(("dog".to_string(), vec![0.0, 0.2, 1.0]));
    EmbeddingStore::from_pairs(pairs).unwrap()
}

fn service() -> ServiceState {
    let settings = SearchSettings {
        neighborhood_size: 12,
        batch_size: 5,
        ..SearchSettings::default()
    };
    let state = ServiceState::new(settings, Backend::Exact, Box::new(RandomProjector::default()));
    state.install_store("animals", PathBuf::from("animals.txt"), animals());
    state
}

fn all_points(state: &ServiceState, req: &BatchRequest) -> Vec<wordsynth_core::Point> {
    let mut points = Vec::new();
    let mut i = 0;
    loop {
        let page = state
            .visualization_batch(&BatchRequest {
                batch_index: i,
                ..req.clone()
            })
            .unwrap();
        points.extend(page.points);
        if page.is_complete {
            break;
        }
        i += 1;
    }
    points
}

#[test]
fn must_include_changes_the_cache_entry() {
    let state = service();
    let plain = BatchRequest {
        anchor: "cat".into(),
        must_include: vec![],
        mix: None,
        batch_index: 0,
        batch_size: None,
    };
    let without = all_points(&state, &plain);
    assert!(!without.iter().any(|p| p.word == "dog"));
    assert_eq!(state.cache_info().entries, 1);

    let with_dog = BatchRequest {
        must_include: vec!["dog".into()],
        ..plain
    };
    let with = all_points(&state, &with_dog);
    assert_eq!(state.cache_info().entries, 2);
    let dog = with.iter().find(|p| p.word == "dog").unwrap();
    assert!(dog.is_neighbor);

    let anchor = &with[0];
    assert_eq!(anchor.word, "cat");
    assert_eq!((anchor.x, anchor.y, anchor.z), (0.0, 0.0, 0.0));
}

#[test]
fn batches_cover_the_layout_once() {
    let state = service();
    let req = BatchRequest {
        anchor: "feline3".into(),
        must_include: vec!["dog".into()],
        mix: None,
        batch_index: 0,
        batch_size: Some(4),
    };
    let points = all_points(&state, &req);
    let unique: HashSet<_> = points.iter().map(|p| p.word.clone()).collect();
    assert_eq!(unique.len(), points.len());
    let first = state.visualization_batch(&req).unwrap();
    assert_eq!(first.total_count, points.len());
    let past_end = state
        .visualization_batch(&BatchRequest {
            batch_index: first.total_batches + 3,
            ..req
        })
        .unwrap();
    assert!(past_end.points.is_empty());
    assert!(past_end.is_complete);
}

#[test]
fn load_glove_file_and_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny.txt");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "hot 1.0 0.0").unwrap();
    writeln!(f, "warm 0.8 0.2").unwrap();
    writeln!(f, "cold -1.0 0.0").unwrap();
    drop(f);

    let projector = Box::new(RandomProjector::default());
    let state = ServiceState::new(SearchSettings::default(), Backend::Exact, projector);
    let format = EmbeddingFormat::detect(&path, false);
    let info = state.load_model("tiny", &path, format).unwrap();
    assert_eq!(info.vocab_size, 3);
    assert_eq!(info.dimensions, 2);

    let mixed = state.mix(&[("hot", 1.0), ("cold", 0.5)]).unwrap().unwrap();
    let res = state.neighbors(&mixed, 1, &HashSet::new()).unwrap();
    assert_eq!(res[0].word, "hot");
    assert!(state.mix(&[("hot", 1.0), ("cold", 1.0)]).unwrap().is_none());
}
