use docsync::graph::Graph;
use docsync::knowledge::index::VectorIndex;
use docsync::knowledge::{embedder::MockEmbedder, Engine, IndexingOptions};
use docsync::model::{Symbol, SymbolMetadata};
use docsync::store::Store;
use docsync::util::CancelToken;

fn symbol(id: &str, name: &str, file: &str) -> Symbol {
    Symbol {
        id: id.into(),
        file_path: file.into(),
        start_line: 1,
        end_line: 10,
        language: "go".into(),
        package: "pkg".into(),
        kind: "function".into(),
        name: name.into(),
        doc: format!("{name} documented."),
        body: format!("func {name}() {{}}"),
        content_hash: "h".into(),
        role: "Logic".into(),
        metadata: SymbolMetadata {
            signature: format!("func {name}()"),
            receiver: String::new(),
        },
        candidates: Vec::new(),
    }
}

#[test]
fn incremental_indexing_respects_per_run_budget() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("docsync.db")).unwrap();

    let mut graph = Graph::new();
    graph.add_symbol(symbol("ga", "Alpha", "a.go"));
    graph.add_symbol(symbol("gb", "Beta", "b.go"));
    store.save_graph(&graph).unwrap();

    let mut engine = Engine::new(
        &graph,
        Some(Box::new(MockEmbedder::new(8))),
        Box::new(store),
    );
    let cancel = CancelToken::new();

    let added = engine
        .index_incremental(
            &["a.go".to_string(), "b.go".to_string()],
            &[],
            IndexingOptions {
                max_chunks_per_run: 1,
            },
            &cancel,
        )
        .unwrap();

    assert_eq!(added, 1, "budget of one admits exactly one vector item");
    assert_eq!(engine.index().list_chunk_ids().unwrap().len(), 1);
}

#[test]
fn unchanged_chunks_are_not_re_embedded() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("docsync.db")).unwrap();

    let mut graph = Graph::new();
    graph.add_symbol(symbol("ga", "Alpha", "a.go"));
    store.save_graph(&graph).unwrap();

    let mut engine = Engine::new(
        &graph,
        Some(Box::new(MockEmbedder::new(8))),
        Box::new(store),
    );
    let cancel = CancelToken::new();
    let first = engine.index_all(&cancel).unwrap();
    assert!(first > 0);
    let second = engine.index_all(&cancel).unwrap();
    assert_eq!(second, 0, "second full pass should skip unchanged chunks");
}

#[test]
fn updated_file_chunks_replace_stale_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("docsync.db")).unwrap();

    let mut graph = Graph::new();
    graph.add_symbol(symbol("ga", "Alpha", "a.go"));
    store.save_graph(&graph).unwrap();

    let mut engine = Engine::new(
        &graph,
        Some(Box::new(MockEmbedder::new(8))),
        Box::new(store),
    );
    let cancel = CancelToken::new();
    engine.index_all(&cancel).unwrap();
    let before = engine.index().list_chunk_ids().unwrap();
    assert!(before.contains(&"a.go".to_string()));

    engine
        .index_incremental(
            &["a.go".to_string()],
            &[],
            IndexingOptions {
                max_chunks_per_run: 10,
            },
            &cancel,
        )
        .unwrap();

    // The file-ID chunk was deleted and re-created; nothing stale remains.
    let after = engine.index().list_chunk_ids().unwrap();
    assert_eq!(before, after);
}
