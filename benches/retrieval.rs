use criterion::{black_box, criterion_group, criterion_main, Criterion};
use docsync::graph::Graph;
use docsync::model::{ChangedFile, Edge, Evidence, RelationKind, Symbol, SymbolMetadata};
use docsync::retrieval::{extract_from_changes, RetrievalConfig};

fn synthetic_graph(symbols: usize) -> Graph {
    let mut graph = Graph::new();
    for i in 0..symbols {
        graph.add_symbol(Symbol {
            id: format!("sym-{i}"),
            file_path: format!("file-{}.go", i / 8),
            start_line: (i as i64 % 8) * 20 + 1,
            end_line: (i as i64 % 8) * 20 + 18,
            language: "go".into(),
            package: format!("pkg{}", i / 64),
            kind: "function".into(),
            name: format!("Fn{i}"),
            doc: String::new(),
            body: String::new(),
            content_hash: String::new(),
            role: String::new(),
            metadata: SymbolMetadata::default(),
            candidates: Vec::new(),
        });
    }
    // Ring plus skip edges give every node a realistic fan-out.
    for i in 0..symbols {
        for offset in [1usize, 7, 31] {
            let j = (i + offset) % symbols;
            graph.edges.push(Edge {
                from_id: format!("sym-{i}"),
                to_id: format!("sym-{j}"),
                kind: RelationKind::Calls,
                resolver: "heuristic".into(),
                confidence: 0.7,
                evidence: Evidence::default(),
            });
        }
    }
    graph
}

fn bench_subgraph_extraction(c: &mut Criterion) {
    let graph = synthetic_graph(2048);
    let changes = vec![ChangedFile {
        path: "file-0.go".into(),
        changed_lines: vec![5, 25],
    }];

    c.bench_function("subgraph_two_hops_2048_nodes", |b| {
        let cfg = RetrievalConfig {
            max_hops: 2,
            ..RetrievalConfig::default()
        };
        b.iter(|| {
            let subgraph = extract_from_changes(black_box(&graph), black_box(&changes), &cfg);
            black_box(subgraph.node_ids.len())
        })
    });

    c.bench_function("subgraph_filtered_2048_nodes", |b| {
        let cfg = RetrievalConfig {
            max_hops: 3,
            min_confidence: 0.8,
            ..RetrievalConfig::default()
        };
        b.iter(|| {
            let subgraph = extract_from_changes(black_box(&graph), black_box(&changes), &cfg);
            black_box(subgraph.edges.len())
        })
    });
}

criterion_group!(benches, bench_subgraph_extraction);
criterion_main!(benches);
