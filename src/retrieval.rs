use crate::graph::Graph;
use crate::model::{ChangedFile, Edge, RelationKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Controls how impact subgraphs are extracted.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub max_hops: i64,
    pub min_confidence: f64,
    /// Empty set means all kinds pass the filter.
    pub allowed_kinds: HashSet<RelationKind>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_hops: 2,
            min_confidence: 0.0,
            allowed_kinds: HashSet::new(),
        }
    }
}

/// Bounded-hop, confidence-weighted neighborhood of the changed code. All
/// collections are stable-sorted so identical inputs produce identical
/// output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Subgraph {
    pub max_hops: i64,
    pub seed_ids: Vec<String>,
    pub updated_files: Vec<String>,
    pub node_ids: Vec<String>,
    pub node_scores: BTreeMap<String, f64>,
    pub edges: Vec<Edge>,
}

/// Extract the impact subgraph for a set of changed regions.
///
/// Seeds are symbols whose line range contains a changed line; a file with
/// no recorded lines seeds every symbol it contains. Traversal is an
/// undirected BFS over edges passing the confidence/kind filters; node score
/// is multiplicative along the best path from any seed.
pub fn extract_from_changes(
    graph: &Graph,
    changes: &[ChangedFile],
    cfg: &RetrievalConfig,
) -> Subgraph {
    let max_hops = cfg.max_hops.max(0);
    let seed_ids = find_seed_ids(graph, changes);
    let updated_files = changed_file_paths(changes);

    if seed_ids.is_empty() {
        return Subgraph {
            max_hops,
            seed_ids,
            updated_files,
            ..Subgraph::default()
        };
    }

    // Undirected adjacency over the filtered edge set.
    let mut adjacency: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in &graph.edges {
        if !edge_allowed(edge, cfg) {
            continue;
        }
        adjacency.entry(&edge.from_id).or_default().push(edge);
        adjacency.entry(&edge.to_id).or_default().push(edge);
    }

    let mut visited_depth: HashMap<String, i64> = HashMap::new();
    let mut node_scores: BTreeMap<String, f64> = BTreeMap::new();
    let mut queue: VecDeque<(String, i64)> = VecDeque::new();
    for id in &seed_ids {
        visited_depth.insert(id.clone(), 0);
        node_scores.insert(id.clone(), 1.0);
        queue.push_back((id.clone(), 0));
    }

    let mut edge_seen: HashSet<(String, String, &'static str)> = HashSet::new();
    let mut edges: Vec<Edge> = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_hops {
            continue;
        }
        let Some(neighbors) = adjacency.get(current.as_str()) else {
            continue;
        };
        for edge in neighbors {
            let key = (edge.from_id.clone(), edge.to_id.clone(), edge.kind.as_str());
            if edge_seen.insert(key) {
                edges.push((*edge).clone());
            }

            let next = if edge.from_id == current {
                edge.to_id.clone()
            } else {
                edge.from_id.clone()
            };
            let next_depth = depth + 1;
            let candidate_score =
                node_scores.get(&current).copied().unwrap_or(0.0) * normalized_confidence(edge.confidence);
            let best = node_scores.entry(next.clone()).or_insert(0.0);
            if candidate_score > *best {
                *best = candidate_score;
            }
            match visited_depth.get(&next) {
                Some(prev) if *prev <= next_depth => {}
                _ => {
                    visited_depth.insert(next.clone(), next_depth);
                    queue.push_back((next, next_depth));
                }
            }
        }
    }

    let mut node_ids: Vec<String> = visited_depth.keys().cloned().collect();
    node_ids.sort();

    edges.sort_by(|a, b| {
        a.from_id
            .cmp(&b.from_id)
            .then_with(|| a.to_id.cmp(&b.to_id))
            .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
    });

    Subgraph {
        max_hops,
        seed_ids,
        updated_files,
        node_ids,
        node_scores,
        edges,
    }
}

fn find_seed_ids(graph: &Graph, changes: &[ChangedFile]) -> Vec<String> {
    let mut seeds: HashSet<String> = HashSet::new();
    for change in changes {
        for symbol in graph.symbols.values() {
            if symbol.file_path != change.path {
                continue;
            }
            if !line_range_overlaps(symbol.start_line, symbol.end_line, &change.changed_lines) {
                continue;
            }
            seeds.insert(symbol.id.clone());
        }
    }
    let mut out: Vec<String> = seeds.into_iter().collect();
    out.sort();
    out
}

fn line_range_overlaps(start: i64, end: i64, changed: &[i64]) -> bool {
    if changed.is_empty() {
        return true;
    }
    changed.iter().any(|line| *line >= start && *line <= end)
}

fn edge_allowed(edge: &Edge, cfg: &RetrievalConfig) -> bool {
    if cfg.min_confidence > 0.0 && edge.confidence < cfg.min_confidence {
        return false;
    }
    cfg.allowed_kinds.is_empty() || cfg.allowed_kinds.contains(&edge.kind)
}

/// Confidence ≤ 0 is normalized to 0.5, > 1 clamped to 1.
fn normalized_confidence(confidence: f64) -> f64 {
    if confidence <= 0.0 {
        0.5
    } else if confidence > 1.0 {
        1.0
    } else {
        confidence
    }
}

fn changed_file_paths(changes: &[ChangedFile]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for change in changes {
        if change.path.is_empty() || !seen.insert(change.path.clone()) {
            continue;
        }
        paths.push(change.path.clone());
    }
    paths.sort();
    paths
}
