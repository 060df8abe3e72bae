use crate::graph::Graph;
use crate::model::Edge;
use crate::resolver::confidence::calibrate;
use crate::resolver::{GraphResolver, ResolveStats};
use anyhow::Result;
use std::collections::HashSet;

/// Name-index resolver. Discards the previous edge list and regenerates it
/// from every symbol's relation candidates: a candidate whose hint resolves
/// through the name index becomes a `resolver="heuristic"` edge at the
/// kind's base confidence; the rest persist as unresolved for later stages.
#[derive(Debug, Default)]
pub struct HeuristicResolver;

impl HeuristicResolver {
    pub fn new() -> Self {
        Self
    }
}

impl GraphResolver for HeuristicResolver {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn resolve(&mut self, graph: &mut Graph) -> Result<ResolveStats> {
        Ok(link_relations(graph))
    }
}

/// The name-index linking pass shared by `Graph::link_heuristic` and the
/// chain stage. Deterministic: symbols are visited in ID order and edges are
/// deduplicated on `(from, to, kind)`.
pub fn link_relations(graph: &mut Graph) -> ResolveStats {
    graph.edges.clear();
    graph.unresolved.clear();

    let mut source_ids: Vec<String> = graph.symbols.keys().cloned().collect();
    source_ids.sort();

    let mut seen: HashSet<(String, String, &'static str)> = HashSet::new();
    let mut stats = ResolveStats::default();
    let mut edges = Vec::new();
    let mut unresolved = Vec::new();

    for source_id in source_ids {
        let candidates = match graph.symbols.get(&source_id) {
            Some(symbol) => symbol.candidates.clone(),
            None => continue,
        };
        let source_package = graph.symbols[&source_id].package.clone();

        for candidate in candidates {
            stats.attempted += 1;
            let targets = graph.resolve_target(&candidate.target_hint, &source_package);
            if targets.is_empty() {
                stats.skipped += 1;
                unresolved.push(candidate);
                continue;
            }
            stats.resolved += 1;
            for to_id in targets {
                if to_id == source_id {
                    continue;
                }
                let key = (source_id.clone(), to_id.clone(), candidate.kind.as_str());
                if !seen.insert(key) {
                    continue;
                }
                edges.push(Edge {
                    from_id: source_id.clone(),
                    to_id,
                    kind: candidate.kind,
                    resolver: "heuristic".to_string(),
                    confidence: calibrate(candidate.kind, "heuristic", &candidate.evidence),
                    evidence: candidate.evidence.clone(),
                });
            }
        }
    }

    graph.edges = edges;
    graph.unresolved = unresolved;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Evidence, RelationCandidate, RelationKind, Symbol, SymbolMetadata};

    fn symbol(id: &str, name: &str, candidates: Vec<RelationCandidate>) -> Symbol {
        Symbol {
            id: id.into(),
            file_path: "a.go".into(),
            start_line: 1,
            end_line: 10,
            language: "go".into(),
            package: "pkg".into(),
            kind: "function".into(),
            name: name.into(),
            doc: String::new(),
            body: String::new(),
            content_hash: String::new(),
            role: String::new(),
            metadata: SymbolMetadata::default(),
            candidates,
        }
    }

    fn candidate(source: &str, target: &str, kind: RelationKind) -> RelationCandidate {
        RelationCandidate {
            source_id: source.into(),
            target_hint: target.into(),
            kind,
            evidence: Evidence {
                file_path: "a.go".into(),
                start_line: 2,
                end_line: 2,
            },
            reason: None,
            base_confidence: 0.7,
        }
    }

    #[test]
    fn resolvable_candidates_become_edges_at_base_confidence() {
        let mut g = Graph::new();
        g.add_symbol(symbol(
            "id-a",
            "A",
            vec![candidate("id-a", "B", RelationKind::Calls)],
        ));
        g.add_symbol(symbol("id-b", "B", Vec::new()));

        let stats = link_relations(&mut g);
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].resolver, "heuristic");
        assert!((g.edges[0].confidence - 0.70).abs() < 1e-9);
        assert!(g.unresolved.is_empty());
    }

    #[test]
    fn unresolved_candidates_persist_for_later_stages() {
        let mut g = Graph::new();
        g.add_symbol(symbol(
            "id-a",
            "A",
            vec![candidate("id-a", "Missing", RelationKind::UsesType)],
        ));
        let stats = link_relations(&mut g);
        assert_eq!(stats.skipped, 1);
        assert_eq!(g.unresolved.len(), 1);
        assert_eq!(g.unresolved[0].target_hint, "Missing");
        assert!(g.unresolved[0].reason.is_none());
    }

    #[test]
    fn duplicate_hits_collapse_to_one_edge_per_key() {
        let mut g = Graph::new();
        g.add_symbol(symbol(
            "id-a",
            "A",
            vec![
                candidate("id-a", "B", RelationKind::Calls),
                candidate("id-a", "pkg.B", RelationKind::Calls),
            ],
        ));
        g.add_symbol(symbol("id-b", "B", Vec::new()));

        link_relations(&mut g);
        assert_eq!(g.edges.len(), 1);
    }

    #[test]
    fn self_references_are_skipped() {
        let mut g = Graph::new();
        g.add_symbol(symbol(
            "id-a",
            "A",
            vec![candidate("id-a", "A", RelationKind::Calls)],
        ));
        link_relations(&mut g);
        assert!(g.edges.is_empty());
    }
}
