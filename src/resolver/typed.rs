use crate::graph::{strip_type_sigils, Graph};
use crate::model::{Edge, RelationCandidate, UnresolvedReason};
use crate::resolver::{GraphResolver, ResolveStats};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use tree_sitter::{Node, Parser};

/// Minimum confidence a typed edge carries.
const TYPED_FLOOR: f64 = 0.9;

/// Language-aware resolver for candidates the name-index pass could not
/// place. Per package it re-parses the member files, restricts attention to
/// the AST nodes inside each candidate's evidence line range, and matches
/// the qualified identifier forms found there against the graph indices;
/// when that yields nothing it falls back to method-key matching across
/// receivers. Only an unambiguous single target produces an edge; ambiguity
/// records a terminal reason instead of a low-quality edge.
pub struct TypedResolver {
    repo_root: PathBuf,
}

impl TypedResolver {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    fn read_source(&self, rel_path: &str) -> Option<String> {
        let abs = self.repo_root.join(rel_path);
        std::fs::read_to_string(abs)
            .or_else(|_| std::fs::read_to_string(rel_path))
            .ok()
    }
}

impl GraphResolver for TypedResolver {
    fn name(&self) -> &'static str {
        "types"
    }

    fn resolve(&mut self, graph: &mut Graph) -> Result<ResolveStats> {
        let mut stats = ResolveStats::default();
        if graph.unresolved.is_empty() {
            return Ok(stats);
        }

        // Group pending candidates by the source symbol's package so each
        // package's files are parsed once.
        let pending = std::mem::take(&mut graph.unresolved);
        let mut by_package: BTreeMap<String, Vec<RelationCandidate>> = BTreeMap::new();
        let mut still = Vec::new();
        for candidate in pending {
            match graph.get_symbol(&candidate.source_id) {
                Some(symbol) => by_package
                    .entry(symbol.package.clone())
                    .or_default()
                    .push(candidate),
                None => {
                    stats.attempted += 1;
                    stats.skipped += 1;
                    let mut candidate = candidate;
                    candidate.reason = Some(UnresolvedReason::SourceMissing);
                    still.push(candidate);
                }
            }
        }

        let mut edge_keys: HashSet<(String, String, &'static str)> = graph
            .edges
            .iter()
            .map(|e| (e.from_id.clone(), e.to_id.clone(), e.kind.as_str()))
            .collect();

        for (package, candidates) in by_package {
            let inventory = match self.load_package_inventory(graph, &package) {
                Some(inv) => inv,
                None => {
                    // Parse failure marks every candidate of the package.
                    for mut candidate in candidates {
                        stats.attempted += 1;
                        stats.skipped += 1;
                        candidate.reason = Some(UnresolvedReason::TypecheckFailed);
                        still.push(candidate);
                    }
                    continue;
                }
            };

            for mut candidate in candidates {
                stats.attempted += 1;
                let targets = resolve_candidate(graph, &inventory, &candidate, &package);
                match targets.len() {
                    0 => {
                        stats.skipped += 1;
                        candidate.reason = Some(UnresolvedReason::NoCandidate);
                        still.push(candidate);
                    }
                    1 => {
                        let to_id = targets.into_iter().next().unwrap();
                        let key = (candidate.source_id.clone(), to_id.clone(), candidate.kind.as_str());
                        if edge_keys.insert(key) {
                            graph.edges.push(Edge {
                                from_id: candidate.source_id.clone(),
                                to_id,
                                kind: candidate.kind,
                                resolver: "types".to_string(),
                                confidence: candidate.base_confidence.max(TYPED_FLOOR),
                                evidence: candidate.evidence.clone(),
                            });
                        }
                        stats.resolved += 1;
                    }
                    _ => {
                        stats.skipped += 1;
                        candidate.reason = Some(UnresolvedReason::Ambiguous);
                        still.push(candidate);
                    }
                }
            }
        }

        graph.unresolved = still;
        Ok(stats)
    }
}

/// Per-file qualified identifier occurrences, keyed by line number.
struct PackageInventory {
    // file path -> line -> qualified identifier texts seen on that line
    selectors: HashMap<String, HashMap<i64, Vec<String>>>,
}

impl TypedResolver {
    fn load_package_inventory(&self, graph: &Graph, package: &str) -> Option<PackageInventory> {
        let mut files: Vec<String> = graph
            .symbols
            .values()
            .filter(|s| s.package == package && s.language == "go")
            .map(|s| s.file_path.clone())
            .collect();
        files.sort();
        files.dedup();
        if files.is_empty() {
            return None;
        }

        let mut parser = Parser::new();
        let language = tree_sitter_go::LANGUAGE;
        parser.set_language(&language.into()).ok()?;

        let mut selectors: HashMap<String, HashMap<i64, Vec<String>>> = HashMap::new();
        for file in files {
            let source = self.read_source(&file)?;
            let tree = parser.parse(&source, None)?;
            let mut per_line: HashMap<i64, Vec<String>> = HashMap::new();
            collect_reference_texts(tree.root_node(), source.as_bytes(), &mut per_line);
            selectors.insert(file, per_line);
        }
        Some(PackageInventory { selectors })
    }
}

fn collect_reference_texts(node: Node<'_>, source: &[u8], out: &mut HashMap<i64, Vec<String>>) {
    match node.kind() {
        "selector_expression" | "qualified_type" | "identifier" | "type_identifier"
        | "field_identifier" => {
            if let Ok(text) = node.utf8_text(source) {
                let line = node.start_position().row as i64 + 1;
                out.entry(line).or_default().push(text.to_string());
            }
        }
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_reference_texts(child, source, out);
    }
}

/// Line-bounded evidence resolution first, then typed-object key matching.
fn resolve_candidate(
    graph: &Graph,
    inventory: &PackageInventory,
    candidate: &RelationCandidate,
    source_package: &str,
) -> Vec<String> {
    let clean = strip_type_sigils(&candidate.target_hint).to_string();
    let last_segment = clean.rsplit('.').next().unwrap_or(&clean).to_string();

    // Pass 1: qualified forms observed within the evidence range.
    if let Some(per_line) = inventory.selectors.get(&candidate.evidence.file_path) {
        let mut qualified_hits: HashSet<String> = HashSet::new();
        for line in candidate.evidence.start_line..=candidate.evidence.end_line.max(candidate.evidence.start_line) {
            let Some(texts) = per_line.get(&line) else {
                continue;
            };
            for text in texts {
                let text_clean = strip_type_sigils(text);
                if text_clean == clean
                    || text_clean.ends_with(&format!(".{last_segment}"))
                    || text_clean == last_segment
                {
                    qualified_hits.insert(text_clean.to_string());
                }
            }
        }
        let mut ids: HashSet<String> = HashSet::new();
        for form in &qualified_hits {
            for id in graph.resolve_target(form, source_package) {
                if id != candidate.source_id {
                    ids.insert(id);
                }
            }
        }
        if !ids.is_empty() {
            return sorted(ids);
        }
    }

    // Pass 2: key matching. For selector-shaped hints, match the member name
    // across method receivers, preferring the source package.
    let mut ids: HashSet<String> = HashSet::new();
    let mut local: HashSet<String> = HashSet::new();
    for symbol in graph.symbols.values() {
        if symbol.name != last_segment || symbol.id == candidate.source_id {
            continue;
        }
        if symbol.kind == "method" || clean == last_segment {
            ids.insert(symbol.id.clone());
            if symbol.package == source_package {
                local.insert(symbol.id.clone());
            }
        }
    }
    if local.len() == 1 {
        return sorted(local);
    }
    sorted(ids)
}

fn sorted(set: HashSet<String>) -> Vec<String> {
    let mut out: Vec<String> = set.into_iter().collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Evidence, RelationKind, Symbol, SymbolMetadata};
    use std::io::Write;

    fn symbol(id: &str, name: &str, kind: &str, package: &str, file: &str) -> Symbol {
        Symbol {
            id: id.into(),
            file_path: file.into(),
            start_line: 1,
            end_line: 30,
            language: "go".into(),
            package: package.into(),
            kind: kind.into(),
            name: name.into(),
            doc: String::new(),
            body: String::new(),
            content_hash: String::new(),
            role: String::new(),
            metadata: SymbolMetadata::default(),
            candidates: Vec::new(),
        }
    }

    fn candidate(source: &str, hint: &str, file: &str, line: i64) -> RelationCandidate {
        RelationCandidate {
            source_id: source.into(),
            target_hint: hint.into(),
            kind: RelationKind::Calls,
            evidence: Evidence {
                file_path: file.into(),
                start_line: line,
                end_line: line,
            },
            reason: None,
            base_confidence: 0.7,
        }
    }

    #[test]
    fn missing_source_symbol_is_marked_source_missing() {
        let mut g = Graph::new();
        g.unresolved.push(candidate("ghost", "Anything", "a.go", 2));
        let mut resolver = TypedResolver::new(PathBuf::from("/nonexistent"));
        resolver.resolve(&mut g).unwrap();
        assert_eq!(g.unresolved.len(), 1);
        assert_eq!(g.unresolved[0].reason, Some(UnresolvedReason::SourceMissing));
    }

    #[test]
    fn unreadable_package_marks_typecheck_failed() {
        let mut g = Graph::new();
        g.add_symbol(symbol("id-a", "A", "function", "pkg", "missing.go"));
        g.unresolved.push(candidate("id-a", "Nothing", "missing.go", 2));
        let mut resolver = TypedResolver::new(PathBuf::from("/nonexistent"));
        resolver.resolve(&mut g).unwrap();
        assert_eq!(g.unresolved.len(), 1);
        assert_eq!(
            g.unresolved[0].reason,
            Some(UnresolvedReason::TypecheckFailed)
        );
    }

    #[test]
    fn line_bounded_selector_resolves_method_call() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("store.go");
        let mut f = std::fs::File::create(&file).unwrap();
        writeln!(
            f,
            "package store\n\nfunc Use(s *Store) {{\n\ts.Close()\n}}\n"
        )
        .unwrap();

        let mut g = Graph::new();
        g.add_symbol(symbol("id-use", "Use", "function", "store", "store.go"));
        let mut close = symbol("id-close", "Close", "method", "store", "store.go");
        close.metadata.receiver = "Store".into();
        g.add_symbol(close);
        // The call on line 4 reads `s.Close()`; the bare hint fails the name
        // index but the typed pass confirms the member in range.
        g.unresolved.push(candidate("id-use", "s.Close", "store.go", 4));

        let mut resolver = TypedResolver::new(dir.path().to_path_buf());
        let stats = resolver.resolve(&mut g).unwrap();
        assert_eq!(stats.resolved, 1);
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].to_id, "id-close");
        assert_eq!(g.edges[0].resolver, "types");
        assert!(g.edges[0].confidence >= 0.9);
    }

    #[test]
    fn ambiguous_members_record_reason_and_emit_no_edge() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.go");
        std::fs::write(&file, "package m\n\nfunc Use() {\n\tx.Close()\n}\n").unwrap();

        let mut g = Graph::new();
        g.add_symbol(symbol("id-use", "Use", "function", "m", "m.go"));
        let mut a = symbol("id-a", "Close", "method", "m", "m.go");
        a.metadata.receiver = "A".into();
        let mut b = symbol("id-b", "Close", "method", "m", "m.go");
        b.metadata.receiver = "B".into();
        g.add_symbol(a);
        g.add_symbol(b);
        g.unresolved.push(candidate("id-use", "x.Close", "m.go", 4));

        let mut resolver = TypedResolver::new(dir.path().to_path_buf());
        resolver.resolve(&mut g).unwrap();
        assert!(g.edges.is_empty());
        assert_eq!(g.unresolved.len(), 1);
        assert_eq!(g.unresolved[0].reason, Some(UnresolvedReason::Ambiguous));
    }
}
