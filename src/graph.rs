use crate::model::{Edge, RelationCandidate, Symbol, UnresolvedReason};
use std::collections::{BTreeMap, HashMap, HashSet};

/// In-memory typed symbol graph with name indices and the queue of relation
/// candidates still awaiting resolution.
///
/// Nodes and edges never hold references to each other; edges carry IDs and
/// are dereferenced through the symbol map. Edges are rebuilt from scratch by
/// the resolver chain after every graph mutation.
#[derive(Debug, Default)]
pub struct Graph {
    pub symbols: HashMap<String, Symbol>,
    pub edges: Vec<Edge>,
    pub unresolved: Vec<RelationCandidate>,
    // name -> IDs, package.name -> IDs, and package.receiver.name -> IDs for methods
    name_index: HashMap<String, Vec<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a symbol by ID and keep the name indices consistent.
    pub fn add_symbol(&mut self, symbol: Symbol) {
        if self.symbols.insert(symbol.id.clone(), symbol.clone()).is_some() {
            // Replacing an existing node can orphan index entries.
            self.rebuild_indices();
            return;
        }
        self.index_symbol(&symbol);
    }

    /// Remove every symbol extracted from `file_path`. Returns removed IDs.
    /// Callers must run the resolver chain afterwards; stale edges are not
    /// patched here because the chain regenerates them wholesale.
    pub fn remove_file(&mut self, file_path: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .symbols
            .values()
            .filter(|s| s.file_path == file_path)
            .map(|s| s.id.clone())
            .collect();
        for id in &removed {
            self.symbols.remove(id);
        }
        if !removed.is_empty() {
            self.rebuild_indices();
        }
        removed
    }

    /// Run the name-index resolver pass over all unresolved candidates of all
    /// symbols. Edges are regenerated wholesale; see `resolver::heuristic`.
    pub fn link_heuristic(&mut self) {
        crate::resolver::heuristic::link_relations(self);
    }

    /// Rebuild all name indices from the current symbol set.
    pub fn rebuild_indices(&mut self) {
        self.name_index.clear();
        let symbols: Vec<Symbol> = self.symbols.values().cloned().collect();
        for symbol in &symbols {
            self.index_symbol(symbol);
        }
    }

    fn index_symbol(&mut self, symbol: &Symbol) {
        if symbol.name.is_empty() {
            return;
        }
        self.name_index
            .entry(symbol.name.clone())
            .or_default()
            .push(symbol.id.clone());
        if !symbol.package.is_empty() {
            self.name_index
                .entry(format!("{}.{}", symbol.package, symbol.name))
                .or_default()
                .push(symbol.id.clone());
        }
        if symbol.kind == "method" && !symbol.metadata.receiver.is_empty() {
            self.name_index
                .entry(format!(
                    "{}.{}.{}",
                    symbol.package, symbol.metadata.receiver, symbol.name
                ))
                .or_default()
                .push(symbol.id.clone());
        }
    }

    pub fn lookup_name(&self, key: &str) -> Option<&[String]> {
        self.name_index.get(key).map(|v| v.as_slice())
    }

    /// Resolve target IDs for a hint: exact normalized name, then the original
    /// hint, then package-local qualification. Array/pointer sigils are
    /// stripped before lookup.
    pub fn resolve_target(&self, target_hint: &str, source_package: &str) -> Vec<String> {
        let clean = strip_type_sigils(target_hint);

        if let Some(ids) = self.name_index.get(clean) {
            return ids.clone();
        }
        if let Some(ids) = self.name_index.get(target_hint) {
            return ids.clone();
        }
        let local_key = format!("{source_package}.{clean}");
        if let Some(ids) = self.name_index.get(&local_key) {
            return ids.clone();
        }
        Vec::new()
    }

    pub fn get_symbol(&self, id: &str) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    /// Symbols the given node depends on (outgoing edges).
    pub fn get_dependencies(&self, id: &str) -> Vec<&Symbol> {
        let mut out = Vec::new();
        for edge in &self.edges {
            if edge.from_id == id {
                if let Some(symbol) = self.symbols.get(&edge.to_id) {
                    out.push(symbol);
                }
            }
        }
        out
    }

    /// Symbols that depend on the given node (incoming edges).
    pub fn get_dependents(&self, id: &str) -> Vec<&Symbol> {
        let mut out = Vec::new();
        for edge in &self.edges {
            if edge.to_id == id {
                if let Some(symbol) = self.symbols.get(&edge.from_id) {
                    out.push(symbol);
                }
            }
        }
        out
    }

    /// Deduplicated sorted file paths covered by the current symbol set.
    pub fn file_paths(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for symbol in self.symbols.values() {
            if symbol.file_path.is_empty() || !seen.insert(symbol.file_path.clone()) {
                continue;
            }
            out.push(symbol.file_path.clone());
        }
        out.sort();
        out
    }

    /// Sorted symbol IDs belonging to a file.
    pub fn symbols_in_file(&self, file_path: &str) -> Vec<&Symbol> {
        let mut out: Vec<&Symbol> = self
            .symbols
            .values()
            .filter(|s| s.file_path == file_path)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn unresolved_reason_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for cand in &self.unresolved {
            let reason = cand
                .reason
                .map(|r| r.as_str())
                .unwrap_or(UnresolvedReason::NoCandidate.as_str());
            *counts.entry(reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Strip leading pointer/array sigils from a type hint, e.g. `*Extractor` or
/// `[]Node` down to the bare name.
pub fn strip_type_sigils(hint: &str) -> &str {
    let mut value = hint;
    loop {
        if let Some(rest) = value.strip_prefix('*') {
            value = rest;
        } else if let Some(rest) = value.strip_prefix("[]") {
            value = rest;
        } else if let Some(rest) = value.strip_prefix('&') {
            value = rest;
        } else {
            return value;
        }
    }
}
