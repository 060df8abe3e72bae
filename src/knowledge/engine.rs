use crate::graph::Graph;
use crate::knowledge::index::VectorIndex;
use crate::knowledge::{ChunkSource, Embedder, SearchChunk, VectorItem};
use crate::model::Symbol;
use crate::util::CancelToken;
use anyhow::{Result, bail};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Functions and methods longer than this many lines additionally emit
/// segment chunks.
const SEGMENT_THRESHOLD_LINES: i64 = 45;
const SEGMENT_LINES: i64 = 40;
const SEGMENT_OVERLAP: i64 = 8;
const MAX_SEGMENTS: usize = 3;

/// File-module chunk bodies are capped here, with a marker appended.
const FILE_BODY_CAP: usize = 3000;
const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Hop distance from an exported symbol within which unexported symbols stay
/// documentation-relevant.
const RELEVANCE_HOPS: usize = 2;

const PRIMARY_SOURCE_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexingOptions {
    /// Per-run embedding budget; 0 means unbounded.
    pub max_chunks_per_run: usize,
}

/// Index health snapshot computed before full generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexHealth {
    pub expected: usize,
    pub indexed: usize,
    pub coverage: f64,
    pub stale_ratio: f64,
    pub freshness: f64,
    pub rebuilt: bool,
    pub stale_deleted: usize,
}

impl IndexHealth {
    pub fn needs_rebuild(&self) -> bool {
        (self.indexed == 0 && self.expected > 0)
            || self.freshness < 0.85
            || self.coverage < 0.70
            || self.stale_ratio > 0.15
    }
}

/// Data refinement and preparation layer between the graph, the embedder,
/// and the vector index. Owns the per-run query-vector cache; the cache dies
/// with the engine.
pub struct Engine<'g> {
    graph: &'g Graph,
    embedder: Option<Box<dyn Embedder>>,
    index: Box<dyn VectorIndex>,
    query_cache: RefCell<HashMap<String, Vec<f32>>>,
}

impl<'g> Engine<'g> {
    pub fn new(
        graph: &'g Graph,
        embedder: Option<Box<dyn Embedder>>,
        index: Box<dyn VectorIndex>,
    ) -> Self {
        Self {
            graph,
            embedder,
            index,
            query_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn index_mut(&mut self) -> &mut dyn VectorIndex {
        self.index.as_mut()
    }

    /// Chunk for a single graph symbol, with dependency context resolved.
    pub fn create_chunk(&self, symbol: &Symbol) -> SearchChunk {
        let mut dependencies: Vec<String> = self
            .graph
            .get_dependencies(&symbol.id)
            .iter()
            .map(|s| s.name.clone())
            .collect();
        dependencies.sort();
        dependencies.dedup();
        let mut used_by: Vec<String> = self
            .graph
            .get_dependents(&symbol.id)
            .iter()
            .map(|s| s.name.clone())
            .collect();
        used_by.sort();
        used_by.dedup();

        let signature = if symbol.metadata.signature.is_empty() {
            concise_signature(symbol)
        } else {
            symbol.metadata.signature.clone()
        };

        let mut chunk = SearchChunk {
            id: symbol.id.clone(),
            name: symbol.name.clone(),
            kind: symbol.kind.clone(),
            package: symbol.package.clone(),
            file_path: symbol.file_path.clone(),
            description: symbol.doc.clone(),
            signature,
            body: symbol.body.clone(),
            content_hash: String::new(),
            dependencies,
            used_by,
            sources: vec![ChunkSource {
                symbol_id: symbol.id.clone(),
                file_path: symbol.file_path.clone(),
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                relation: "primary".into(),
                confidence: PRIMARY_SOURCE_CONFIDENCE,
            }],
        };
        chunk.content_hash = chunk.compute_content_hash();
        chunk
    }

    /// IDs of symbols worth documenting: exported, or within two hops of an
    /// exported symbol in either dependency direction.
    pub fn relevant_symbol_ids(&self) -> HashSet<String> {
        let mut relevant: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        for symbol in self.graph.symbols.values() {
            if symbol.is_exported() {
                relevant.insert(symbol.id.clone());
                queue.push_back((symbol.id.clone(), 0));
            }
        }
        while let Some((id, depth)) = queue.pop_front() {
            if depth >= RELEVANCE_HOPS {
                continue;
            }
            for neighbor in self
                .graph
                .get_dependencies(&id)
                .into_iter()
                .chain(self.graph.get_dependents(&id))
            {
                if relevant.insert(neighbor.id.clone()) {
                    queue.push_back((neighbor.id.clone(), depth + 1));
                }
            }
        }
        relevant
    }

    /// Symbol-first chunking over the whole graph: a primary chunk per
    /// relevant symbol, segment chunks for long bodies, and one file-module
    /// aggregate per file with at least one relevant symbol. Deterministic
    /// ID order.
    pub fn prepare_search_chunks(&self) -> Vec<SearchChunk> {
        let relevant = self.relevant_symbol_ids();
        self.prepare_chunks_filtered(|symbol| relevant.contains(&symbol.id))
    }

    /// Same policy, restricted to the given files.
    pub fn prepare_chunks_for_files(&self, files: &[String]) -> Vec<SearchChunk> {
        let file_set: HashSet<&String> = files.iter().collect();
        let relevant = self.relevant_symbol_ids();
        self.prepare_chunks_filtered(|symbol| {
            relevant.contains(&symbol.id) && file_set.contains(&symbol.file_path)
        })
    }

    fn prepare_chunks_filtered<F: Fn(&Symbol) -> bool>(&self, keep: F) -> Vec<SearchChunk> {
        let mut by_file: BTreeMap<String, Vec<&Symbol>> = BTreeMap::new();
        for symbol in self.graph.symbols.values() {
            if keep(symbol) {
                by_file.entry(symbol.file_path.clone()).or_default().push(symbol);
            }
        }

        let mut chunks = Vec::new();
        for (path, mut members) in by_file {
            members.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.id.cmp(&b.id)));
            for symbol in &members {
                chunks.push(self.create_chunk(symbol));
                chunks.extend(self.segment_chunks(symbol));
            }
            chunks.push(self.file_chunk(&path, &members));
        }
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        chunks
    }

    /// Up to three fixed-size overlapping windows over a long body. Sources
    /// are line-shifted copies of the base span with `relation="context"`.
    fn segment_chunks(&self, symbol: &Symbol) -> Vec<SearchChunk> {
        if symbol.kind != "function" && symbol.kind != "method" {
            return Vec::new();
        }
        let body_lines: Vec<&str> = symbol.body.lines().collect();
        if (body_lines.len() as i64) <= SEGMENT_THRESHOLD_LINES {
            return Vec::new();
        }

        let stride = SEGMENT_LINES - SEGMENT_OVERLAP;
        let mut out = Vec::new();
        for seg in 0..MAX_SEGMENTS {
            let offset = stride * seg as i64;
            if offset >= body_lines.len() as i64 {
                break;
            }
            let window_end = (offset + SEGMENT_LINES).min(body_lines.len() as i64);
            let window: Vec<&str> =
                body_lines[offset as usize..window_end as usize].to_vec();
            if window.is_empty() {
                break;
            }
            let start_line = symbol.start_line + offset;
            let end_line = (symbol.start_line + window_end - 1).min(symbol.end_line);
            let mut chunk = SearchChunk {
                id: format!("{}:seg-{}", symbol.id, seg + 1),
                name: format!("{} (part {})", symbol.name, seg + 1),
                kind: "symbol_segment".into(),
                package: symbol.package.clone(),
                file_path: symbol.file_path.clone(),
                description: symbol.doc.clone(),
                signature: symbol.metadata.signature.clone(),
                body: window.join("\n"),
                content_hash: String::new(),
                dependencies: Vec::new(),
                used_by: Vec::new(),
                sources: vec![ChunkSource {
                    symbol_id: symbol.id.clone(),
                    file_path: symbol.file_path.clone(),
                    start_line,
                    end_line,
                    relation: "context".into(),
                    confidence: PRIMARY_SOURCE_CONFIDENCE,
                }],
            };
            chunk.content_hash = chunk.compute_content_hash();
            out.push(chunk);
        }
        out
    }

    /// One aggregate chunk per file: description lists members, body
    /// concatenates member bodies under a hard cap, sources carry each
    /// member as primary.
    fn file_chunk(&self, path: &str, members: &[&Symbol]) -> SearchChunk {
        let package = members.first().map(|s| s.package.clone()).unwrap_or_default();
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();

        let mut description = format!("Module `{file_name}` in package `{package}` containing:\n");
        let mut body = String::new();
        let mut deps: HashSet<String> = HashSet::new();
        let mut users: HashSet<String> = HashSet::new();
        let mut sources = Vec::with_capacity(members.len());

        for symbol in members {
            description.push_str(&format!(
                "- **{}** ({}): {}\n",
                symbol.name,
                symbol.kind,
                symbol.doc.replace('\n', " ")
            ));
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(&symbol.body);
            for dep in self.graph.get_dependencies(&symbol.id) {
                deps.insert(dep.name.clone());
            }
            for user in self.graph.get_dependents(&symbol.id) {
                users.insert(user.name.clone());
            }
            sources.push(ChunkSource {
                symbol_id: symbol.id.clone(),
                file_path: symbol.file_path.clone(),
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                relation: "primary".into(),
                confidence: PRIMARY_SOURCE_CONFIDENCE,
            });
        }

        if body.chars().count() > FILE_BODY_CAP {
            body = crate::util::truncate_chars(&body, FILE_BODY_CAP);
            body.push_str(TRUNCATION_MARKER);
        }

        let mut dependencies: Vec<String> = deps.into_iter().collect();
        dependencies.sort();
        let mut used_by: Vec<String> = users.into_iter().collect();
        used_by.sort();

        let mut chunk = SearchChunk {
            id: path.to_string(),
            name: file_name,
            kind: "file_module".into(),
            package,
            file_path: path.to_string(),
            description,
            signature: String::new(),
            body,
            content_hash: String::new(),
            dependencies,
            used_by,
            sources,
        };
        chunk.content_hash = chunk.compute_content_hash();
        chunk
    }

    /// Priority used when the embedding budget forces a cut.
    pub fn chunk_priority(&self, chunk: &SearchChunk) -> i64 {
        let mut priority: i64 = if chunk.kind == "file_module" { 5 } else { 40 };
        if chunk
            .name
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
        {
            priority += 20;
        }
        match chunk.kind.as_str() {
            "function" | "method" | "struct" | "interface" => priority += 12,
            "constant" | "variable" => priority += 4,
            _ => {}
        }
        priority += (chunk.dependencies.len() as i64).min(8);
        priority += (chunk.used_by.len() as i64).min(8);
        priority
    }

    /// Cap a chunk list to `max`, partitioning capacity between file-module
    /// chunks and symbol chunks and backfilling unused capacity from the
    /// other pool.
    pub fn apply_budget(&self, chunks: Vec<SearchChunk>, max: usize) -> Vec<SearchChunk> {
        if max == 0 || chunks.len() <= max {
            return chunks;
        }
        let target_files = if max >= 8 {
            max / 4
        } else if max >= 4 {
            1
        } else {
            0
        };
        let target_symbols = max - target_files;

        let (mut files, mut symbols): (Vec<SearchChunk>, Vec<SearchChunk>) =
            chunks.into_iter().partition(|c| c.kind == "file_module");
        let by_priority = |a: &SearchChunk, b: &SearchChunk| {
            self.chunk_priority(b)
                .cmp(&self.chunk_priority(a))
                .then_with(|| a.id.cmp(&b.id))
        };
        files.sort_by(by_priority);
        symbols.sort_by(by_priority);

        let take_files = files.len().min(target_files);
        let take_symbols = symbols.len().min(target_symbols);
        // Backfill leftover capacity from the other pool.
        let spare = max - take_files - take_symbols;
        let extra_symbols = (symbols.len() - take_symbols).min(spare);
        let spare = spare - extra_symbols;
        let extra_files = (files.len() - take_files).min(spare);

        let mut out: Vec<SearchChunk> = Vec::with_capacity(max);
        out.extend(symbols.into_iter().take(take_symbols + extra_symbols));
        out.extend(files.into_iter().take(take_files + extra_files));
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Drop chunks whose stored content hash matches the fresh one. A store
    /// without the hash capability disables filtering.
    pub fn filter_changed(&self, chunks: Vec<SearchChunk>) -> Result<Vec<SearchChunk>> {
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let stored = match self.index.content_hashes(&ids)? {
            Some(map) => map,
            None => return Ok(chunks),
        };
        let before = chunks.len();
        let out: Vec<SearchChunk> = chunks
            .into_iter()
            .filter(|c| stored.get(&c.id) != Some(&c.content_hash))
            .collect();
        if out.len() != before {
            debug!("change filter skipped {} unchanged chunks", before - out.len());
        }
        Ok(out)
    }

    fn embed_and_add(&mut self, chunks: Vec<SearchChunk>, cancel: &CancelToken) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let Some(embedder) = self.embedder.as_ref() else {
            bail!("embedder not initialized");
        };
        let texts: Vec<String> = chunks.iter().map(|c| c.to_embeddable_text()).collect();
        let vectors = embedder.embed(&texts, cancel)?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedding count mismatch: got {}, expected {}",
                vectors.len(),
                chunks.len()
            );
        }
        let items: Vec<VectorItem> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| VectorItem { chunk, embedding })
            .collect();
        let added = items.len();
        self.index.add(items)?;
        Ok(added)
    }

    /// Full indexing pass over every relevant symbol.
    pub fn index_all(&mut self, cancel: &CancelToken) -> Result<usize> {
        let chunks = self.prepare_search_chunks();
        let chunks = self.filter_changed(chunks)?;
        let added = self.embed_and_add(chunks, cancel)?;
        info!("indexed {added} chunks (full)");
        Ok(added)
    }

    /// Incremental index update for a VCS delta.
    ///
    /// Updated files first have their file-ID chunk deleted so stale
    /// file-module aggregates (and symbol chunks absorbed into them) cannot
    /// survive, then get re-prepared and re-embedded under the per-run
    /// budget. Deleted files have their chunks removed outright, using the
    /// symbol IDs captured when the graph was patched.
    pub fn index_incremental(
        &mut self,
        updated_files: &[String],
        deleted_chunks: &[(String, Vec<String>)],
        options: IndexingOptions,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let mut to_delete: Vec<String> = updated_files.to_vec();
        for (path, symbol_ids) in deleted_chunks {
            to_delete.push(path.clone());
            for id in symbol_ids {
                to_delete.push(id.clone());
                for seg in 1..=MAX_SEGMENTS {
                    to_delete.push(format!("{id}:seg-{seg}"));
                }
            }
        }
        to_delete.sort();
        to_delete.dedup();
        self.index.delete(&to_delete)?;

        if updated_files.is_empty() {
            return Ok(0);
        }
        let chunks = self.prepare_chunks_for_files(updated_files);
        let chunks = self.filter_changed(chunks)?;
        let chunks = self.apply_budget(chunks, options.max_chunks_per_run);
        let added = self.embed_and_add(chunks, cancel)?;
        info!("indexed {added} chunks (incremental)");
        Ok(added)
    }

    fn query_vector(&self, query: &str, cancel: &CancelToken) -> Result<Option<Vec<f32>>> {
        if let Some(cached) = self.query_cache.borrow().get(query) {
            return Ok(Some(cached.clone()));
        }
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(None);
        };
        let mut vectors = embedder.embed(&[query.to_string()], cancel)?;
        let Some(vector) = vectors.pop() else {
            return Ok(None);
        };
        self.query_cache
            .borrow_mut()
            .insert(query.to_string(), vector.clone());
        Ok(Some(vector))
    }

    /// Embed one query string through the per-run cache. `None` when no
    /// embedder is configured.
    pub fn search_query_vector(
        &self,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Option<Vec<f32>>> {
        self.query_vector(query, cancel)
    }

    /// Semantic search for a free-form query. Query embeddings are cached
    /// per query string for the lifetime of the run.
    pub fn search_by_text(
        &self,
        query: &str,
        top_k: usize,
        exclude_id: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchChunk>> {
        let Some(vector) = self.query_vector(query, cancel)? else {
            return Ok(Vec::new());
        };
        let items = self.index.search(&vector, top_k)?;
        Ok(items
            .into_iter()
            .map(|i| i.chunk)
            .filter(|c| c.id != exclude_id)
            .collect())
    }

    /// Hybrid search seeded by an existing chunk: vector similarity plus a
    /// graph-proximity boost around the source symbol.
    pub fn search_related(
        &self,
        chunk: &SearchChunk,
        top_k: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchChunk>> {
        let query = chunk.to_embeddable_text();
        let Some(vector) = self.query_vector(&query, cancel)? else {
            return Ok(Vec::new());
        };
        let boosts = self.proximity_boosts(&chunk.id);
        let items = self.index.search_with_boost(&vector, top_k + 1, &boosts)?;
        Ok(items
            .into_iter()
            .map(|i| i.chunk)
            .filter(|c| c.id != chunk.id)
            .take(top_k)
            .collect())
    }

    /// +0.2 for direct graph neighbors, +0.1 for 2-hop neighbors.
    pub fn proximity_boosts(&self, source_id: &str) -> HashMap<String, f32> {
        let mut out = HashMap::new();
        if source_id.is_empty() || !self.graph.symbols.contains_key(source_id) {
            return out;
        }
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(source_id.to_string());
        let mut queue: VecDeque<(String, u8)> = VecDeque::new();
        queue.push_back((source_id.to_string(), 0));
        while let Some((id, depth)) = queue.pop_front() {
            if depth >= 2 {
                continue;
            }
            for neighbor in self
                .graph
                .get_dependencies(&id)
                .into_iter()
                .chain(self.graph.get_dependents(&id))
            {
                if visited.insert(neighbor.id.clone()) {
                    let boost = if depth == 0 { 0.2 } else { 0.1 };
                    out.insert(neighbor.id.clone(), boost);
                    queue.push_back((neighbor.id.clone(), depth + 1));
                }
            }
        }
        out
    }

    /// Compare the expected chunk set with the index, rebuild when coverage
    /// or freshness degrade, and purge whatever stale IDs remain.
    pub fn ensure_index_health(&mut self, cancel: &CancelToken) -> Result<IndexHealth> {
        let expected: HashSet<String> = self
            .prepare_search_chunks()
            .into_iter()
            .map(|c| c.id)
            .collect();
        let indexed: HashSet<String> = self.index.list_chunk_ids()?.into_iter().collect();

        let overlap = expected.intersection(&indexed).count();
        let missing = expected.len() - overlap;
        let stale = indexed.len() - overlap;

        let coverage = if expected.is_empty() {
            1.0
        } else {
            overlap as f64 / expected.len() as f64
        };
        let stale_ratio = if indexed.is_empty() {
            0.0
        } else {
            stale as f64 / indexed.len() as f64
        };
        let denom = expected.len().max(indexed.len());
        let freshness = if denom == 0 {
            1.0
        } else {
            1.0 - (missing + stale) as f64 / denom as f64
        };

        let mut health = IndexHealth {
            expected: expected.len(),
            indexed: indexed.len(),
            coverage,
            stale_ratio,
            freshness,
            rebuilt: false,
            stale_deleted: 0,
        };

        if health.needs_rebuild() && self.has_embedder() {
            info!(
                "index rebuild triggered: coverage={coverage:.2} stale={stale_ratio:.2} freshness={freshness:.2}"
            );
            self.index_all(cancel)?;
            health.rebuilt = true;
        } else if health.needs_rebuild() {
            warn!("index unhealthy but no embedder configured; skipping rebuild");
        }

        let remaining: Vec<String> = self
            .index
            .list_chunk_ids()?
            .into_iter()
            .filter(|id| !expected.contains(id))
            .collect();
        if !remaining.is_empty() {
            health.stale_deleted = remaining.len();
            self.index.delete(&remaining)?;
        }
        Ok(health)
    }
}

fn concise_signature(symbol: &Symbol) -> String {
    for raw in symbol.body.lines() {
        let line = raw.trim();
        if !line.is_empty() && !line.starts_with("//") && !line.starts_with("/*") {
            return line.to_string();
        }
    }
    symbol.name.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::embedder::MockEmbedder;
    use crate::knowledge::index::MemoryIndex;
    use crate::model::{Edge, Evidence, RelationKind, SymbolMetadata};

    fn symbol(id: &str, name: &str, kind: &str, file: &str, lines: (i64, i64)) -> Symbol {
        Symbol {
            id: id.into(),
            file_path: file.into(),
            start_line: lines.0,
            end_line: lines.1,
            language: "go".into(),
            package: "pkg".into(),
            kind: kind.into(),
            name: name.into(),
            doc: format!("{name} does things."),
            body: format!("func {name}() {{}}"),
            content_hash: "h".into(),
            role: String::new(),
            metadata: SymbolMetadata::default(),
            candidates: Vec::new(),
        }
    }

    fn engine(graph: &Graph) -> Engine<'_> {
        Engine::new(
            graph,
            Some(Box::new(MockEmbedder::new(8))),
            Box::new(MemoryIndex::new()),
        )
    }

    #[test]
    fn unexported_symbols_within_two_hops_stay_relevant() {
        let mut g = Graph::new();
        g.add_symbol(symbol("exp", "Exported", "function", "a.go", (1, 5)));
        g.add_symbol(symbol("one", "hopOne", "function", "a.go", (7, 9)));
        g.add_symbol(symbol("two", "hopTwo", "function", "a.go", (11, 13)));
        g.add_symbol(symbol("three", "hopThree", "function", "a.go", (15, 17)));
        let edge = |from: &str, to: &str| Edge {
            from_id: from.into(),
            to_id: to.into(),
            kind: RelationKind::Calls,
            resolver: "heuristic".into(),
            confidence: 0.7,
            evidence: Evidence::default(),
        };
        g.edges.push(edge("exp", "one"));
        g.edges.push(edge("one", "two"));
        g.edges.push(edge("two", "three"));

        let e = engine(&g);
        let relevant = e.relevant_symbol_ids();
        assert!(relevant.contains("exp"));
        assert!(relevant.contains("one"));
        assert!(relevant.contains("two"));
        assert!(!relevant.contains("three"));
    }

    #[test]
    fn long_function_bodies_emit_overlapping_segments() {
        let mut g = Graph::new();
        let mut long = symbol("long", "LongRun", "function", "a.go", (10, 100));
        long.body = (0..90)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        g.add_symbol(long);

        let e = engine(&g);
        let chunks = e.prepare_search_chunks();
        let segments: Vec<&SearchChunk> = chunks
            .iter()
            .filter(|c| c.kind == "symbol_segment")
            .collect();
        assert_eq!(segments.len(), 3);
        for (i, seg) in segments.iter().enumerate() {
            assert_eq!(seg.id, format!("long:seg-{}", i + 1));
            assert_eq!(seg.sources[0].relation, "context");
            let span = seg.sources[0].end_line - seg.sources[0].start_line + 1;
            assert!(span <= 60);
            assert!(seg.sources[0].start_line >= 10);
            assert!(seg.sources[0].end_line <= 100);
        }
        // Consecutive windows overlap by the configured amount.
        assert_eq!(segments[1].sources[0].start_line, 10 + 32);
    }

    #[test]
    fn file_chunk_aggregates_members_and_caps_body() {
        let mut g = Graph::new();
        let mut big = symbol("big", "Big", "function", "a.go", (1, 400));
        big.body = "x".repeat(5000);
        g.add_symbol(big);
        g.add_symbol(symbol("small", "Small", "function", "a.go", (401, 410)));

        let e = engine(&g);
        let chunks = e.prepare_search_chunks();
        let file = chunks.iter().find(|c| c.kind == "file_module").unwrap();
        assert_eq!(file.id, "a.go");
        assert!(file.description.contains("**Big**"));
        assert!(file.description.contains("**Small**"));
        assert!(file.body.ends_with(TRUNCATION_MARKER));
        assert_eq!(file.sources.len(), 2);
        assert!(file.sources.iter().all(|s| s.relation == "primary"));
    }

    #[test]
    fn budget_partitions_and_backfills() {
        let mut g = Graph::new();
        for i in 0..10 {
            g.add_symbol(symbol(
                &format!("s{i}"),
                &format!("Sym{i}"),
                "function",
                &format!("f{i}.go"),
                (1, 5),
            ));
        }
        let e = engine(&g);
        let chunks = e.prepare_search_chunks();
        // 10 symbol chunks + 10 file chunks in total.
        assert_eq!(chunks.len(), 20);
        let capped = e.apply_budget(chunks, 8);
        assert_eq!(capped.len(), 8);
        let files = capped.iter().filter(|c| c.kind == "file_module").count();
        assert_eq!(files, 2); // 8/4 from the file pool
    }

    #[test]
    fn budget_of_one_goes_entirely_to_symbols() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "A", "function", "a.go", (1, 5)));
        g.add_symbol(symbol("b", "B", "function", "b.go", (1, 5)));
        let e = engine(&g);
        let chunks = e.prepare_search_chunks();
        let capped = e.apply_budget(chunks, 1);
        assert_eq!(capped.len(), 1);
        assert_ne!(capped[0].kind, "file_module");
    }

    #[test]
    fn change_filter_skips_unchanged_chunks() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "A", "function", "a.go", (1, 5)));
        let mut e = engine(&g);
        let cancel = CancelToken::new();
        let added = e.index_all(&cancel).unwrap();
        assert!(added > 0);
        // Second run: everything is unchanged, nothing re-embeds.
        let chunks = e.prepare_search_chunks();
        let filtered = e.filter_changed(chunks).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn incremental_update_clears_file_id_chunks_first() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "A", "function", "a.go", (1, 5)));
        let mut e = engine(&g);
        let cancel = CancelToken::new();
        e.index_all(&cancel).unwrap();
        assert!(e.index().list_chunk_ids().unwrap().contains(&"a.go".to_string()));

        let added = e
            .index_incremental(
                &["a.go".to_string()],
                &[],
                IndexingOptions { max_chunks_per_run: 10 },
                &cancel,
            )
            .unwrap();
        // The file chunk was deleted and re-embedded; the symbol chunk hash
        // was unchanged so only the file chunk returns.
        assert_eq!(added, 1);
        assert!(e.index().list_chunk_ids().unwrap().contains(&"a.go".to_string()));
    }

    #[test]
    fn deleted_files_lose_their_chunks() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "A", "function", "a.go", (1, 5)));
        g.add_symbol(symbol("b", "B", "function", "b.go", (1, 5)));
        let mut e = engine(&g);
        let cancel = CancelToken::new();
        e.index_all(&cancel).unwrap();

        e.index_incremental(
            &[],
            &[("b.go".to_string(), vec!["b".to_string()])],
            IndexingOptions::default(),
            &cancel,
        )
        .unwrap();
        let ids = e.index().list_chunk_ids().unwrap();
        assert!(!ids.contains(&"b.go".to_string()));
        assert!(!ids.contains(&"b".to_string()));
        assert!(ids.contains(&"a".to_string()));
    }

    #[test]
    fn health_check_rebuilds_empty_index_and_purges_stale() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "A", "function", "a.go", (1, 5)));
        let mut e = engine(&g);
        let cancel = CancelToken::new();

        let health = e.ensure_index_health(&cancel).unwrap();
        assert!(health.rebuilt);
        assert_eq!(health.indexed, 0);

        // A second check over a healthy index does nothing.
        let health = e.ensure_index_health(&cancel).unwrap();
        assert!(!health.rebuilt);
        assert!((health.coverage - 1.0).abs() < 1e-9);
        assert_eq!(health.stale_deleted, 0);
    }

    #[test]
    fn search_by_text_caches_query_embeddings() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "A", "function", "a.go", (1, 5)));
        let mut e = engine(&g);
        let cancel = CancelToken::new();
        e.index_all(&cancel).unwrap();

        let first = e.search_by_text("what does A do", 5, "", &cancel).unwrap();
        assert!(!first.is_empty());
        assert!(e.query_cache.borrow().contains_key("what does A do"));
        let second = e.search_by_text("what does A do", 5, "", &cancel).unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn search_related_excludes_the_source_chunk() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "Alpha", "function", "a.go", (1, 5)));
        g.add_symbol(symbol("b", "Beta", "function", "b.go", (1, 5)));
        g.edges.push(Edge {
            from_id: "a".into(),
            to_id: "b".into(),
            kind: RelationKind::Calls,
            resolver: "heuristic".into(),
            confidence: 0.7,
            evidence: Evidence::default(),
        });
        let mut e = engine(&g);
        let cancel = CancelToken::new();
        e.index_all(&cancel).unwrap();

        let source = e.create_chunk(&g.symbols["a"]);
        let related = e.search_related(&source, 3, &cancel).unwrap();
        assert!(!related.is_empty());
        assert!(related.iter().all(|c| c.id != "a"));
        // The boosted graph neighbor is among the results.
        assert!(related.iter().any(|c| c.id == "b"));
    }

    #[test]
    fn proximity_boosts_decay_with_distance() {
        let mut g = Graph::new();
        g.add_symbol(symbol("a", "A", "function", "a.go", (1, 5)));
        g.add_symbol(symbol("b", "B", "function", "b.go", (1, 5)));
        g.add_symbol(symbol("c", "C", "function", "c.go", (1, 5)));
        g.edges.push(Edge {
            from_id: "a".into(),
            to_id: "b".into(),
            kind: RelationKind::Calls,
            resolver: "heuristic".into(),
            confidence: 0.7,
            evidence: Evidence::default(),
        });
        g.edges.push(Edge {
            from_id: "b".into(),
            to_id: "c".into(),
            kind: RelationKind::Calls,
            resolver: "heuristic".into(),
            confidence: 0.7,
            evidence: Evidence::default(),
        });
        let e = engine(&g);
        let boosts = e.proximity_boosts("a");
        assert_eq!(boosts.get("b"), Some(&0.2));
        assert_eq!(boosts.get("c"), Some(&0.1));
        assert!(boosts.get("a").is_none());
    }
}
