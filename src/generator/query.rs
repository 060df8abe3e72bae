use crate::docmodel::EvidenceStats;
use crate::generator::capability::Capability;
use crate::generator::plan::SectionDocPlan;
use crate::knowledge::SearchChunk;

/// Derive retrieval queries from plan intent and capability labels,
/// deduplicated by whitespace-normalized lowercase form.
pub fn build_section_queries(plan: &SectionDocPlan, capabilities: &[Capability]) -> Vec<String> {
    let mut queries = Vec::with_capacity(8);
    let base = plan.query_text();
    if !base.trim().is_empty() {
        queries.push(base);
    }
    if !plan.goal.trim().is_empty() {
        queries.push(plan.goal.clone());
    }
    for block in &plan.required_blocks {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        queries.push(format!("{} {}", plan.section_id, block));
    }
    for capability in capabilities.iter().take(4) {
        if !capability.title.trim().is_empty() {
            queries.push(format!("{} capability {}", plan.section_id, capability.title));
        }
        if !capability.intent.trim().is_empty() {
            queries.push(capability.intent.clone());
        }
    }
    unique_non_empty(queries)
}

fn unique_non_empty(input: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(input.len());
    for query in input {
        let normalized = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if normalized.is_empty() || !seen.insert(normalized) {
            continue;
        }
        out.push(query);
    }
    out
}

/// Score each chunk by keyword substring hits (+3 each) plus a kind bonus;
/// used when semantic search returns too little.
pub fn keyword_heuristic_selection(
    chunks: &[SearchChunk],
    keywords: &[String],
    limit: usize,
) -> Vec<SearchChunk> {
    let mut scored: Vec<(i64, &SearchChunk)> = chunks
        .iter()
        .map(|chunk| {
            let haystack = [
                chunk.name.as_str(),
                chunk.description.as_str(),
                chunk.signature.as_str(),
                chunk.package.as_str(),
                chunk.file_path.as_str(),
            ]
            .join(" ")
            .to_lowercase();
            let mut score: i64 = keywords
                .iter()
                .filter(|kw| !kw.is_empty() && haystack.contains(kw.to_lowercase().as_str()))
                .count() as i64
                * 3;
            if matches!(
                chunk.kind.as_str(),
                "function" | "method" | "struct" | "interface" | "file_module"
            ) {
                score += 1;
            }
            (score, chunk)
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    let hits: Vec<SearchChunk> = scored
        .iter()
        .filter(|(score, _)| *score > 0)
        .take(limit)
        .map(|(_, chunk)| (*chunk).clone())
        .collect();
    if !hits.is_empty() {
        return hits;
    }
    // Fall back to anything rather than starving the section.
    scored
        .into_iter()
        .take(limit)
        .map(|(_, chunk)| chunk.clone())
        .collect()
}

/// Section-kind filter applied to retrieval results before re-ranking.
pub fn filter_by_section_kind(section_id: &str, chunks: Vec<SearchChunk>) -> Vec<SearchChunk> {
    let filtered: Vec<SearchChunk> = chunks
        .iter()
        .filter(|chunk| match section_id {
            "overview" => !matches!(chunk.kind.as_str(), "constant" | "variable"),
            "key-features" => {
                let name = chunk.name.to_lowercase();
                !name.contains("_test") && !name.ends_with("test")
            }
            _ => true,
        })
        .cloned()
        .collect();
    if filtered.is_empty() { chunks } else { filtered }
}

/// Informational richness used for ordering and backfill.
pub fn chunk_richness_score(chunk: &SearchChunk) -> i64 {
    let mut score = 0i64;
    if !chunk.description.trim().is_empty() {
        score += 2;
    }
    if !chunk.signature.trim().is_empty() {
        score += 2;
    }
    if !chunk.body.trim().is_empty() {
        score += 2;
    }
    score += chunk.dependencies.len() as i64;
    score += chunk.used_by.len() as i64;
    match chunk.kind.as_str() {
        "function" | "method" | "struct" | "interface" => score += 2,
        "file_module" => score -= 1,
        _ => {}
    }
    score
}

/// Keep retrieval results representative across files: a per-file cap first,
/// then deterministic backfill by richness.
pub fn diversity_rerank(
    chunks: Vec<SearchChunk>,
    limit: usize,
    per_file_limit: usize,
) -> Vec<SearchChunk> {
    if limit == 0 || chunks.len() <= limit {
        return chunks;
    }
    let per_file_limit = if per_file_limit == 0 { 2 } else { per_file_limit };

    let mut bucket_count: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();
    let mut selected = Vec::with_capacity(limit);
    let mut deferred = Vec::new();
    for chunk in chunks {
        let key = chunk.file_key();
        let count = bucket_count.entry(key).or_insert(0);
        if *count < per_file_limit {
            *count += 1;
            selected.push(chunk);
            if selected.len() == limit {
                return selected;
            }
        } else {
            deferred.push(chunk);
        }
    }

    deferred.sort_by(|a, b| {
        chunk_richness_score(b)
            .cmp(&chunk_richness_score(a))
            .then_with(|| a.id.cmp(&b.id))
    });
    for chunk in deferred {
        if selected.len() >= limit {
            break;
        }
        selected.push(chunk);
    }
    selected
}

/// Coverage/confidence statistics for a section's evidence set.
pub fn build_evidence_stats(
    plan: &SectionDocPlan,
    queries: &[String],
    chunks: &[SearchChunk],
) -> EvidenceStats {
    let chunk_count = chunks.len();
    let mut source_count = 0usize;
    let mut confidence_sum = 0.0;
    let mut confidence_n = 0.0;
    let mut files: std::collections::HashSet<String> = std::collections::HashSet::new();

    for chunk in chunks {
        let key = chunk.file_key();
        if !key.trim().is_empty() {
            files.insert(key);
        }
        for source in &chunk.sources {
            source_count += 1;
            if source.confidence > 0.0 {
                confidence_sum += source.confidence;
                confidence_n += 1.0;
            }
        }
    }
    if source_count == 0 {
        source_count = chunk_count;
    }

    let min_evidence = plan.min_evidence.max(1);
    let coverage = (chunk_count as f64 / min_evidence as f64).clamp(0.0, 1.0);

    let base_confidence = if confidence_n > 0.0 {
        confidence_sum / confidence_n
    } else {
        0.55
    };
    let diversity_bonus = if chunk_count > 0 {
        0.2 * (files.len() as f64 / chunk_count as f64)
    } else {
        0.0
    };
    let confidence = (base_confidence + diversity_bonus).clamp(0.0, 1.0);

    EvidenceStats {
        coverage,
        confidence,
        chunk_count,
        source_count,
        query_count: queries.len(),
        low_evidence: coverage < 0.7 || confidence < 0.6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::plan::default_full_doc_plan;
    use crate::knowledge::ChunkSource;

    fn chunk(id: &str, file: &str, kind: &str) -> SearchChunk {
        SearchChunk {
            id: id.into(),
            name: id.to_uppercase(),
            kind: kind.into(),
            file_path: file.into(),
            description: format!("{id} does work"),
            signature: format!("func {id}()"),
            sources: vec![ChunkSource {
                symbol_id: id.into(),
                file_path: file.into(),
                start_line: 1,
                end_line: 5,
                relation: "primary".into(),
                confidence: 0.8,
            }],
            ..SearchChunk::default()
        }
    }

    #[test]
    fn queries_are_deduplicated_by_normalized_form() {
        let plan = default_full_doc_plan();
        let overview = plan.section_by_id("overview").unwrap();
        let queries = build_section_queries(overview, &[]);
        assert!(!queries.is_empty());
        let normalized: std::collections::HashSet<String> =
            queries.iter().map(|q| q.to_lowercase()).collect();
        assert_eq!(normalized.len(), queries.len());
    }

    #[test]
    fn keyword_selection_prefers_hits_and_falls_back() {
        let chunks = vec![chunk("scanner", "scan.go", "function"), chunk("other", "o.go", "constant")];
        let hits = keyword_heuristic_selection(&chunks, &["scan".to_string()], 5);
        assert_eq!(hits[0].id, "scanner");

        let none = keyword_heuristic_selection(&chunks, &["zzz".to_string()], 1);
        assert_eq!(none.len(), 1);
    }

    #[test]
    fn overview_filter_drops_constants_unless_empty() {
        let chunks = vec![chunk("a", "a.go", "constant"), chunk("b", "b.go", "function")];
        let filtered = filter_by_section_kind("overview", chunks.clone());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "b");

        let only_const = vec![chunk("a", "a.go", "constant")];
        let kept = filter_by_section_kind("overview", only_const);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn key_features_filter_drops_test_named_chunks() {
        let chunks = vec![chunk("run_test", "t.go", "function"), chunk("real", "r.go", "function")];
        let filtered = filter_by_section_kind("key-features", chunks);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "real");
    }

    #[test]
    fn diversity_rerank_caps_per_file_then_backfills() {
        let chunks = vec![
            chunk("a1", "a.go", "function"),
            chunk("a2", "a.go", "function"),
            chunk("a3", "a.go", "function"),
            chunk("b1", "b.go", "function"),
        ];
        let reranked = diversity_rerank(chunks, 3, 2);
        let ids: Vec<&str> = reranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn evidence_stats_flag_low_evidence() {
        let plan = default_full_doc_plan();
        let overview = plan.section_by_id("overview").unwrap();
        let stats = build_evidence_stats(overview, &["q".to_string()], &[chunk("a", "a.go", "function")]);
        // One chunk against min_evidence=6 is low coverage.
        assert!(stats.coverage < 0.7);
        assert!(stats.low_evidence);
        assert_eq!(stats.query_count, 1);

        let many: Vec<SearchChunk> = (0..8)
            .map(|i| chunk(&format!("c{i}"), &format!("f{i}.go"), "function"))
            .collect();
        let stats = build_evidence_stats(overview, &["q".to_string()], &many);
        assert!((stats.coverage - 1.0).abs() < 1e-9);
        assert!(!stats.low_evidence);
    }
}
