use crate::docmodel::SourceRef;
use crate::generator::draft::{DraftClaim, SectionDraft};
use crate::generator::query::chunk_richness_score;
use crate::knowledge::{ChunkSource, SearchChunk};
use std::path::Path;

#[derive(Debug, Clone, Copy)]
struct DraftContextBudget {
    max_layer_a_chunks: usize,
    max_layer_b_blocks: usize,
    max_block_lines: i64,
    min_flow_blocks: usize,
}

const DEFAULT_BUDGET: DraftContextBudget = DraftContextBudget {
    max_layer_a_chunks: 8,
    max_layer_b_blocks: 4,
    max_block_lines: 60,
    min_flow_blocks: 2,
};

const FLOW_TOKENS: &[&str] = &[
    "flow", "pipeline", "sequence", "before", "after", "when", "then", "route",
];

/// Two-level evidence context for AI rendering: Layer A carries the most
/// information-rich summary chunks, Layer B hydrates code windows around
/// claim sources, flow-oriented claims first.
pub fn build_draft_llm_context(
    repo_root: &Path,
    draft: &SectionDraft,
    chunks: &[SearchChunk],
) -> Vec<SearchChunk> {
    let budget = DEFAULT_BUDGET;
    let layer_a = build_layer_a(chunks, budget.max_layer_a_chunks);
    let layer_b = build_layer_b(repo_root, draft, budget);
    merge_chunk_lists(layer_a, layer_b, budget.max_layer_a_chunks + budget.max_layer_b_blocks)
}

fn build_layer_a(chunks: &[SearchChunk], limit: usize) -> Vec<SearchChunk> {
    if chunks.is_empty() || limit == 0 {
        return Vec::new();
    }
    let mut ranked: Vec<&SearchChunk> = chunks.iter().collect();
    ranked.sort_by(|a, b| {
        chunk_richness_score(b)
            .cmp(&chunk_richness_score(a))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
        .into_iter()
        .take(limit)
        .map(|chunk| {
            let mut layer = chunk.clone();
            layer.body = summarize_evidence_chunk(chunk);
            layer
        })
        .collect()
}

fn build_layer_b(
    repo_root: &Path,
    draft: &SectionDraft,
    budget: DraftContextBudget,
) -> Vec<SearchChunk> {
    if draft.claims.is_empty() || budget.max_layer_b_blocks == 0 {
        return Vec::new();
    }

    let mut claims: Vec<&DraftClaim> = draft.claims.iter().collect();
    claims.sort_by(|a, b| {
        hydration_weight(b)
            .cmp(&hydration_weight(a))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut out: Vec<SearchChunk> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut flow_added = 0usize;

    // Pass 1: guarantee a minimum number of flow-oriented evidence blocks.
    for claim in &claims {
        if out.len() >= budget.max_layer_b_blocks || flow_added >= budget.min_flow_blocks {
            break;
        }
        if !is_flow_claim(claim) {
            continue;
        }
        flow_added += collect_hydrated_blocks(
            repo_root,
            claim,
            budget.max_block_lines,
            budget.max_layer_b_blocks,
            &mut seen,
            &mut out,
        );
    }

    // Pass 2: fill the remaining budget by hydration priority.
    for claim in &claims {
        if out.len() >= budget.max_layer_b_blocks {
            break;
        }
        if hydration_weight(claim) <= 0 {
            continue;
        }
        collect_hydrated_blocks(
            repo_root,
            claim,
            budget.max_block_lines,
            budget.max_layer_b_blocks,
            &mut seen,
            &mut out,
        );
    }
    out
}

fn collect_hydrated_blocks(
    repo_root: &Path,
    claim: &DraftClaim,
    max_lines: i64,
    max_blocks: usize,
    seen: &mut std::collections::HashSet<String>,
    out: &mut Vec<SearchChunk>,
) -> usize {
    let mut added = 0;
    for source in &claim.sources {
        if out.len() >= max_blocks {
            break;
        }
        let key = format!("{}:{}-{}", source.file_path, source.start_line, source.end_line);
        if source.file_path.is_empty() || seen.contains(&key) {
            continue;
        }
        let Some(block) = hydrate_source_block(repo_root, claim, source, max_lines) else {
            continue;
        };
        seen.insert(key);
        out.push(block);
        added += 1;
    }
    added
}

/// ±4-line window around a claim's source, hard-capped in length, carried as
/// an `evidence_block` chunk.
fn hydrate_source_block(
    repo_root: &Path,
    claim: &DraftClaim,
    source: &SourceRef,
    max_lines: i64,
) -> Option<SearchChunk> {
    let path = source.file_path.trim();
    if path.is_empty() {
        return None;
    }
    let body = std::fs::read_to_string(repo_root.join(path))
        .or_else(|_| std::fs::read_to_string(path))
        .ok()?;
    let lines: Vec<&str> = body.split('\n').collect();
    if lines.is_empty() {
        return None;
    }

    let mut start = source.start_line.max(1);
    let mut end = source.end_line.max(start);
    start -= 4;
    end += 4;
    if start < 1 {
        start = 1;
    }
    if end > lines.len() as i64 {
        end = lines.len() as i64;
    }
    if max_lines > 0 && end - start + 1 > max_lines {
        end = (start + max_lines - 1).min(lines.len() as i64);
    }

    let snippet = lines[(start - 1) as usize..end as usize].join("\n");
    if snippet.trim().is_empty() {
        return None;
    }

    Some(SearchChunk {
        id: format!("evidence:{}:{}-{}", source.symbol_id, start, end),
        name: source.symbol_id.clone(),
        kind: "evidence_block".into(),
        package: Path::new(path)
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        file_path: path.to_string(),
        description: format!("Hydrated evidence block for claim `{}`.", claim.id),
        signature: format!("{path}:{start}-{end}"),
        body: snippet,
        content_hash: String::new(),
        dependencies: Vec::new(),
        used_by: Vec::new(),
        sources: vec![ChunkSource {
            symbol_id: source.symbol_id.clone(),
            file_path: source.file_path.clone(),
            start_line: start,
            end_line: end,
            relation: source.relation.clone(),
            confidence: source.confidence,
        }],
    })
}

fn hydration_weight(claim: &DraftClaim) -> i64 {
    let text = claim.text.to_lowercase();
    let mut weight = 0;
    if claim.confidence < 0.75 {
        weight += 3;
    }
    for token in FLOW_TOKENS {
        if text.contains(token) {
            weight += 2;
        }
    }
    weight
}

fn is_flow_claim(claim: &DraftClaim) -> bool {
    let text = claim.text.to_lowercase();
    FLOW_TOKENS.iter().any(|token| text.contains(token))
}

fn summarize_evidence_chunk(chunk: &SearchChunk) -> String {
    let mut out = String::new();
    if !chunk.signature.trim().is_empty() {
        out.push_str(chunk.signature.trim());
        out.push('\n');
    }
    if !chunk.description.trim().is_empty() {
        out.push_str(chunk.description.trim());
        out.push('\n');
    }
    if !chunk.dependencies.is_empty() {
        out.push_str("Depends on: ");
        out.push_str(&chunk.dependencies.join(", "));
        out.push('\n');
    }
    let text = out.trim().to_string();
    if text.is_empty() {
        chunk.body.trim().to_string()
    } else {
        text
    }
}

fn merge_chunk_lists(
    layer_a: Vec<SearchChunk>,
    layer_b: Vec<SearchChunk>,
    limit: usize,
) -> Vec<SearchChunk> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(limit);
    for chunk in layer_a.into_iter().chain(layer_b) {
        if out.len() >= limit {
            break;
        }
        if seen.insert(chunk.id.clone()) {
            out.push(chunk);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn claim(id: &str, text: &str, file: &str, start: i64, end: i64, confidence: f64) -> DraftClaim {
        DraftClaim {
            id: id.into(),
            text: text.into(),
            confidence,
            sources: vec![SourceRef {
                symbol_id: format!("sym-{id}"),
                file_path: file.into(),
                start_line: start,
                end_line: end,
                relation: "primary".into(),
                commit_sha: "HEAD".into(),
                confidence,
            }],
        }
    }

    fn draft(claims: Vec<DraftClaim>) -> SectionDraft {
        SectionDraft {
            section_id: "overview".into(),
            title: "Overview".into(),
            summary: String::new(),
            claims,
            mermaid: String::new(),
        }
    }

    #[test]
    fn flow_claims_hydrate_evidence_blocks_with_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.go");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "package flow\n\nfunc StepA() {{\n\tStepB()\n}}\n\nfunc StepB() {{}}").unwrap();

        let d = draft(vec![claim(
            "ov-1",
            "The flow routes StepA then StepB.",
            "flow.go",
            3,
            5,
            0.9,
        )]);
        let context = build_draft_llm_context(dir.path(), &d, &[]);
        let block = context
            .iter()
            .find(|c| c.kind == "evidence_block")
            .expect("expected a hydrated evidence block");
        assert!(block.body.contains("StepB"));
        assert_eq!(block.sources[0].relation, "primary");
        // ±4 window clamps at file start.
        assert_eq!(block.sources[0].start_line, 1);
    }

    #[test]
    fn low_confidence_claims_hydrate_even_without_flow_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.go");
        std::fs::write(&path, "package x\n\nfunc Q() {}\n").unwrap();
        let d = draft(vec![claim("ov-1", "Q parses input.", "x.go", 3, 3, 0.4)]);
        let context = build_draft_llm_context(dir.path(), &d, &[]);
        assert!(context.iter().any(|c| c.kind == "evidence_block"));
    }

    #[test]
    fn duplicate_windows_are_deduped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.go"), "package x\n\nfunc Q() {}\n").unwrap();
        let d = draft(vec![
            claim("ov-1", "flow one", "x.go", 3, 3, 0.4),
            claim("ov-2", "flow two", "x.go", 3, 3, 0.4),
        ]);
        let context = build_draft_llm_context(dir.path(), &d, &[]);
        let blocks: Vec<&SearchChunk> =
            context.iter().filter(|c| c.kind == "evidence_block").collect();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn layer_a_prefers_rich_chunks_and_summarizes_bodies() {
        let rich = SearchChunk {
            id: "rich".into(),
            name: "Rich".into(),
            kind: "struct".into(),
            description: "well described".into(),
            signature: "type Rich struct".into(),
            body: "a very long body".into(),
            dependencies: vec!["A".into(), "B".into()],
            ..SearchChunk::default()
        };
        let poor = SearchChunk {
            id: "poor".into(),
            name: "poor".into(),
            kind: "variable".into(),
            ..SearchChunk::default()
        };
        let d = draft(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let context = build_draft_llm_context(dir.path(), &d, &[poor, rich]);
        assert_eq!(context[0].id, "rich");
        assert!(context[0].body.contains("type Rich struct"));
        assert!(context[0].body.contains("Depends on: A, B"));
    }

    #[test]
    fn missing_files_are_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let d = draft(vec![claim("ov-1", "flow text", "ghost.go", 1, 2, 0.4)]);
        let context = build_draft_llm_context(dir.path(), &d, &[]);
        assert!(context.iter().all(|c| c.kind != "evidence_block"));
    }
}
