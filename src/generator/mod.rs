use crate::docmodel::{self, DocModel, EvidenceStats, UpdateInfo};
use crate::knowledge::{Engine, SearchChunk, TextGenerator};
use crate::util::{now_rfc3339, CancelToken};
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub mod capability;
pub mod draft;
pub mod hydrator;
pub mod mermaid;
pub mod plan;
pub mod quality;
pub mod query;
pub mod report;
pub mod updater;

use capability::{extract_capabilities, Capability};
use draft::{build_section_draft, render_section_draft_markdown, serialize_section_draft};
use plan::SectionDocPlan;
use quality::{
    assess_writer_quality, is_structurally_degenerate, sanitize_generated_markdown,
    QUALITY_ACCEPT_THRESHOLD,
};
use report::{PipelineReport, SectionMetric};

/// Default number of LLM-rendered sections per full-doc run.
pub const DEFAULT_FULL_DOC_LLM_BUDGET: usize = 1;

const EVIDENCE_LIMITATIONS_HEADING: &str = "## Evidence Limitations";

/// Result of writing one section.
pub struct SectionOutput {
    pub markdown: String,
    pub chunks: Vec<SearchChunk>,
    pub evidence: EvidenceStats,
    pub metric: SectionMetric,
}

/// Evidence selection for a section: semantic search per derived query,
/// keyword-heuristic augmentation when retrieval is thin, section-kind
/// filtering, then diversity re-ranking.
pub fn select_section_evidence(
    engine: &Engine<'_>,
    plan: &SectionDocPlan,
    capabilities: &[Capability],
    cancel: &CancelToken,
) -> (Vec<String>, Vec<SearchChunk>, usize, usize) {
    let queries = query::build_section_queries(plan, capabilities);
    let per_query_top_k = (plan.top_k / queries.len().max(1)).max(4);

    let mut merged: Vec<SearchChunk> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut search_hits = 0usize;
    for q in &queries {
        match engine.search_by_text(q, per_query_top_k, "", cancel) {
            Ok(results) => {
                for chunk in results {
                    search_hits += 1;
                    if seen.insert(chunk.id.clone()) {
                        merged.push(chunk);
                    }
                }
            }
            Err(err) => {
                debug!("semantic search failed for {:?}: {err}", q);
            }
        }
    }

    let mut heuristic_hits = 0usize;
    if merged.len() < plan.top_k / 2 {
        let pool = engine.prepare_search_chunks();
        let picked =
            query::keyword_heuristic_selection(&pool, &plan.retrieval_keywords, plan.top_k);
        for chunk in picked {
            if seen.insert(chunk.id.clone()) {
                heuristic_hits += 1;
                merged.push(chunk);
            }
        }
    }

    let filtered = query::filter_by_section_kind(&plan.section_id, merged);
    let reranked = query::diversity_rerank(filtered, plan.top_k, 2);
    (queries, reranked, search_hits, heuristic_hits)
}

/// Produce one Markdown section from an evidence pack: draft, deterministic
/// render, conditional AI refinement under the quality gate, diagrams, and
/// the low-evidence notice.
#[allow(clippy::too_many_arguments)]
pub fn write_section(
    engine: &Engine<'_>,
    generator: Option<&dyn TextGenerator>,
    repo_root: &Path,
    plan: &SectionDocPlan,
    capabilities: &[Capability],
    llm_budget: &mut usize,
    cancel: &CancelToken,
) -> SectionOutput {
    let (queries, chunks, search_hits, heuristic_hits) =
        select_section_evidence(engine, plan, capabilities, cancel);
    let evidence = query::build_evidence_stats(plan, &queries, &chunks);

    let draft = build_section_draft(&plan.section_id, &plan.title, &chunks, capabilities);
    let fallback = render_section_draft_markdown(&draft);
    let fallback_quality = assess_writer_quality(&plan.section_id, &fallback);

    let mut markdown = fallback.clone();
    let mut used_llm = false;
    let mut used_fallback = true;
    let mut writer_quality = fallback_quality.clone();

    if plan.allow_llm && *llm_budget > 0 {
        if let Some(generator) = generator {
            *llm_budget -= 1;
            let context = hydrator::build_draft_llm_context(repo_root, &draft, &chunks);
            match generator.render_section_from_draft(
                &serialize_section_draft(&draft),
                &context,
                cancel,
            ) {
                Ok(raw) => {
                    let sanitized = sanitize_generated_markdown(&raw);
                    let llm_quality = assess_writer_quality(&plan.section_id, &sanitized);
                    if llm_quality.score >= QUALITY_ACCEPT_THRESHOLD
                        && !is_structurally_degenerate(&sanitized)
                    {
                        markdown = sanitized;
                        writer_quality = llm_quality;
                        used_llm = true;
                        used_fallback = false;
                    } else {
                        debug!(
                            "llm output for {} rejected (score {:.2}); keeping fallback",
                            plan.section_id, llm_quality.score
                        );
                    }
                }
                Err(err) => warn!("llm render failed for {}: {err}", plan.section_id),
            }
        }
    }

    markdown = apply_section_diagrams(&plan.section_id, markdown, &chunks);
    if evidence.low_evidence {
        markdown = append_evidence_limitations(markdown, &evidence);
    }
    // Diagrams can satisfy the overview requirement after the fact.
    if used_fallback {
        writer_quality = assess_writer_quality(&plan.section_id, &markdown);
    }

    let file_diversity = chunks
        .iter()
        .map(|c| c.file_key())
        .collect::<HashSet<String>>()
        .len();

    SectionOutput {
        markdown,
        metric: SectionMetric {
            section_id: plan.section_id.clone(),
            title: plan.title.clone(),
            query_count: queries.len(),
            search_hits,
            heuristic_hits,
            chunk_count: chunks.len(),
            source_count: evidence.source_count,
            file_diversity,
            evidence_confidence: evidence.confidence,
            evidence_coverage: evidence.coverage,
            low_evidence: evidence.low_evidence,
            writer_quality_score: writer_quality.score,
            writer_quality_issues: writer_quality.issues.clone(),
            used_draft: true,
            used_llm,
            used_fallback,
        },
        evidence,
        chunks,
    }
}

fn apply_section_diagrams(section_id: &str, markdown: String, chunks: &[SearchChunk]) -> String {
    match section_id {
        "overview" => {
            let diagram = mermaid::generate_architecture_flow(chunks);
            mermaid::insert_diagram_under_heading(&markdown, "## End-to-End Flow", &diagram)
        }
        "development" => {
            let diagram = mermaid::generate_component_snapshot(chunks);
            mermaid::insert_diagram_under_heading(&markdown, "## Architecture Snapshot", &diagram)
        }
        _ => markdown,
    }
}

fn append_evidence_limitations(markdown: String, evidence: &EvidenceStats) -> String {
    if markdown.contains(EVIDENCE_LIMITATIONS_HEADING) {
        return markdown;
    }
    format!(
        "{}\n\n{EVIDENCE_LIMITATIONS_HEADING}\n\nThis section was generated from limited code \
evidence (coverage {:.2}, confidence {:.2}); statements may be incomplete.\n",
        markdown.trim_end(),
        evidence.coverage,
        evidence.confidence
    )
}

/// Full documentation generation: canonical scaffold, one written section
/// per plan entry, model save, and Markdown render.
pub fn generate_full_docs(
    engine: &Engine<'_>,
    generator: Option<&dyn TextGenerator>,
    repo_root: &Path,
    docs_dir: &Path,
    report: &mut PipelineReport,
    cancel: &CancelToken,
) -> Result<()> {
    let full_plan = plan::default_full_doc_plan();
    let all_chunks = engine.prepare_search_chunks();
    let capabilities = extract_capabilities(&all_chunks, 5);

    let mut model = docmodel::build_from_markdown("");
    let now = now_rfc3339();
    let mut llm_budget = DEFAULT_FULL_DOC_LLM_BUDGET;

    for section_plan in &full_plan.sections {
        cancel.check()?;
        let output = write_section(
            engine,
            generator,
            repo_root,
            section_plan,
            &capabilities,
            &mut llm_budget,
            cancel,
        );

        emit_section_signals(report, &output.metric);
        if let Some(section) = model.section_by_id_mut(&section_plan.section_id) {
            section.title = section_plan.title.clone();
            section.content_md = output.markdown.trim().to_string();
            section.sources = docmodel::merge_sources(&[], &output.chunks);
            section.evidence = Some(output.evidence.clone());
            section.last_updated = Some(UpdateInfo {
                commit_sha: "HEAD".into(),
                timestamp: now.clone(),
            });
        }
        report.add_section_metric(output.metric);
    }

    model.meta.generated_at = now;
    save_model_and_markdown(&mut model, docs_dir)?;
    info!("full documentation generated in {}", docs_dir.display());
    Ok(())
}

pub(crate) fn emit_section_signals(report: &mut PipelineReport, metric: &SectionMetric) {
    if metric.low_evidence {
        report.add_signal(
            "low_evidence_section",
            "writer",
            "warning",
            &format!(
                "section {} has low evidence (coverage {:.2}, confidence {:.2})",
                metric.section_id, metric.evidence_coverage, metric.evidence_confidence
            ),
            metric.evidence_coverage,
        );
    }
    if metric.search_hits == 0 && metric.chunk_count > 0 {
        report.add_signal(
            "zero_semantic_hits",
            "writer",
            "info",
            &format!("section {} used no semantic retrieval hits", metric.section_id),
            0.0,
        );
    }
    if metric.heuristic_hits > metric.search_hits {
        report.add_signal(
            "heuristic_dominant",
            "writer",
            "info",
            &format!(
                "section {} evidence is mostly keyword-heuristic ({} vs {})",
                metric.section_id, metric.heuristic_hits, metric.search_hits
            ),
            metric.heuristic_hits as f64,
        );
    }
    if metric.writer_quality_score < QUALITY_ACCEPT_THRESHOLD {
        report.add_signal(
            "writer_quality_low",
            "writer",
            "warning",
            &format!(
                "section {} writer quality {:.2}",
                metric.section_id, metric.writer_quality_score
            ),
            metric.writer_quality_score,
        );
    }
}

/// Validate and persist the model, then render the Markdown view next to it.
pub fn save_model_and_markdown(model: &mut DocModel, docs_dir: &Path) -> Result<()> {
    docmodel::schema::ensure_schema_file(docs_dir)?;
    docmodel::normalize(model);
    model.validate()?;
    docmodel::save(&docs_dir.join("doc_model.json"), model)?;
    let markdown = docmodel::render_markdown(model);
    std::fs::write(docs_dir.join("documentation.md"), markdown)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::knowledge::embedder::MockEmbedder;
    use crate::knowledge::index::MemoryIndex;
    use crate::model::{Symbol, SymbolMetadata};

    fn symbol(id: &str, name: &str, kind: &str, file: &str) -> Symbol {
        Symbol {
            id: id.into(),
            file_path: file.into(),
            start_line: 1,
            end_line: 20,
            language: "go".into(),
            package: "pipeline".into(),
            kind: kind.into(),
            name: name.into(),
            doc: format!("{name} coordinates part of the documentation flow."),
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

    fn seeded_graph() -> Graph {
        let mut g = Graph::new();
        g.add_symbol(symbol("run", "RunPipeline", "function", "pipeline.go"));
        g.add_symbol(symbol("store", "StoreGraph", "function", "store.go"));
        g.add_symbol(symbol("render", "RenderMarkdown", "function", "render.go"));
        g
    }

    #[test]
    fn full_generation_writes_model_markdown_and_report_sections() {
        let graph = seeded_graph();
        let mut engine = Engine::new(
            &graph,
            Some(Box::new(MockEmbedder::new(8))),
            Box::new(MemoryIndex::new()),
        );
        let cancel = CancelToken::new();
        engine.index_all(&cancel).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        let mut report = PipelineReport::new("bootstrap", docs.to_str().unwrap());
        generate_full_docs(&engine, None, dir.path(), &docs, &mut report, &cancel).unwrap();

        assert!(docs.join("doc_model.json").exists());
        assert!(docs.join("doc_model.schema.json").exists());
        let markdown = std::fs::read_to_string(docs.join("documentation.md")).unwrap();
        assert!(markdown.contains("# Overview"));
        assert!(markdown.contains("# Key Features"));
        assert!(markdown.contains("# Development"));
        assert!(markdown.contains("## End-to-End Flow"));
        assert!(markdown.contains("## Architecture Snapshot"));
        assert_eq!(report.sections.len(), 3);

        // The persisted model validates and carries evidence stats.
        let model = docmodel::load(&docs.join("doc_model.json")).unwrap();
        let overview = model.section_by_id("overview").unwrap();
        assert!(overview.evidence.is_some());
        assert!(!overview.sources.is_empty());
    }

    #[test]
    fn writer_appends_evidence_limitations_on_thin_evidence() {
        let graph = Graph::new(); // empty graph -> no evidence at all
        let engine = Engine::new(&graph, None, Box::new(MemoryIndex::new()));
        let cancel = CancelToken::new();
        let full_plan = plan::default_full_doc_plan();
        let mut budget = 0usize;
        let output = write_section(
            &engine,
            None,
            Path::new("."),
            full_plan.section_by_id("key-features").unwrap(),
            &[],
            &mut budget,
            &cancel,
        );
        assert!(output.evidence.low_evidence);
        assert!(output.markdown.contains("## Evidence Limitations"));
        // Idempotent: the notice is not duplicated.
        let again = append_evidence_limitations(output.markdown.clone(), &output.evidence);
        assert_eq!(
            again.matches("## Evidence Limitations").count(),
            output.markdown.matches("## Evidence Limitations").count()
        );
    }

    #[test]
    fn llm_output_below_quality_gate_falls_back() {
        use crate::knowledge::textgen::mock::MockGenerator;
        let graph = seeded_graph();
        let mut engine = Engine::new(
            &graph,
            Some(Box::new(MockEmbedder::new(8))),
            Box::new(MemoryIndex::new()),
        );
        let cancel = CancelToken::new();
        engine.index_all(&cancel).unwrap();

        let generator = MockGenerator {
            section_markdown: "tiny".into(), // structurally degenerate
            ..MockGenerator::default()
        };
        let full_plan = plan::default_full_doc_plan();
        let mut budget = 1usize;
        let output = write_section(
            &engine,
            Some(&generator),
            Path::new("."),
            full_plan.section_by_id("key-features").unwrap(),
            &[],
            &mut budget,
            &cancel,
        );
        assert!(!output.metric.used_llm);
        assert!(output.metric.used_fallback);
        assert_eq!(budget, 0);
        assert!(generator.call_count() > 0);
    }
}
