use crate::config::Config;
use crate::extractor::scan::{scan_repo, ScanOptions};
use crate::extractor::{parser_for, ExtractionAdapter, NoiseFilter};
use crate::generator::report::PipelineReport;
use crate::generator::updater::{DocUpdater, UpdatePlanOptions, UpdaterOptions};
use crate::graph::Graph;
use crate::knowledge::{create_embedder, create_text_generator, Engine, IndexingOptions};
use crate::planner::build_doc_update_plan;
use crate::resolver::ResolverChain;
use crate::retrieval::{extract_from_changes, RetrievalConfig};
use crate::store::Store;
use crate::util::CancelToken;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sequences the stages for bootstrap and incremental runs, accumulates the
/// run report, and enforces budgets. The graph is owned exclusively by the
/// orchestrator for the duration of a run.
pub struct Pipeline {
    repo_root: PathBuf,
    db_path: PathBuf,
    docs_dir: PathBuf,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(repo_root: PathBuf, db_path: Option<PathBuf>, docs_dir: Option<PathBuf>) -> Self {
        let db_path =
            db_path.unwrap_or_else(|| repo_root.join(".docsync").join("docsync.db"));
        let docs_dir = docs_dir.unwrap_or_else(|| repo_root.join("docs"));
        Self {
            repo_root,
            db_path,
            docs_dir,
            cancel: CancelToken::new(),
        }
    }

    fn report_path(&self) -> PathBuf {
        self.docs_dir.join("pipeline_report.json")
    }

    /// `scan`: build the full graph, run the resolver chain, persist the
    /// snapshot. No AI capabilities are touched.
    pub fn run_scan(&self) -> Result<()> {
        let mut report = PipelineReport::new("scan", &self.docs_dir.to_string_lossy());
        let result = self.scan_inner(&mut report);
        self.flush_report(&mut report, &result);
        result
    }

    fn scan_inner(&self, report: &mut PipelineReport) -> Result<()> {
        let graph = self.build_full_graph(report)?;
        self.persist_graph(&graph, report)?;
        info!(
            "scan complete: {} symbols, {} edges, {} unresolved",
            graph.symbols.len(),
            graph.edges.len(),
            graph.unresolved.len()
        );
        Ok(())
    }

    /// `generate`: full indexing and full documentation generation from the
    /// stored snapshot (building it first when the store is empty).
    pub fn run_generate(&self) -> Result<()> {
        let mut report = PipelineReport::new("bootstrap", &self.docs_dir.to_string_lossy());
        let result = self.generate_inner(&mut report);
        self.flush_report(&mut report, &result);
        result
    }

    fn generate_inner(&self, report: &mut PipelineReport) -> Result<()> {
        let store = Store::open(&self.db_path)?;
        let mut graph = {
            let handle = report.begin_stage("load_graph");
            let graph = store.load_graph();
            let counters = graph
                .as_ref()
                .map(|g| counters(&[("symbols", g.symbols.len()), ("edges", g.edges.len())]))
                .unwrap_or_default();
            report.end_stage(handle, "ok", counters, vec![], graph.as_ref().err());
            graph?
        };

        if graph.symbols.is_empty() {
            graph = self.build_full_graph(report)?;
            store.save_graph(&graph).context("save graph snapshot")?;
        }

        let config = Config::get();
        let embedder = create_embedder(&config.ai)?;
        let generator = create_text_generator(&config.ai)?;
        let mut engine = Engine::new(&graph, embedder, Box::new(store));

        // Health check gates full generation; degraded indexes rebuild here.
        let handle = report.begin_stage("index_health");
        let health = engine.ensure_index_health(&self.cancel);
        match &health {
            Ok(health) => {
                let mut stage_counters = counters(&[
                    ("expected", health.expected),
                    ("indexed", health.indexed),
                    ("stale_deleted", health.stale_deleted),
                ]);
                stage_counters.insert("coverage".into(), health.coverage);
                stage_counters.insert("freshness".into(), health.freshness);
                report.end_stage(handle, "ok", stage_counters, vec![], None);
                if health.coverage < 0.70 {
                    report.add_signal(
                        "index_low_coverage",
                        "index_health",
                        "warning",
                        &format!("index coverage {:.2}", health.coverage),
                        health.coverage,
                    );
                }
                if health.rebuilt {
                    report.add_signal(
                        "index_rebuilt",
                        "index_health",
                        "info",
                        "vector index was rebuilt before generation",
                        0.0,
                    );
                }
            }
            Err(err) => {
                report.end_stage(handle, "error", BTreeMap::new(), vec![], Some(err));
                report.add_signal(
                    "index_rebuild_failed",
                    "index_health",
                    "critical",
                    &format!("{err:#}"),
                    0.0,
                );
            }
        }

        if engine.has_embedder() {
            let handle = report.begin_stage("indexing");
            let added = engine.index_all(&self.cancel);
            let stage_counters = added
                .as_ref()
                .map(|n| counters(&[("embedded", *n)]))
                .unwrap_or_default();
            report.end_stage(handle, "ok", stage_counters, vec![], added.as_ref().err());
        }

        let handle = report.begin_stage("generation");
        let result = crate::generator::generate_full_docs(
            &engine,
            generator.as_deref(),
            &self.repo_root,
            &self.docs_dir,
            report,
            &self.cancel,
        );
        report.end_stage(handle, "ok", BTreeMap::new(), vec![], result.as_ref().err());
        result
    }

    /// `sync`: interpret the VCS delta as graph and documentation impact.
    /// With no delta and `--force`, fall back to a full resync.
    pub fn run_sync(&self, force: bool) -> Result<()> {
        let mut report = PipelineReport::new("incremental", &self.docs_dir.to_string_lossy());
        let result = self.sync_inner(force, &mut report);
        self.flush_report(&mut report, &result);
        result
    }

    fn sync_inner(&self, force: bool, report: &mut PipelineReport) -> Result<()> {
        let handle = report.begin_stage("detect_changes");
        let changes = crate::git::changed_files(&self.repo_root, "HEAD");
        let stage_counters = changes
            .as_ref()
            .map(|c| counters(&[("changed_files", c.len())]))
            .unwrap_or_default();
        report.end_stage(handle, "ok", stage_counters, vec![], changes.as_ref().err());
        let changes = changes?;

        if changes.is_empty() {
            if !force {
                info!("no changes detected");
                return Ok(());
            }
            info!("no git changes detected; running full resync (--force)");
            return self.generate_inner(report);
        }
        info!("detected {} changed files", changes.len());

        let store = Store::open(&self.db_path)?;
        let mut graph = store.load_graph()?;

        // Patch the graph: delete-by-file, then re-extract surviving files.
        let handle = report.begin_stage("graph_update");
        let patch = self.patch_graph(&mut graph, &changes);
        let stage_counters = patch
            .as_ref()
            .map(|p| {
                counters(&[
                    ("removed", p.removed.iter().map(|(_, ids)| ids.len()).sum()),
                    ("reextracted", p.updated_files.len()),
                ])
            })
            .unwrap_or_default();
        report.end_stage(handle, "ok", stage_counters, vec![], patch.as_ref().err());
        let patch = patch?;

        self.run_resolver_chain(&mut graph, report);
        self.persist_graph(&graph, report)?;

        // Impact retrieval over the patched graph.
        let handle = report.begin_stage("impact_retrieval");
        let subgraph = extract_from_changes(&graph, &changes, &RetrievalConfig::default());
        report.end_stage(
            handle,
            "ok",
            counters(&[
                ("seeds", subgraph.seed_ids.len()),
                ("nodes", subgraph.node_ids.len()),
                ("edges", subgraph.edges.len()),
            ]),
            vec![],
            None,
        );

        let config = Config::get();
        let embedder = create_embedder(&config.ai)?;
        let generator = create_text_generator(&config.ai)?;
        let mut engine = Engine::new(&graph, embedder, Box::new(store));

        // Planning against the current doc model.
        let handle = report.begin_stage("planning");
        let model = self.load_model_for_planning();
        let plan = build_doc_update_plan(model.as_ref(), &subgraph);
        report.end_stage(
            handle,
            "ok",
            counters(&[
                ("affected_sections", plan.affected_sections.len()),
                ("unmatched_symbols", plan.unmatched_symbols.len()),
            ]),
            vec![],
            None,
        );

        // Budgeted re-embedding of the changed files.
        if engine.has_embedder() {
            let handle = report.begin_stage("indexing");
            let added = engine.index_incremental(
                &patch.updated_files,
                &patch.removed,
                IndexingOptions {
                    max_chunks_per_run: config.docs.max_embed_chunks_per_run,
                },
                &self.cancel,
            );
            let stage_counters = added
                .as_ref()
                .map(|n| counters(&[("embedded", *n)]))
                .unwrap_or_default();
            report.end_stage(handle, "ok", stage_counters, vec![], added.as_ref().err());
            if let Err(err) = added {
                warn!("embedding update failed: {err:#}");
            }
        }

        // Doc update, falling back to full generation when the rendered
        // document does not exist yet.
        if !self.docs_dir.join("documentation.md").exists() {
            info!("documentation not found; generating from scratch");
            let handle = report.begin_stage("generation");
            let result = crate::generator::generate_full_docs(
                &engine,
                generator.as_deref(),
                &self.repo_root,
                &self.docs_dir,
                report,
                &self.cancel,
            );
            report.end_stage(handle, "ok", BTreeMap::new(), vec![], result.as_ref().err());
            return result;
        }

        let update_plan = UpdatePlanOptions {
            preferred_section_ids: plan.section_ids_by_impact(),
            section_confidence: plan.section_confidence(),
            min_confidence_for_llm: config.docs.min_confidence_for_llm,
        };
        let target_files = crate::util::dedupe_sorted(&[
            &patch.updated_files,
            &plan.triggered_files,
        ]);

        let handle = report.begin_stage("doc_update");
        let updater = DocUpdater::new(
            generator.as_deref(),
            &self.repo_root,
            &self.docs_dir,
            UpdaterOptions::from_config(config),
        );
        let result = updater.update_docs(
            &mut engine,
            &target_files,
            Some(&update_plan),
            report,
            &self.cancel,
        );
        report.end_stage(handle, "ok", BTreeMap::new(), vec![], result.as_ref().err());

        if let Err(err) = result {
            warn!("incremental doc update failed, falling back to full generation: {err:#}");
            let handle = report.begin_stage("generation");
            let result = crate::generator::generate_full_docs(
                &engine,
                generator.as_deref(),
                &self.repo_root,
                &self.docs_dir,
                report,
                &self.cancel,
            );
            report.end_stage(handle, "ok", BTreeMap::new(), vec![], result.as_ref().err());
            return result;
        }
        Ok(())
    }

    fn build_full_graph(&self, report: &mut PipelineReport) -> Result<Graph> {
        let handle = report.begin_stage("scan");
        let mut graph = Graph::new();
        let result = (|| -> Result<()> {
            self.cancel.check()?;
            let mut parser = parser_for("go")?;
            let adapter = ExtractionAdapter::new(NoiseFilter::default());
            let stats = scan_repo(
                &self.repo_root,
                parser.as_mut(),
                &adapter,
                &mut graph,
                ScanOptions::default(),
            )?;
            info!(
                "scanned {} files: {} extracted, {} failed, {} symbols",
                stats.scanned, stats.extracted, stats.failed, stats.symbols
            );
            Ok(())
        })();
        report.end_stage(
            handle,
            "ok",
            counters(&[("symbols", graph.symbols.len())]),
            vec![],
            result.as_ref().err(),
        );
        result?;

        self.run_resolver_chain(&mut graph, report);
        Ok(graph)
    }

    fn run_resolver_chain(&self, graph: &mut Graph, report: &mut PipelineReport) {
        let handle = report.begin_stage("resolver_chain");
        let mut chain = ResolverChain::default_chain(&self.repo_root);
        let results = chain.run(graph);
        let mut notes = Vec::new();
        for stage in &results {
            notes.push(format!(
                "{}: attempted={} resolved={} skipped={} unresolved={}->{} edges={}",
                stage.resolver,
                stage.stats.attempted,
                stage.stats.resolved,
                stage.stats.skipped,
                stage.unresolved_before,
                stage.unresolved_after,
                stage.edge_count,
            ));
            if let Some(err) = &stage.err {
                warn!("{} resolver failed: {err}", stage.resolver);
            }
        }
        for (reason, count) in graph.unresolved_reason_counts() {
            notes.push(format!("unresolved[{reason}]={count}"));
        }
        let failed = results.iter().any(|s| s.err.is_some());
        report.end_stage(
            handle,
            if failed { "error" } else { "ok" },
            counters(&[
                ("edges", graph.edges.len()),
                ("unresolved", graph.unresolved.len()),
            ]),
            notes,
            None,
        );
    }

    fn persist_graph(&self, graph: &Graph, report: &mut PipelineReport) -> Result<()> {
        let handle = report.begin_stage("persist");
        let store = Store::open(&self.db_path);
        let result = store.and_then(|store| store.save_graph(graph));
        report.end_stage(
            handle,
            "ok",
            counters(&[("symbols", graph.symbols.len()), ("edges", graph.edges.len())]),
            vec![],
            result.as_ref().err(),
        );
        result.context("persist graph snapshot")
    }

    fn patch_graph(
        &self,
        graph: &mut Graph,
        changes: &[crate::model::ChangedFile],
    ) -> Result<GraphPatch> {
        let mut parser = parser_for("go")?;
        let adapter = ExtractionAdapter::new(NoiseFilter::default());
        let mut patch = GraphPatch::default();

        for change in changes {
            if !change.path.ends_with(".go") {
                continue;
            }
            self.cancel.check()?;
            let removed = graph.remove_file(&change.path);
            let abs = self.repo_root.join(&change.path);
            if abs.exists() {
                match crate::extractor::scan::extract_one(
                    &abs,
                    &change.path,
                    parser.as_mut(),
                    &adapter,
                ) {
                    Ok(symbols) => {
                        for symbol in symbols {
                            graph.add_symbol(symbol);
                        }
                        patch.updated_files.push(change.path.clone());
                    }
                    Err(err) => {
                        warn!("failed to re-extract {}: {err:#}", change.path);
                    }
                }
            } else {
                patch.removed.push((change.path.clone(), removed));
            }
        }
        patch.updated_files.sort();
        patch.updated_files.dedup();
        graph.rebuild_indices();
        Ok(patch)
    }

    fn load_model_for_planning(&self) -> Option<crate::docmodel::DocModel> {
        let model_path = self.docs_dir.join("doc_model.json");
        if let Ok(model) = crate::docmodel::load(&model_path) {
            return Some(model);
        }
        let doc_path = self.docs_dir.join("documentation.md");
        std::fs::read_to_string(doc_path)
            .ok()
            .map(|content| crate::docmodel::build_from_markdown(&content))
    }

    fn flush_report(&self, report: &mut PipelineReport, result: &Result<()>) {
        if let Err(err) = result {
            report.add_signal("run_failed", "pipeline", "critical", &format!("{err:#}"), 0.0);
        }
        if let Err(save_err) = report.save(&self.report_path()) {
            warn!("failed to write pipeline report: {save_err:#}");
        }
    }
}

/// Result of patching the graph for a delta: files re-extracted and, per
/// deleted file, the symbol IDs that vanished with it.
#[derive(Debug, Default)]
struct GraphPatch {
    updated_files: Vec<String>,
    removed: Vec<(String, Vec<String>)>,
}

fn counters(entries: &[(&str, usize)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), *v as f64))
        .collect()
}
