use crate::docmodel::DocModel;
use crate::knowledge::SearchChunk;
use crate::retrieval::Subgraph;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Decides which sections to update first.
#[derive(Debug, Default, Serialize)]
pub struct DocUpdatePlan {
    pub triggered_symbol_ids: Vec<String>,
    pub triggered_files: Vec<String>,
    pub affected_sections: Vec<SectionImpact>,
    pub unmatched_symbols: Vec<String>,
}

/// Why a section should be updated.
#[derive(Debug, Clone, Serialize)]
pub struct SectionImpact {
    pub section_id: String,
    pub score: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub trigger_symbols: Vec<String>,
    pub trigger_files: Vec<String>,
}

const SYMBOL_SCORE_FALLBACK: f64 = 0.45;
const FILE_MATCH_CONFIDENCE: f64 = 0.30;

/// Map a retrieval subgraph onto the document model's section sources.
///
/// A section scores `1.0 + 0.2·avg(symbol score, source confidence)` per
/// matching symbol source and `+0.35` per matching file source; sections
/// with positive score are emitted sorted by confidence, then score, then
/// ID. Symbols matching no section are reported as unmatched.
pub fn build_doc_update_plan(model: Option<&DocModel>, subgraph: &Subgraph) -> DocUpdatePlan {
    let mut plan = DocUpdatePlan {
        triggered_symbol_ids: subgraph.node_ids.clone(),
        triggered_files: subgraph.updated_files.clone(),
        ..DocUpdatePlan::default()
    };

    let Some(model) = model else {
        plan.unmatched_symbols = subgraph.node_ids.clone();
        return plan;
    };
    if model.sections.is_empty() || subgraph.node_ids.is_empty() {
        plan.unmatched_symbols = subgraph.node_ids.clone();
        return plan;
    }

    let symbol_set: HashSet<&String> = subgraph.node_ids.iter().collect();
    let file_set: HashSet<&String> = subgraph.updated_files.iter().collect();
    let mut matched_symbols: HashSet<String> = HashSet::new();
    let mut impacts = Vec::new();

    for section in &model.sections {
        let mut score = 0.0;
        let mut confidence_sum = 0.0;
        let mut confidence_n = 0.0;
        let mut reasons: HashSet<&'static str> = HashSet::new();
        let mut trigger_symbols: HashSet<String> = HashSet::new();
        let mut trigger_files: HashSet<String> = HashSet::new();

        for source in &section.sources {
            if !source.symbol_id.is_empty() && symbol_set.contains(&source.symbol_id) {
                let symbol_conf = normalize_confidence(
                    subgraph
                        .node_scores
                        .get(&source.symbol_id)
                        .copied()
                        .unwrap_or(0.0),
                    SYMBOL_SCORE_FALLBACK,
                );
                let source_conf = normalize_confidence(source.confidence, symbol_conf);
                let combined = (symbol_conf + source_conf) / 2.0;
                score += 1.0 + 0.2 * combined;
                reasons.insert("symbol_source_match");
                trigger_symbols.insert(source.symbol_id.clone());
                matched_symbols.insert(source.symbol_id.clone());
                confidence_sum += combined;
                confidence_n += 1.0;
            }
            if !source.file_path.is_empty() && file_set.contains(&source.file_path) {
                score += 0.35;
                reasons.insert("file_source_match");
                trigger_files.insert(source.file_path.clone());
                confidence_sum += FILE_MATCH_CONFIDENCE;
                confidence_n += 1.0;
            }
        }

        if score <= 0.0 {
            continue;
        }
        impacts.push(SectionImpact {
            section_id: section.id.clone(),
            score,
            confidence: if confidence_n > 0.0 {
                confidence_sum / confidence_n
            } else {
                0.0
            },
            reasons: sorted(reasons.into_iter().map(str::to_string)),
            trigger_symbols: sorted(trigger_symbols.into_iter()),
            trigger_files: sorted(trigger_files.into_iter()),
        });
    }

    impacts.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.section_id.cmp(&b.section_id))
    });

    plan.unmatched_symbols = subgraph
        .node_ids
        .iter()
        .filter(|id| !matched_symbols.contains(*id))
        .cloned()
        .collect();
    plan.unmatched_symbols.sort();
    plan.affected_sections = impacts;
    plan
}

impl DocUpdatePlan {
    /// Section IDs in impact order, deduplicated.
    pub fn section_ids_by_impact(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.affected_sections
            .iter()
            .filter(|i| !i.section_id.is_empty() && seen.insert(i.section_id.clone()))
            .map(|i| i.section_id.clone())
            .collect()
    }

    pub fn section_confidence(&self) -> BTreeMap<String, f64> {
        self.affected_sections
            .iter()
            .map(|i| (i.section_id.clone(), i.confidence))
            .collect()
    }
}

/// Keep the preferred ordering first, then append unseen base entries in
/// their original order.
pub fn merge_preferred_section_order(base: &[String], preferred: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(base.len() + preferred.len());
    for id in preferred.iter().chain(base.iter()) {
        if id.is_empty() || !seen.insert(id.clone()) {
            continue;
        }
        out.push(id.clone());
    }
    out
}

/// Distribute chunks no section claimed across the preferred sections,
/// round-robin in input order.
pub fn route_unmatched_to_preferred<'a>(
    chunks: &'a [SearchChunk],
    preferred: &[String],
) -> BTreeMap<String, Vec<&'a SearchChunk>> {
    let mut out: BTreeMap<String, Vec<&SearchChunk>> = BTreeMap::new();
    if preferred.is_empty() {
        return out;
    }
    for (index, chunk) in chunks.iter().enumerate() {
        let target = &preferred[index % preferred.len()];
        out.entry(target.clone()).or_default().push(chunk);
    }
    out
}

fn normalize_confidence(value: f64, fallback: f64) -> f64 {
    if value <= 0.0 {
        fallback
    } else if value > 1.0 {
        1.0
    } else {
        value
    }
}

fn sorted<I: Iterator<Item = String>>(iter: I) -> Vec<String> {
    let mut out: Vec<String> = iter.collect();
    out.sort();
    out
}
