use crate::docmodel::{build_sources_from_chunk, merge_sources, SourceRef};
use crate::generator::capability::{capability_behaviors, Capability};
use crate::generator::query::chunk_richness_score;
use crate::knowledge::SearchChunk;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Structured intermediate model for section rendering. Every claim is bound
/// to at least one source before it can render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDraft {
    pub section_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub claims: Vec<DraftClaim>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mermaid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftClaim {
    pub id: String,
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
}

/// Build the claim set for a section from ranked evidence chunks.
pub fn build_section_draft(
    section_id: &str,
    title: &str,
    chunks: &[SearchChunk],
    capabilities: &[Capability],
) -> SectionDraft {
    let mut draft = SectionDraft {
        section_id: section_id.to_string(),
        title: title.to_string(),
        summary: String::new(),
        claims: Vec::new(),
        mermaid: String::new(),
    };

    match section_id {
        "overview" => {
            for (index, chunk) in top_n(filter_semantic(chunks), 6).iter().enumerate() {
                let mut text = normalize_claim_text(chunk);
                if text.is_empty() {
                    text = format!("{} contributes to the core architecture behavior.", chunk.name);
                }
                let sources = build_sources_from_chunk(chunk);
                draft.claims.push(DraftClaim {
                    id: format!("ov-{}", index + 1),
                    text,
                    confidence: claim_confidence(&sources),
                    sources,
                });
            }
        }
        "key-features" => {
            for (index, capability) in capabilities.iter().enumerate() {
                let sources = merge_sources(&[], &capability.chunks);
                let behavior = capability_behaviors(&capability.chunks);
                let text = format!(
                    "{}: {} {}",
                    capability.title,
                    capability.intent,
                    behavior.join(" ")
                )
                .trim()
                .to_string();
                draft.claims.push(DraftClaim {
                    id: format!("kf-{}", index + 1),
                    text,
                    confidence: capability.confidence.max(claim_confidence(&sources)),
                    sources,
                });
            }
        }
        "development" => {
            let mut configs: Vec<&SearchChunk> = chunks
                .iter()
                .filter(|c| c.kind == "constant" || c.kind == "variable")
                .collect();
            if configs.is_empty() {
                configs = top_n(filter_semantic(chunks), 5);
            }
            for (index, chunk) in configs.iter().enumerate() {
                let mut text = normalize_claim_text(chunk);
                if text.is_empty() {
                    text = format!("{} affects runtime setup or operational behavior.", chunk.name);
                }
                let sources = build_sources_from_chunk(chunk);
                draft.claims.push(DraftClaim {
                    id: format!("dev-{}", index + 1),
                    text,
                    confidence: claim_confidence(&sources),
                    sources,
                });
            }
        }
        _ => {
            for (index, chunk) in top_n(filter_semantic(chunks), 4).iter().enumerate() {
                let mut text = normalize_claim_text(chunk);
                if text.is_empty() {
                    text = format!("{} is relevant to this section.", chunk.name);
                }
                let sources = build_sources_from_chunk(chunk);
                draft.claims.push(DraftClaim {
                    id: format!("cl-{}", index + 1),
                    text,
                    confidence: claim_confidence(&sources),
                    sources,
                });
            }
        }
    }

    draft.summary = summarize_claims(&draft.claims);
    draft
}

pub fn validate_section_draft(draft: &SectionDraft) -> Result<()> {
    if draft.section_id.trim().is_empty() {
        bail!("section_id is required");
    }
    if draft.title.trim().is_empty() {
        bail!("title is required");
    }
    if draft.claims.is_empty() {
        bail!("claims must not be empty");
    }
    for claim in &draft.claims {
        if claim.text.trim().is_empty() {
            bail!("claim text is required");
        }
        if claim.sources.is_empty() {
            bail!("claim must include sources");
        }
    }
    Ok(())
}

/// Deterministic Markdown rendering, used directly when the quality gate
/// rejects (or cannot reach) the AI rewrite.
pub fn render_section_draft_markdown(draft: &SectionDraft) -> String {
    let mut out = format!("# {}\n\n", draft.title);
    if !draft.summary.trim().is_empty() {
        out.push_str(draft.summary.trim());
        out.push_str("\n\n");
    }

    match draft.section_id.as_str() {
        "overview" => {
            out.push_str("## Architecture Intent\n\n");
            for claim in top_claims(&draft.claims, 2) {
                out.push_str(&to_paragraph(&claim.text));
                out.push_str("\n\n");
            }
            out.push_str("## Core Concepts\n\n");
            for claim in top_claims(&draft.claims, 4) {
                out.push_str(&format!("- {}\n", to_paragraph(&claim.text)));
            }
            out.push('\n');
        }
        "key-features" => {
            for claim in &draft.claims {
                out.push_str(&format!("## {}\n\n", claim_heading(&claim.text)));
                out.push_str(&to_paragraph(&claim.text));
                out.push_str("\n\n");
            }
        }
        "development" => {
            out.push_str("## Developer Workflow\n\n");
            for claim in top_claims(&draft.claims, 3) {
                out.push_str(&to_paragraph(&claim.text));
                out.push_str("\n\n");
            }
            out.push_str("## Operational Notes\n\n");
            for claim in top_claims(&draft.claims, 4) {
                out.push_str(&format!("- {}\n", to_paragraph(&claim.text)));
            }
            out.push('\n');
        }
        _ => {
            out.push_str("## Highlights\n\n");
            for claim in top_claims(&draft.claims, 5) {
                out.push_str(&to_paragraph(&claim.text));
                out.push_str("\n\n");
            }
        }
    }
    out.trim_end().to_string() + "\n"
}

pub fn serialize_section_draft(draft: &SectionDraft) -> String {
    serde_json::to_string_pretty(draft).unwrap_or_else(|_| "{}".to_string())
}

fn summarize_claims(claims: &[DraftClaim]) -> String {
    let mut top = claims.to_vec();
    top.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    top.truncate(2);
    top.iter()
        .map(|c| c.text.clone())
        .collect::<Vec<_>>()
        .join(" ")
}

fn claim_confidence(sources: &[SourceRef]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut count = 0.0;
    for source in sources {
        if source.confidence > 0.0 {
            sum += source.confidence;
            count += 1.0;
        }
    }
    if count == 0.0 {
        return 0.6;
    }
    (sum / count).clamp(0.0, 1.0)
}

fn top_claims(claims: &[DraftClaim], n: usize) -> Vec<DraftClaim> {
    let mut out = claims.to_vec();
    out.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    out.truncate(n);
    out
}

fn claim_heading(text: &str) -> String {
    let text = crate::util::truncate_chars(text.trim(), 68);
    let text = text.trim_end_matches('.').trim();
    let head = text.split(':').next().unwrap_or("").trim();
    if head.is_empty() {
        "Capability".to_string()
    } else {
        head.to_string()
    }
}

fn to_paragraph(text: &str) -> String {
    let line = text.replace('\n', " ").trim().to_string();
    if line.is_empty() {
        return "This behavior is grounded in source-linked evidence.".to_string();
    }
    if line.ends_with('.') { line } else { format!("{line}.") }
}

/// File aggregates and segments carry weak prose; prefer symbol-level
/// chunks for claims unless nothing else survives.
fn filter_semantic(chunks: &[SearchChunk]) -> Vec<&SearchChunk> {
    let filtered: Vec<&SearchChunk> = chunks
        .iter()
        .filter(|c| c.kind != "file_module" && c.kind != "symbol_segment")
        .collect();
    if filtered.is_empty() {
        chunks.iter().collect()
    } else {
        filtered
    }
}

fn top_n<'a>(mut chunks: Vec<&'a SearchChunk>, n: usize) -> Vec<&'a SearchChunk> {
    chunks.sort_by(|a, b| {
        chunk_richness_score(b)
            .cmp(&chunk_richness_score(a))
            .then_with(|| a.id.cmp(&b.id))
    });
    chunks.truncate(n);
    chunks
}

fn normalize_claim_text(chunk: &SearchChunk) -> String {
    let text = chunk.description.trim();
    if text.is_empty() {
        return String::new();
    }
    let lower = text.to_lowercase();
    if lower.starts_with("module `") && lower.contains("containing:") {
        return format!(
            "{} in package `{}` provides behavior relevant to this section.",
            chunk.name, chunk.package
        );
    }
    let text = text.replace('\n', " ");
    if text.chars().count() > 280 {
        format!("{}...", crate::util::truncate_chars(&text, 280).trim())
    } else {
        text
    }
}
