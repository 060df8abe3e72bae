use crate::knowledge::SearchChunk;
use crate::util::now_rfc3339;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub mod schema;
pub mod splitter;

pub const DOC_MODEL_SCHEMA_VERSION: &str = "v0.1.0";

/// Canonical sections, in the fixed order used for sorting, root listing,
/// and required-section enforcement.
pub const CANONICAL_SECTION_ORDER: [&str; 3] = ["overview", "key-features", "development"];

const DEFAULT_MAX_SECTION_CHARS: usize = 8000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocModel {
    pub schema_version: String,
    pub document: DocumentMeta,
    pub sections: Vec<Section>,
    pub policies: Policies,
    pub meta: ModelMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub title: String,
    pub root_section_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub level: i64,
    pub order: i64,
    pub parent_id: Option<String>,
    pub content_md: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub status: String,
    pub sources: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceStats>,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<UpdateInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub symbol_id: String,
    pub file_path: String,
    #[serde(default)]
    pub start_line: i64,
    #[serde(default)]
    pub end_line: i64,
    pub relation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub confidence: f64,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceStats {
    pub coverage: f64,
    pub confidence: f64,
    pub chunk_count: usize,
    pub source_count: usize,
    pub query_count: usize,
    pub low_evidence: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub commit_sha: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policies {
    pub required_section_ids: Vec<String>,
    pub max_section_chars: usize,
    pub style: StylePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StylePolicy {
    pub tone: String,
    pub audience: String,
    pub code_block_language: String,
    pub focus_mode: String,
    pub avoid_call_graph_narration: bool,
    pub prefer_conceptual_diagrams: bool,
    pub prefer_task_oriented_examples: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMeta {
    pub repo: String,
    pub default_branch: String,
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generator_version: String,
}

impl DocModel {
    pub fn section_by_id(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn section_by_id_mut(&mut self, id: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.id == id)
    }

    /// Structural invariants enforced before any save: unique non-empty
    /// section IDs and required sections all present.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version.is_empty() {
            bail!("schema_version is required");
        }
        if self.sections.is_empty() {
            bail!("sections must not be empty");
        }
        let mut ids = HashSet::new();
        for section in &self.sections {
            if section.id.is_empty() {
                bail!("section id is required");
            }
            if !ids.insert(section.id.clone()) {
                bail!("duplicate section id: {}", section.id);
            }
        }
        for required in &self.policies.required_section_ids {
            if !ids.contains(required) {
                bail!("required section missing: {required}");
            }
        }
        Ok(())
    }
}

pub fn load(path: &Path) -> Result<DocModel> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read doc model {}", path.display()))?;
    let model: DocModel = serde_json::from_str(&raw)
        .with_context(|| format!("parse doc model {}", path.display()))?;
    Ok(model)
}

/// Validate (invariants, then JSON Schema) and write the model as 2-space
/// pretty JSON with a trailing newline.
pub fn save(path: &Path, model: &DocModel) -> Result<()> {
    model.validate()?;
    let value = serde_json::to_value(model).context("serialize doc model")?;
    schema::validate_instance(path, &value)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    // Serialize the model itself so keys keep their declared order.
    let mut rendered = serde_json::to_string_pretty(model)?;
    rendered.push('\n');
    std::fs::write(path, rendered).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Bootstrap a model from pre-existing Markdown. Heading slugs become
/// section IDs, deduplicated with `-N` suffixes.
pub fn build_from_markdown(content: &str) -> DocModel {
    let raw_sections = splitter::split_markdown(content);
    let now = now_rfc3339();

    let mut sections = Vec::with_capacity(raw_sections.len());
    let mut root_ids = Vec::new();
    let mut required_ids = Vec::new();
    let mut used: HashMap<String, usize> = HashMap::new();

    for (index, raw) in raw_sections.iter().enumerate() {
        let base_id = normalize_section_id(&raw.title);
        let seen = used.entry(base_id.clone()).or_insert(0);
        let id = if *seen > 0 {
            format!("{base_id}-{}", *seen + 1)
        } else {
            base_id.clone()
        };
        *seen += 1;

        let mut section = Section {
            id: id.clone(),
            title: raw.title.clone(),
            level: raw.level.max(1) as i64,
            order: index as i64,
            parent_id: None,
            content_md: raw.content.trim().to_string(),
            summary: summarize_content(&raw.content),
            status: "active".into(),
            sources: Vec::new(),
            evidence: None,
            hash: String::new(),
            last_updated: Some(UpdateInfo {
                commit_sha: "HEAD".into(),
                timestamp: now.clone(),
            }),
        };
        section.hash = section_hash(&section);
        sections.push(section);
        root_ids.push(id.clone());
        required_ids.push(id);
    }

    if sections.is_empty() {
        let mut overview = Section {
            id: "overview".into(),
            title: "Overview".into(),
            level: 1,
            order: 0,
            parent_id: None,
            content_md: "# Overview\n".into(),
            summary: String::new(),
            status: "active".into(),
            sources: Vec::new(),
            evidence: None,
            hash: String::new(),
            last_updated: None,
        };
        overview.hash = section_hash(&overview);
        sections.push(overview);
        root_ids.push("overview".into());
        required_ids.push("overview".into());
    }

    let mut model = DocModel {
        schema_version: DOC_MODEL_SCHEMA_VERSION.into(),
        document: DocumentMeta {
            id: "docsync-main-doc".into(),
            title: "Project Documentation".into(),
            root_section_ids: root_ids,
        },
        sections,
        policies: Policies {
            required_section_ids: unique_strings(&required_ids),
            max_section_chars: DEFAULT_MAX_SECTION_CHARS,
            style: StylePolicy::default(),
        },
        meta: ModelMeta {
            repo: ".".into(),
            default_branch: "main".into(),
            generated_at: now,
            generator_version: format!("docsync {}", env!("CARGO_PKG_VERSION")),
        },
    };
    normalize(&mut model);
    model
}

/// Repair document shape so output stays deterministic and stable:
/// policy defaults, canonical scaffolds, root listing, order reindexing,
/// heading canonicalization, hash recomputation.
pub fn normalize(model: &mut DocModel) {
    ensure_policy_defaults(model);
    ensure_canonical_sections(model);
    ensure_root_section_ids(model);
    reindex_section_order(model);
    normalize_section_headings(model);
}

fn ensure_policy_defaults(model: &mut DocModel) {
    let policies = &mut model.policies;
    if policies.max_section_chars == 0 {
        policies.max_section_chars = DEFAULT_MAX_SECTION_CHARS;
    }
    let style = &mut policies.style;
    if style.tone.is_empty() {
        style.tone = "technical, objective".into();
    }
    if style.audience.is_empty() {
        style.audience = "open-source maintainers".into();
    }
    if style.code_block_language.is_empty() {
        style.code_block_language = "go".into();
    }
    if style.focus_mode.is_empty() {
        style.focus_mode = "semantic".into();
    }
    // Official-doc oriented behavior unless explicitly disabled.
    if !style.prefer_conceptual_diagrams {
        style.prefer_conceptual_diagrams = true;
    }
    if !style.prefer_task_oriented_examples {
        style.prefer_task_oriented_examples = true;
    }
    style.avoid_call_graph_narration = true;
}

fn ensure_canonical_sections(model: &mut DocModel) {
    let existing: HashSet<String> = model.sections.iter().map(|s| s.id.clone()).collect();
    for id in CANONICAL_SECTION_ORDER {
        if existing.contains(id) {
            continue;
        }
        let title = section_title_from_id(id);
        let mut section = Section {
            id: id.to_string(),
            title: title.clone(),
            level: 1,
            order: model.sections.len() as i64,
            parent_id: None,
            content_md: format!("# {title}\n\nTBD."),
            summary: String::new(),
            status: "active".into(),
            sources: Vec::new(),
            evidence: None,
            hash: String::new(),
            last_updated: None,
        };
        section.hash = section_hash(&section);
        model.sections.push(section);
    }
}

fn ensure_root_section_ids(model: &mut DocModel) {
    let mut seen = HashSet::new();
    let mut roots = Vec::new();
    for id in CANONICAL_SECTION_ORDER {
        if model.section_by_id(id).is_some() {
            roots.push(id.to_string());
            seen.insert(id.to_string());
        }
    }
    for section in &model.sections {
        if section.parent_id.is_none() && !seen.contains(&section.id) {
            roots.push(section.id.clone());
            seen.insert(section.id.clone());
        }
    }
    model.document.root_section_ids = roots;
    if model.policies.required_section_ids.is_empty() {
        model.policies.required_section_ids = CANONICAL_SECTION_ORDER
            .iter()
            .map(|s| s.to_string())
            .collect();
    }
}

fn reindex_section_order(model: &mut DocModel) {
    model.sections.sort_by(|a, b| {
        section_rank(&a.id)
            .cmp(&section_rank(&b.id))
            .then_with(|| a.order.cmp(&b.order))
            .then_with(|| a.id.cmp(&b.id))
    });
    for (index, section) in model.sections.iter_mut().enumerate() {
        section.order = index as i64;
    }
}

fn normalize_section_headings(model: &mut DocModel) {
    for section in &mut model.sections {
        if section.level < 1 || section.level > 6 {
            section.level = 2;
        }
        if section.title.is_empty() {
            section.title = section_title_from_id(&section.id);
        }

        let heading = format!("{} {}", "#".repeat(section.level as usize), section.title);
        let trimmed = section.content_md.trim().to_string();
        if trimmed.is_empty() {
            section.content_md = format!("{heading}\n\nTBD.");
        } else if trimmed.starts_with('#') {
            let mut lines: Vec<&str> = trimmed.lines().collect();
            if !lines.is_empty() {
                lines[0] = &heading;
                section.content_md = lines.join("\n");
            }
        } else {
            section.content_md = format!("{heading}\n\n{trimmed}");
        }
        section.summary = summarize_content(&section.content_md);
        section.hash = section_hash(section);
    }
}

fn section_rank(id: &str) -> usize {
    CANONICAL_SECTION_ORDER
        .iter()
        .position(|c| *c == id)
        .unwrap_or(CANONICAL_SECTION_ORDER.len() + 1)
}

pub fn section_title_from_id(id: &str) -> String {
    match id {
        "overview" => "Overview".into(),
        "key-features" => "Key Features".into(),
        "development" => "Development".into(),
        _ => id
            .split('-')
            .filter(|p| !p.is_empty())
            .map(|p| {
                let mut chars = p.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Digest of (trimmed title, trimmed body, sorted `symbolID|filePath|relation`
/// source triples).
pub fn section_hash(section: &Section) -> String {
    let mut material = String::new();
    material.push_str(section.title.trim());
    material.push('\n');
    material.push_str(section.content_md.trim());
    material.push('\n');
    let mut triples: Vec<String> = section
        .sources
        .iter()
        .map(|s| format!("{}|{}|{}", s.symbol_id, s.file_path, s.relation))
        .collect();
    triples.sort();
    for triple in triples {
        material.push_str(&triple);
        material.push('\n');
    }
    format!("blake3:{}", blake3::hash(material.as_bytes()).to_hex())
}

/// First non-heading non-empty line, capped at 120 chars.
pub fn summarize_content(content: &str) -> String {
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return crate::util::truncate_chars(line, 120);
    }
    String::new()
}

pub fn normalize_section_id(title: &str) -> String {
    let lower = title.trim().to_lowercase();
    if lower.is_empty() {
        return "section".into();
    }
    let mut out = String::new();
    let mut prev_dash = false;
    for c in lower.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let out = out.trim_matches('-').to_string();
    if out.is_empty() { "section".into() } else { out }
}

/// Render the model as one normalized Markdown document: LF line endings,
/// sections in normalized order with canonical headings, trailing newline.
pub fn render_markdown(model: &mut DocModel) -> String {
    normalize(model);

    let mut out = String::new();
    let title = if model.document.title.trim().is_empty() {
        "Project Documentation"
    } else {
        model.document.title.trim()
    };
    out.push_str(&format!("# {title}\n\n"));
    out.push_str("Auto-generated by `docsync`.\n\n");

    let mut sections: Vec<&Section> = model.sections.iter().collect();
    sections.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

    let rendered: Vec<String> = sections
        .iter()
        .map(|s| s.content_md.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    out.push_str(&rendered.join("\n\n"));
    out.push('\n');
    out
}

/// Traceability sources for a chunk: its own source spans when present,
/// otherwise a single synthetic primary reference.
pub fn build_sources_from_chunk(chunk: &SearchChunk) -> Vec<SourceRef> {
    let mut out = Vec::new();
    for src in &chunk.sources {
        if src.symbol_id.trim().is_empty() || src.file_path.trim().is_empty() {
            continue;
        }
        out.push(SourceRef {
            symbol_id: src.symbol_id.trim().to_string(),
            file_path: src.file_path.trim().to_string(),
            start_line: src.start_line.max(1),
            end_line: src.end_line.max(1),
            relation: normalize_source_relation(&src.relation),
            commit_sha: "HEAD".into(),
            confidence: src.confidence.clamp(0.0, 1.0),
        });
    }
    if !out.is_empty() {
        return out;
    }

    let file_path = if chunk.file_path.trim().is_empty() {
        chunk.id.clone()
    } else {
        chunk.file_path.clone()
    };
    vec![SourceRef {
        symbol_id: chunk.id.clone(),
        file_path,
        start_line: 1,
        end_line: 1,
        relation: "primary".into(),
        commit_sha: "HEAD".into(),
        confidence: 0.9,
    }]
}

/// Merge chunk-derived sources into an existing list, deduplicating on
/// `(symbol_id, file_path)`.
pub fn merge_sources(existing: &[SourceRef], chunks: &[SearchChunk]) -> Vec<SourceRef> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::with_capacity(existing.len());
    for src in existing {
        seen.insert((src.symbol_id.clone(), src.file_path.clone()));
        out.push(src.clone());
    }
    for chunk in chunks {
        for src in build_sources_from_chunk(chunk) {
            let key = (src.symbol_id.clone(), src.file_path.clone());
            if seen.insert(key) {
                out.push(src);
            }
        }
    }
    out
}

fn normalize_source_relation(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        rel @ ("primary" | "dependency" | "context") => rel.to_string(),
        _ => "primary".to_string(),
    }
}

fn unique_strings(input: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    input
        .iter()
        .filter(|v| seen.insert((*v).clone()))
        .cloned()
        .collect()
}
