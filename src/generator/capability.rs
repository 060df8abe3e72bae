use crate::knowledge::SearchChunk;

/// A named semantic grouping of related symbols, used to structure the
/// key-features section.
#[derive(Debug, Clone)]
pub struct Capability {
    pub key: String,
    pub title: String,
    pub intent: String,
    pub chunks: Vec<SearchChunk>,
    pub confidence: f64,
}

struct CapabilityBucket {
    key: &'static str,
    keywords: &'static [&'static str],
    title: &'static str,
    intent: &'static str,
}

const BUCKETS: &[CapabilityBucket] = &[
    CapabilityBucket {
        key: "ingestion",
        keywords: &["scan", "crawl", "extract", "parse", "discover"],
        title: "Source Ingestion",
        intent: "Collect and normalize source code units into analysis-ready artifacts.",
    },
    CapabilityBucket {
        key: "resolution",
        keywords: &["resolve", "link", "relation", "dependency", "graph"],
        title: "Symbol Resolution",
        intent: "Link unresolved relations into stable symbol-level dependencies.",
    },
    CapabilityBucket {
        key: "retrieval",
        keywords: &["search", "retrieve", "query", "index", "embed", "vector"],
        title: "Semantic Retrieval",
        intent: "Retrieve the most relevant code evidence for documentation sections.",
    },
    CapabilityBucket {
        key: "planning",
        keywords: &["plan", "impact", "route", "section", "scope"],
        title: "Section Planning",
        intent: "Prioritize which documentation sections should be updated first.",
    },
    CapabilityBucket {
        key: "generation",
        keywords: &["generate", "render", "markdown", "document", "summarize", "update"],
        title: "Documentation Generation",
        intent: "Generate and maintain the document model and markdown outputs.",
    },
    CapabilityBucket {
        key: "runtime",
        keywords: &["config", "setup", "init", "load", "store", "db", "sqlite", "cli"],
        title: "Runtime Configuration",
        intent: "Configure execution environment, storage, and command workflows.",
    },
    CapabilityBucket {
        key: "quality",
        keywords: &["validate", "schema", "test", "assert", "normalize"],
        title: "Quality and Validation",
        intent: "Guarantee structural consistency and quality constraints of outputs.",
    },
];

const MAX_CHUNKS_PER_CAPABILITY: usize = 6;

/// Cluster chunks into capabilities by keyword classification, strongest
/// first, capped at `max_caps`.
pub fn extract_capabilities(chunks: &[SearchChunk], max_caps: usize) -> Vec<Capability> {
    if chunks.is_empty() || max_caps == 0 {
        return Vec::new();
    }

    let mut clusters: std::collections::BTreeMap<String, Vec<SearchChunk>> =
        std::collections::BTreeMap::new();
    for chunk in chunks {
        if !is_capability_candidate(chunk) {
            continue;
        }
        clusters
            .entry(classify_capability(chunk))
            .or_default()
            .push(chunk.clone());
    }

    let mut out = Vec::new();
    for (key, mut grouped) in clusters {
        if grouped.is_empty() {
            continue;
        }
        grouped.sort_by(|a, b| a.package.cmp(&b.package).then_with(|| a.name.cmp(&b.name)));
        grouped.truncate(MAX_CHUNKS_PER_CAPABILITY);
        let (title, intent) = title_intent(&key);
        let confidence = capability_confidence(&grouped);
        out.push(Capability {
            key,
            title,
            intent,
            chunks: grouped,
            confidence,
        });
    }

    out.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.title.cmp(&b.title))
    });
    out.truncate(max_caps);
    out
}

fn classify_capability(chunk: &SearchChunk) -> String {
    let haystack = [
        chunk.name.as_str(),
        chunk.kind.as_str(),
        chunk.package.as_str(),
        chunk.description.as_str(),
        chunk.signature.as_str(),
    ]
    .join(" ")
    .to_lowercase();

    let mut best_key = "core";
    let mut best_score = 0usize;
    for bucket in BUCKETS {
        let score = bucket
            .keywords
            .iter()
            .filter(|kw| haystack.contains(*kw))
            .count()
            * 2;
        if score > best_score {
            best_score = score;
            best_key = bucket.key;
        }
    }
    best_key.to_string()
}

fn title_intent(key: &str) -> (String, String) {
    for bucket in BUCKETS {
        if bucket.key == key {
            return (bucket.title.to_string(), bucket.intent.to_string());
        }
    }
    (
        "Core Processing".to_string(),
        "Implement the project's core behavior and domain logic.".to_string(),
    )
}

fn capability_confidence(chunks: &[SearchChunk]) -> f64 {
    if chunks.is_empty() {
        return 0.0;
    }
    let packages: std::collections::HashSet<&str> = chunks
        .iter()
        .map(|c| c.package.as_str())
        .filter(|p| !p.trim().is_empty())
        .collect();
    let kinds: std::collections::HashSet<&str> =
        chunks.iter().map(|c| c.kind.as_str()).collect();
    let score =
        0.18 * chunks.len() as f64 + 0.14 * packages.len() as f64 + 0.10 * kinds.len() as f64;
    score.min(1.0)
}

fn is_capability_candidate(chunk: &SearchChunk) -> bool {
    let name = chunk.name.trim().to_lowercase();
    if name.is_empty() {
        return false;
    }
    if name.contains("_test") || name.ends_with("test") {
        return false;
    }
    !matches!(
        chunk.kind.as_str(),
        "file_module" | "constant" | "variable" | "symbol_segment"
    )
}

/// Up to three behavior lines from the clustered chunks' descriptions.
pub fn capability_behaviors(chunks: &[SearchChunk]) -> Vec<String> {
    let mut out = Vec::new();
    for chunk in chunks {
        if out.len() >= 3 {
            break;
        }
        let desc = chunk.description.trim();
        if desc.is_empty() {
            continue;
        }
        out.push(desc.replace('\n', " "));
    }
    if out.is_empty() {
        out.push("Implements behavior derived from graph-linked source evidence.".to_string());
    }
    out
}

pub fn average_capability_confidence(capabilities: &[Capability]) -> f64 {
    if capabilities.is_empty() {
        return 0.0;
    }
    capabilities.iter().map(|c| c.confidence).sum::<f64>() / capabilities.len() as f64
}
