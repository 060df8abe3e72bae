use crate::knowledge::SearchChunk;
use std::collections::{BTreeMap, HashMap};

struct StageSpec {
    key: &'static str,
    label: &'static str,
    tokens: &'static [&'static str],
}

const STAGES: &[StageSpec] = &[
    StageSpec {
        key: "entry",
        label: "Entry/API",
        tokens: &["main", "cmd", "api", "handler", "controller", "router", "endpoint", "serve", "cli"],
    },
    StageSpec {
        key: "app",
        label: "Orchestration",
        tokens: &["service", "orchestr", "pipeline", "runner", "sync", "workflow", "manager"],
    },
    StageSpec {
        key: "domain",
        label: "Domain Logic",
        tokens: &["domain", "core", "resolver", "analy", "planner", "extract", "generator"],
    },
    StageSpec {
        key: "data",
        label: "Storage/Index",
        tokens: &["store", "repo", "db", "sqlite", "index", "cache", "vector"],
    },
    StageSpec {
        key: "output",
        label: "Output",
        tokens: &["doc", "render", "markdown", "writer", "export"],
    },
];

/// High-level architecture flow mapped from section chunks to conceptual
/// stages. Falls back to a package-level flow when fewer than three stages
/// have evidence.
pub fn generate_architecture_flow(chunks: &[SearchChunk]) -> String {
    let mut stage_of_name: HashMap<&str, &'static str> = HashMap::new();
    let mut stage_hits: BTreeMap<&'static str, usize> = BTreeMap::new();
    for chunk in chunks {
        if let Some(stage) = best_stage(chunk) {
            stage_of_name.insert(chunk.name.as_str(), stage);
            *stage_hits.entry(stage).or_insert(0) += 1;
        }
    }

    let mut edge_weights: BTreeMap<(&'static str, &'static str), usize> = BTreeMap::new();
    for chunk in chunks {
        let Some(stage) = best_stage(chunk) else {
            continue;
        };
        for dep in &chunk.dependencies {
            if let Some(dep_stage) = stage_of_name.get(dep.as_str()) {
                if *dep_stage != stage {
                    *edge_weights.entry((stage, dep_stage)).or_insert(0) += 1;
                }
            }
        }
        for caller in &chunk.used_by {
            if let Some(caller_stage) = stage_of_name.get(caller.as_str()) {
                if *caller_stage != stage {
                    *edge_weights.entry((caller_stage, stage)).or_insert(0) += 1;
                }
            }
        }
    }

    let present: Vec<&StageSpec> = STAGES
        .iter()
        .filter(|s| stage_hits.get(s.key).copied().unwrap_or(0) > 0)
        .collect();
    if present.len() < 3 {
        return generate_package_flow(chunks);
    }

    let mut out = String::from("```mermaid\ngraph TD\n");
    for stage in &present {
        out.push_str(&format!("    {}[\"{}\"]\n", stage.key, stage.label));
    }
    let mut emitted = false;
    for ((from, to), _) in &edge_weights {
        out.push_str(&format!("    {from} --> {to}\n"));
        emitted = true;
    }
    if !emitted {
        // No cross-stage references observed; show the canonical ordering.
        for pair in present.windows(2) {
            out.push_str(&format!("    {} --> {}\n", pair[0].key, pair[1].key));
        }
    }
    out.push_str("```\n");
    out
}

fn best_stage(chunk: &SearchChunk) -> Option<&'static str> {
    let haystack = [
        chunk.name.as_str(),
        chunk.package.as_str(),
        chunk.file_path.as_str(),
        chunk.description.as_str(),
    ]
    .join(" ")
    .to_lowercase();

    let mut best: Option<(&'static str, usize)> = None;
    for stage in STAGES {
        let score = stage
            .tokens
            .iter()
            .filter(|token| haystack.contains(**token))
            .count();
        if score == 0 {
            continue;
        }
        match best {
            Some((_, existing)) if existing >= score => {}
            _ => best = Some((stage.key, score)),
        }
    }
    best.map(|(key, _)| key)
}

/// Package-level dependency flow used when stage extraction is too weak.
fn generate_package_flow(chunks: &[SearchChunk]) -> String {
    let mut package_of: HashMap<&str, &str> = HashMap::new();
    for chunk in chunks {
        if !chunk.package.is_empty() {
            package_of.insert(chunk.name.as_str(), chunk.package.as_str());
        }
    }
    let mut edges: BTreeMap<(String, String), usize> = BTreeMap::new();
    for chunk in chunks {
        if chunk.package.is_empty() {
            continue;
        }
        for dep in &chunk.dependencies {
            if let Some(dep_pkg) = package_of.get(dep.as_str()) {
                if *dep_pkg != chunk.package {
                    *edges
                        .entry((chunk.package.clone(), dep_pkg.to_string()))
                        .or_insert(0) += 1;
                }
            }
        }
    }

    let mut out = String::from("```mermaid\ngraph TD\n");
    if edges.is_empty() {
        let mut packages: Vec<&str> = chunks
            .iter()
            .map(|c| c.package.as_str())
            .filter(|p| !p.is_empty())
            .collect();
        packages.sort();
        packages.dedup();
        for package in packages.iter().take(8) {
            out.push_str(&format!("    {}\n", sanitize_node(package)));
        }
    } else {
        for ((from, to), _) in &edges {
            out.push_str(&format!(
                "    {} --> {}\n",
                sanitize_node(from),
                sanitize_node(to)
            ));
        }
    }
    out.push_str("```\n");
    out
}

/// Component-graph snapshot for the development section: structs and
/// interfaces with their uses relations.
pub fn generate_component_snapshot(chunks: &[SearchChunk]) -> String {
    let mut out = String::from("```mermaid\nclassDiagram\n");
    let mut names: Vec<&SearchChunk> = chunks
        .iter()
        .filter(|c| c.kind == "struct" || c.kind == "interface")
        .collect();
    names.sort_by(|a, b| a.name.cmp(&b.name));
    names.dedup_by(|a, b| a.name == b.name);

    let declared: std::collections::HashSet<&str> =
        names.iter().map(|c| c.name.as_str()).collect();
    for chunk in &names {
        out.push_str(&format!("    class {} {{\n", sanitize_node(&chunk.name)));
        if chunk.kind == "interface" {
            out.push_str("        <<interface>>\n");
        }
        out.push_str("    }\n");
    }
    for chunk in &names {
        for dep in &chunk.dependencies {
            if declared.contains(dep.as_str()) && dep != &chunk.name {
                out.push_str(&format!(
                    "    {} ..> {} : uses\n",
                    sanitize_node(&chunk.name),
                    sanitize_node(dep)
                ));
            }
        }
    }
    out.push_str("```\n");
    out
}

fn sanitize_node(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Insert (or replace) a generated diagram immediately under `heading`.
/// Idempotent: an existing mermaid block directly below the heading is
/// replaced, anything else is preserved.
pub fn insert_diagram_under_heading(content: &str, heading: &str, diagram: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let heading_index = lines.iter().position(|line| line.trim() == heading);

    let diagram = diagram.trim_end();
    match heading_index {
        None => {
            let mut out = content.trim_end().to_string();
            out.push_str(&format!("\n\n{heading}\n\n{diagram}\n"));
            out
        }
        Some(index) => {
            let mut rebuilt: Vec<String> = lines[..=index].iter().map(|l| l.to_string()).collect();
            rebuilt.push(String::new());
            rebuilt.push(diagram.to_string());

            // Skip blank lines and one pre-existing mermaid block after the heading.
            let mut rest = index + 1;
            while rest < lines.len() && lines[rest].trim().is_empty() {
                rest += 1;
            }
            if rest < lines.len() && lines[rest].trim().starts_with("```mermaid") {
                rest += 1;
                while rest < lines.len() && !lines[rest].trim().starts_with("```") {
                    rest += 1;
                }
                rest = (rest + 1).min(lines.len());
                while rest < lines.len() && lines[rest].trim().is_empty() {
                    rest += 1;
                }
            }
            if rest < lines.len() {
                rebuilt.push(String::new());
                rebuilt.extend(lines[rest..].iter().map(|l| l.to_string()));
            }
            let mut out = rebuilt.join("\n");
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(name: &str, package: &str, kind: &str, deps: &[&str], used_by: &[&str]) -> SearchChunk {
        SearchChunk {
            id: format!("id-{name}"),
            name: name.into(),
            kind: kind.into(),
            package: package.into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            used_by: used_by.iter().map(|u| u.to_string()).collect(),
            ..SearchChunk::default()
        }
    }

    #[test]
    fn architecture_flow_links_stages() {
        let chunks = vec![
            chunk("MainCmd", "cmd", "function", &["PipelineRun"], &[]),
            chunk("PipelineRun", "pipeline", "function", &["GraphResolver"], &["MainCmd"]),
            chunk("GraphResolver", "resolver", "struct", &["SqliteStore"], &["PipelineRun"]),
            chunk("SqliteStore", "store", "struct", &[], &["GraphResolver"]),
            chunk("MarkdownWriter", "render", "struct", &[], &[]),
        ];
        let diagram = generate_architecture_flow(&chunks);
        assert!(diagram.starts_with("```mermaid\ngraph TD\n"));
        assert!(diagram.contains("entry"));
        assert!(diagram.contains("-->"));
        assert!(diagram.ends_with("```\n"));
    }

    #[test]
    fn weak_stage_signal_falls_back_to_package_flow() {
        let chunks = vec![
            chunk("Alpha", "left", "function", &["Beta"], &[]),
            chunk("Beta", "right", "function", &[], &["Alpha"]),
        ];
        let diagram = generate_architecture_flow(&chunks);
        assert!(diagram.contains("left --> right"));
    }

    #[test]
    fn component_snapshot_declares_types_and_uses() {
        let chunks = vec![
            chunk("Engine", "knowledge", "struct", &["VectorIndex"], &[]),
            chunk("VectorIndex", "knowledge", "interface", &[], &["Engine"]),
            chunk("helper", "knowledge", "function", &[], &[]),
        ];
        let diagram = generate_component_snapshot(&chunks);
        assert!(diagram.contains("class Engine"));
        assert!(diagram.contains("<<interface>>"));
        assert!(diagram.contains("Engine ..> VectorIndex : uses"));
        assert!(!diagram.contains("helper"));
    }

    #[test]
    fn diagram_insertion_is_idempotent() {
        let content = "# Overview\n\nintro\n\n## End-to-End Flow\n\nolder text\n";
        let diagram = "```mermaid\ngraph TD\n    a --> b\n```";
        let once = insert_diagram_under_heading(content, "## End-to-End Flow", diagram);
        let twice = insert_diagram_under_heading(&once, "## End-to-End Flow", diagram);
        assert_eq!(once, twice);
        assert_eq!(once.matches("```mermaid").count(), 1);
        assert!(once.contains("older text"));
    }

    #[test]
    fn missing_heading_appends_section() {
        let content = "# Overview\n\nintro\n";
        let diagram = "```mermaid\ngraph TD\n    a --> b\n```";
        let updated = insert_diagram_under_heading(content, "## End-to-End Flow", diagram);
        assert!(updated.contains("## End-to-End Flow"));
        assert!(updated.contains("a --> b"));
    }

    #[test]
    fn existing_generated_diagram_is_replaced() {
        let content = "## End-to-End Flow\n\n```mermaid\ngraph TD\n    old --> old2\n```\n\ntail\n";
        let diagram = "```mermaid\ngraph TD\n    new --> new2\n```";
        let updated = insert_diagram_under_heading(content, "## End-to-End Flow", diagram);
        assert!(updated.contains("new --> new2"));
        assert!(!updated.contains("old --> old2"));
        assert!(updated.contains("tail"));
    }
}
