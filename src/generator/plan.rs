/// Section-level contracts for full documentation generation.
#[derive(Debug, Clone)]
pub struct FullDocPlan {
    pub sections: Vec<SectionDocPlan>,
}

/// Retrieval and writing constraints for one section.
#[derive(Debug, Clone)]
pub struct SectionDocPlan {
    pub section_id: String,
    pub title: String,
    pub goal: String,
    pub required_blocks: Vec<String>,
    pub query_hints: Vec<String>,
    pub retrieval_keywords: Vec<String>,
    pub top_k: usize,
    pub min_evidence: usize,
    pub require_mermaid: bool,
    pub allow_llm: bool,
}

impl SectionDocPlan {
    pub fn query_text(&self) -> String {
        if self.query_hints.is_empty() {
            self.section_id.trim().to_string()
        } else {
            self.query_hints.join(" ")
        }
    }
}

impl FullDocPlan {
    pub fn section_by_id(&self, id: &str) -> Option<&SectionDocPlan> {
        self.sections.iter().find(|s| s.section_id == id)
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// The default plan covers the canonical triple.
pub fn default_full_doc_plan() -> FullDocPlan {
    FullDocPlan {
        sections: vec![
            SectionDocPlan {
                section_id: "overview".into(),
                title: "Overview".into(),
                goal: "Explain purpose, boundaries, and system-level flow in semantic terms."
                    .into(),
                required_blocks: strings(&["Purpose", "End-to-End Flow", "Core Concepts"]),
                query_hints: strings(&[
                    "system architecture",
                    "runtime flow",
                    "core components",
                    "boundaries",
                ]),
                retrieval_keywords: strings(&[
                    "architecture",
                    "system",
                    "component",
                    "module",
                    "entry",
                    "flow",
                    "interface",
                ]),
                top_k: 16,
                min_evidence: 6,
                require_mermaid: true,
                allow_llm: false,
            },
            SectionDocPlan {
                section_id: "key-features".into(),
                title: "Key Features".into(),
                goal: "Describe capability-level behaviors, constraints, and usage without file walkthroughs."
                    .into(),
                required_blocks: strings(&["Capability"]),
                query_hints: strings(&[
                    "core capabilities",
                    "business behavior",
                    "constraints",
                    "workflows",
                ]),
                retrieval_keywords: strings(&[
                    "feature",
                    "service",
                    "workflow",
                    "domain",
                    "policy",
                    "validation",
                    "resolver",
                ]),
                top_k: 20,
                min_evidence: 8,
                require_mermaid: false,
                allow_llm: true,
            },
            SectionDocPlan {
                section_id: "development".into(),
                title: "Development".into(),
                goal: "Provide setup, configuration, and operational guidance for maintainers."
                    .into(),
                required_blocks: strings(&["Quick Start", "Configuration", "Architecture Snapshot"]),
                query_hints: strings(&[
                    "development setup",
                    "configuration",
                    "cli",
                    "testing",
                    "runtime",
                ]),
                retrieval_keywords: strings(&[
                    "config", "env", "cli", "command", "test", "build", "deploy",
                ]),
                top_k: 14,
                min_evidence: 5,
                require_mermaid: true,
                allow_llm: false,
            },
        ],
    }
}
