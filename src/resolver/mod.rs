use crate::graph::Graph;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;

pub mod confidence;
pub mod heuristic;
pub mod typed;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResolveStats {
    pub attempted: usize,
    pub resolved: usize,
    pub skipped: usize,
}

/// Per-resolver outcome recorded by the chain.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub resolver: String,
    pub stats: ResolveStats,
    pub unresolved_before: usize,
    pub unresolved_after: usize,
    pub edge_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// A strategy that promotes unresolved candidates to typed edges.
pub trait GraphResolver {
    fn name(&self) -> &'static str;
    fn resolve(&mut self, graph: &mut Graph) -> Result<ResolveStats>;
}

/// Ordered set of resolvers. The chain terminates early only on hard error;
/// order is configured and stable, so the edge list is a function of the
/// chain, not arrival time.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn GraphResolver>>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Box<dyn GraphResolver>>) -> Self {
        Self { resolvers }
    }

    /// The default chain: name-index heuristic followed by the language-aware
    /// typed resolver.
    pub fn default_chain(repo_root: &Path) -> Self {
        Self::new(vec![
            Box::new(heuristic::HeuristicResolver::new()),
            Box::new(typed::TypedResolver::new(repo_root.to_path_buf())),
        ])
    }

    /// Heuristic-only chain, used where source files are not available for
    /// typed resolution (e.g. graphs reconstructed from a snapshot).
    pub fn heuristic_only() -> Self {
        Self::new(vec![Box::new(heuristic::HeuristicResolver::new())])
    }

    pub fn run(&mut self, graph: &mut Graph) -> Vec<StageResult> {
        let mut out = Vec::with_capacity(self.resolvers.len());
        for resolver in &mut self.resolvers {
            let before = graph.unresolved.len();
            let result = resolver.resolve(graph);
            let after = graph.unresolved.len();
            let (stats, err) = match result {
                Ok(stats) => (stats, None),
                Err(e) => (ResolveStats::default(), Some(e.to_string())),
            };
            let failed = err.is_some();
            out.push(StageResult {
                resolver: resolver.name().to_string(),
                stats,
                unresolved_before: before,
                unresolved_after: after,
                edge_count: graph.edges.len(),
                err,
            });
            if failed {
                break;
            }
        }
        out
    }
}
