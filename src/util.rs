use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path};

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

pub fn normalize_rel_path(repo_root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(repo_root).with_context(|| {
        format!(
            "strip prefix {} from {}",
            repo_root.display(),
            path.display()
        )
    })?;
    Ok(normalize_path(rel))
}

pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir => {}
            _ => {}
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Collapse internal whitespace runs into a single space and trim.
pub fn canonicalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cooperative cancellation handle passed into every external-capability
/// call. A cancellation mid-stage aborts the in-flight call; the stage runner
/// discards partial state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("operation cancelled");
        }
        Ok(())
    }
}

pub fn dedupe_sorted(groups: &[&[String]]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for group in groups {
        for item in *group {
            if item.is_empty() || !seen.insert(item.clone()) {
                continue;
            }
            out.push(item.clone());
        }
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normalize_path_joins_with_forward_slashes() {
        let path = PathBuf::from("a").join("b").join("c.go");
        assert_eq!(normalize_path(&path), "a/b/c.go");
        assert_eq!(normalize_path(Path::new("")), ".");
    }

    #[test]
    fn canonicalize_whitespace_collapses_runs() {
        assert_eq!(
            canonicalize_whitespace("  func  Run(\n\tctx context.Context) "),
            "func Run( ctx context.Context)"
        );
    }

    #[test]
    fn dedupe_sorted_merges_and_sorts() {
        let a = vec!["b.go".to_string(), "a.go".to_string()];
        let b = vec!["a.go".to_string(), "c.go".to_string(), String::new()];
        let merged = dedupe_sorted(&[&a, &b]);
        assert_eq!(merged, vec!["a.go", "b.go", "c.go"]);
    }
}
