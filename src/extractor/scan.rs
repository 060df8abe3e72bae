use crate::extractor::{ExtractionAdapter, LanguageParser};
use crate::graph::Graph;
use crate::util::normalize_rel_path;
use anyhow::Result;
use ignore::WalkBuilder;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Include files ignored by .gitignore.
    pub no_ignore: bool,
    /// Include *_test.go files.
    pub include_tests: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            no_ignore: false,
            include_tests: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub scanned: usize,
    pub extracted: usize,
    pub failed: usize,
    pub symbols: usize,
}

/// Walk the repository and extract every matching source file into the
/// graph. Failure of a single file is logged and the scan continues.
pub fn scan_repo(
    repo_root: &Path,
    parser: &mut dyn LanguageParser,
    adapter: &ExtractionAdapter,
    graph: &mut Graph,
    options: ScanOptions,
) -> Result<ScanStats> {
    let mut stats = ScanStats::default();
    let mut paths = Vec::new();

    let mut builder = WalkBuilder::new(repo_root);
    builder.hidden(true);
    if options.no_ignore {
        builder.git_ignore(false).ignore(false).git_exclude(false);
    }
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("scan walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.into_path();
        if !matches_language(&path, options) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    for path in paths {
        stats.scanned += 1;
        let rel_path = match normalize_rel_path(repo_root, &path) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        match extract_one(&path, &rel_path, parser, adapter) {
            Ok(symbols) => {
                stats.extracted += 1;
                stats.symbols += symbols.len();
                for symbol in symbols {
                    graph.add_symbol(symbol);
                }
            }
            Err(err) => {
                warn!("extract {rel_path}: {err}");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// Extract a single file (absolute path on disk, repo-relative path stored on
/// symbols).
pub fn extract_one(
    abs_path: &Path,
    rel_path: &str,
    parser: &mut dyn LanguageParser,
    adapter: &ExtractionAdapter,
) -> Result<Vec<crate::model::Symbol>> {
    let source = crate::util::read_to_string(abs_path)?;
    let parsed = parser.parse_file(rel_path, &source)?;
    Ok(adapter.adapt_file(rel_path, parser.language(), parsed))
}

fn matches_language(path: &Path, options: ScanOptions) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if !name.ends_with(".go") {
        return false;
    }
    if !options.include_tests && name.ends_with("_test.go") {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{parser_for, NoiseFilter};

    #[test]
    fn scan_extracts_go_files_and_skips_tests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.go"),
            "package a\n\nfunc Run() {}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a_test.go"),
            "package a\n\nfunc TestRun(t *testing.T) {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "# notes\n").unwrap();

        let mut parser = parser_for("go").unwrap();
        let adapter = ExtractionAdapter::new(NoiseFilter::default());
        let mut graph = Graph::new();
        let stats = scan_repo(
            dir.path(),
            parser.as_mut(),
            &adapter,
            &mut graph,
            ScanOptions::default(),
        )
        .unwrap();

        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.extracted, 1);
        assert_eq!(graph.symbols.len(), 1);
        let only = graph.symbols.values().next().unwrap();
        assert_eq!(only.name, "Run");
        assert_eq!(only.file_path, "a.go");
    }

    #[test]
    fn single_file_failure_does_not_abort_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.go"), "package ok\n\nfunc Fine() {}\n").unwrap();
        // Invalid UTF-8 forces a read failure path.
        std::fs::write(dir.path().join("bad.go"), [0xff, 0xfe, 0x00]).unwrap();

        let mut parser = parser_for("go").unwrap();
        let adapter = ExtractionAdapter::default();
        let mut graph = Graph::new();
        let stats = scan_repo(
            dir.path(),
            parser.as_mut(),
            &adapter,
            &mut graph,
            ScanOptions::default(),
        )
        .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.extracted, 1);
        assert_eq!(graph.symbols.len(), 1);
    }
}
