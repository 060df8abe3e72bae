use crate::model::ChangedFile;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

/// Hunk header: `@@ -oldStart,oldLen +newStart,newLen @@`. Only the new-side
/// range matters for impact.
fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@").unwrap())
}

/// Run `git diff -U0 <base_ref>` in `repo_root` and parse it into the
/// changed-file structure the core consumes. A deleted file appears in the
/// list with the working copy missing on disk.
pub fn changed_files(repo_root: &Path, base_ref: &str) -> Result<Vec<ChangedFile>> {
    let output = Command::new("git")
        .arg("diff")
        .arg("-U0")
        .arg(base_ref)
        .current_dir(repo_root)
        .output()
        .context("run git diff")?;
    if !output.status.success() {
        bail!(
            "git diff failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(parse_diff(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse unified diff output with zero context lines.
pub fn parse_diff(output: &str) -> Vec<ChangedFile> {
    let mut changes: Vec<ChangedFile> = Vec::new();
    let mut current: Option<ChangedFile> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(done) = current.take() {
                changes.push(done);
            }
            // `a/path b/path`: take the new-side path.
            let path = rest
                .split_whitespace()
                .last()
                .map(|p| p.trim_start_matches("b/").to_string())
                .unwrap_or_default();
            current = Some(ChangedFile {
                path,
                changed_lines: Vec::new(),
            });
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = hunk_header_re().captures(line) {
            let start: i64 = caps[1].parse().unwrap_or(0);
            let count: i64 = caps
                .get(2)
                .map(|m| m.as_str().parse().unwrap_or(1))
                .unwrap_or(1);
            for offset in 0..count {
                file.changed_lines.push(start + offset);
            }
        }
    }

    if let Some(done) = current.take() {
        changes.push(done);
    }
    changes.retain(|c| !c.path.is_empty());
    changes
}

/// Split parsed changes into (updated, deleted) file paths based on working
/// copy presence, both sorted.
pub fn split_updated_deleted(repo_root: &Path, changes: &[ChangedFile]) -> (Vec<String>, Vec<String>) {
    let mut updated = Vec::new();
    let mut deleted = Vec::new();
    for change in changes {
        if repo_root.join(&change.path).exists() {
            updated.push(change.path.clone());
        } else {
            deleted.push(change.path.clone());
        }
    }
    updated.sort();
    updated.dedup();
    deleted.sort();
    deleted.dedup();
    (updated, deleted)
}
