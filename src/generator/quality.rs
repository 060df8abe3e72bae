/// Writer output quality gate. Scores start at 1.0 and lose points for
/// degenerate shapes; anything below the acceptance threshold falls back to
/// the deterministic draft rendering.
#[derive(Debug, Clone)]
pub struct WriterQuality {
    pub score: f64,
    pub issues: Vec<String>,
}

pub const QUALITY_ACCEPT_THRESHOLD: f64 = 0.55;

pub fn assess_writer_quality(section_id: &str, content: &str) -> WriterQuality {
    let text = content.trim();
    if text.is_empty() {
        return WriterQuality {
            score: 0.0,
            issues: vec!["empty_content".into()],
        };
    }

    let mut score: f64 = 1.0;
    let mut issues = Vec::new();

    let mut total = 0usize;
    let mut bullets = 0usize;
    let mut paragraphs = 0usize;
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        total += 1;
        if line.starts_with("- ") || line.starts_with("* ") {
            bullets += 1;
        } else if !line.starts_with('#') {
            paragraphs += 1;
        }
    }
    if total > 0 && bullets as f64 / total as f64 > 0.45 {
        score -= 0.25;
        issues.push("list_heavy".into());
    }
    if paragraphs < 2 {
        score -= 0.20;
        issues.push("insufficient_paragraphs".into());
    }

    let lower = text.to_lowercase();
    let walkthrough_signals = ["module `", ".go`", ".go ", "package `", "containing:"]
        .iter()
        .filter(|token| lower.contains(**token))
        .count();
    if walkthrough_signals >= 2 {
        score -= 0.35;
        issues.push("file_walkthrough_style".into());
    }

    let placeholders = [
        "explain the",
        "describe the",
        "write ",
        "must include",
        "tbd",
        "placeholder",
        "as an ai",
    ];
    if placeholders.iter().any(|token| lower.contains(token)) {
        score -= 0.20;
        issues.push("instructional_or_placeholder_text".into());
    }

    if section_id == "overview" && !lower.contains("```mermaid") {
        score -= 0.20;
        issues.push("missing_overview_diagram".into());
    }
    if section_id == "key-features" {
        if lower.matches("\n## ").count() < 2 {
            score -= 0.20;
            issues.push("insufficient_feature_sections".into());
        }
        if !lower.contains('`') {
            score -= 0.15;
            issues.push("missing_technical_anchors".into());
        }
    }

    WriterQuality {
        score: score.max(0.0),
        issues,
    }
}

/// Strip prompt scaffolding and instruction-looking lines from AI output
/// before the quality gate sees it.
pub fn sanitize_generated_markdown(content: &str) -> String {
    let mut out = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        if lower.starts_with("here is")
            || lower.starts_with("here's")
            || lower.starts_with("sure,")
            || lower.starts_with("certainly")
            || lower.starts_with("as requested")
            || lower.starts_with("[instruction")
            || lower.starts_with("<instruction")
            || lower.starts_with("system:")
            || lower.starts_with("user:")
            || lower.starts_with("assistant:")
        {
            continue;
        }
        out.push(line);
    }
    let mut text = out.join("\n").trim().to_string();
    // Unwrap a whole-document markdown fence if the model added one.
    if text.starts_with("```markdown") || text.starts_with("```md") {
        if let Some(rest) = text.split_once('\n') {
            text = rest.1.trim_end().trim_end_matches("```").trim().to_string();
        }
    }
    text
}

/// Structural degeneracy check applied on top of the numeric score: output
/// that lost its heading or collapsed to almost nothing is rejected even if
/// the scorer was lenient.
pub fn is_structurally_degenerate(content: &str) -> bool {
    let text = content.trim();
    if text.len() < 80 {
        return true;
    }
    if !text.starts_with('#') {
        return true;
    }
    text.lines().filter(|l| !l.trim().is_empty()).count() < 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_scores_zero() {
        let quality = assess_writer_quality("overview", "  ");
        assert_eq!(quality.score, 0.0);
        assert_eq!(quality.issues, vec!["empty_content"]);
    }

    #[test]
    fn list_heavy_content_is_penalized() {
        let content = "# T\n\n- a\n- b\n- c\n- d\n- e\n\nparagraph one\n";
        let quality = assess_writer_quality("other", content);
        assert!(quality.issues.contains(&"list_heavy".to_string()));
    }

    #[test]
    fn overview_without_mermaid_is_penalized() {
        let content = "# Overview\n\npara one is long enough here.\n\npara two follows with detail.\n";
        let quality = assess_writer_quality("overview", content);
        assert!(quality.issues.contains(&"missing_overview_diagram".to_string()));

        let with_diagram = format!("{content}\n```mermaid\ngraph TD\nA-->B\n```\n");
        let quality = assess_writer_quality("overview", &with_diagram);
        assert!(!quality.issues.contains(&"missing_overview_diagram".to_string()));
    }

    #[test]
    fn key_features_needs_subsections_and_anchors() {
        let content = "# Key Features\n\nprose one about behavior.\n\nprose two about behavior.\n";
        let quality = assess_writer_quality("key-features", content);
        assert!(quality
            .issues
            .contains(&"insufficient_feature_sections".to_string()));
        assert!(quality
            .issues
            .contains(&"missing_technical_anchors".to_string()));
    }

    #[test]
    fn sanitize_strips_scaffolding_lines() {
        let raw = "Here is the updated section:\n# Title\n\nbody text\nassistant: done\n";
        let clean = sanitize_generated_markdown(raw);
        assert!(clean.starts_with("# Title"));
        assert!(!clean.contains("Here is"));
        assert!(!clean.contains("assistant:"));
    }

    #[test]
    fn sanitize_unwraps_document_fence() {
        let raw = "```markdown\n# Title\n\nbody\n```";
        let clean = sanitize_generated_markdown(raw);
        assert!(clean.starts_with("# Title"));
        assert!(!clean.contains("```markdown"));
    }

    #[test]
    fn degenerate_output_is_detected() {
        assert!(is_structurally_degenerate("too short"));
        assert!(is_structurally_degenerate(
            "no heading at all but reasonably long content follows here with more words to pass length"
        ));
        let fine = "# Title\n\nfirst paragraph with enough words to pass the bar.\n\nsecond paragraph too.\n";
        assert!(!is_structurally_degenerate(fine));
    }
}
