use crate::util::now_rfc3339;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct ReportSignal {
    pub code: String,
    pub stage: String,
    pub severity: String,
    pub message: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub value: f64,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

#[derive(Debug, Clone, Serialize)]
pub struct StageMetric {
    pub name: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SectionMetric {
    pub section_id: String,
    pub title: String,
    pub query_count: usize,
    pub search_hits: usize,
    pub heuristic_hits: usize,
    pub chunk_count: usize,
    pub source_count: usize,
    pub file_diversity: usize,
    pub evidence_confidence: f64,
    pub evidence_coverage: f64,
    pub low_evidence: bool,
    pub writer_quality_score: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub writer_quality_issues: Vec<String>,
    pub used_draft: bool,
    pub used_llm: bool,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub stage_count: usize,
    pub section_count: usize,
    pub failed_stages: usize,
    pub low_evidence_sections: usize,
    pub avg_writer_quality: f64,
    pub signals_by_severity: BTreeMap<String, usize>,
}

/// Per-run accounting artifact: stages, per-section metrics, and
/// severity-sorted signals. Flushed on both success and failure paths.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub version: String,
    pub mode: String,
    pub generated_at: String,
    pub output_dir: String,
    pub stages: Vec<StageMetric>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<SectionMetric>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<ReportSignal>,
    pub summary: ReportSummary,
}

pub struct StageHandle {
    name: String,
    started_wall: String,
    started: Instant,
}

impl PipelineReport {
    pub fn new(mode: &str, output_dir: &str) -> Self {
        Self {
            version: "v1".into(),
            mode: mode.into(),
            generated_at: now_rfc3339(),
            output_dir: output_dir.into(),
            stages: Vec::new(),
            sections: Vec::new(),
            signals: Vec::new(),
            summary: ReportSummary::default(),
        }
    }

    pub fn begin_stage(&self, name: &str) -> StageHandle {
        StageHandle {
            name: name.trim().to_string(),
            started_wall: now_rfc3339(),
            started: Instant::now(),
        }
    }

    pub fn end_stage(
        &mut self,
        handle: StageHandle,
        status: &str,
        counters: BTreeMap<String, f64>,
        notes: Vec<String>,
        error: Option<&anyhow::Error>,
    ) {
        if handle.name.is_empty() {
            return;
        }
        let mut status = if status.trim().is_empty() { "ok" } else { status }.to_string();
        let error_text = error.map(|e| format!("{e:#}")).unwrap_or_default();
        if !error_text.is_empty() && status == "ok" {
            status = "error".into();
        }
        self.stages.push(StageMetric {
            name: handle.name,
            status,
            started_at: handle.started_wall,
            finished_at: now_rfc3339(),
            duration_ms: handle.started.elapsed().as_millis() as u64,
            counters: counters
                .into_iter()
                .filter(|(k, _)| !k.trim().is_empty())
                .collect(),
            notes: notes
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            error: error_text,
        });
    }

    pub fn add_signal(&mut self, code: &str, stage: &str, severity: &str, message: &str, value: f64) {
        let signal = ReportSignal {
            code: code.trim().to_string(),
            stage: stage.trim().to_string(),
            severity: severity.trim().to_lowercase(),
            message: message.trim().to_string(),
            value,
        };
        if signal.code.is_empty()
            || signal.stage.is_empty()
            || signal.severity.is_empty()
            || signal.message.is_empty()
        {
            return;
        }
        self.signals.push(signal);
    }

    pub fn add_section_metric(&mut self, metric: SectionMetric) {
        if metric.section_id.trim().is_empty() {
            return;
        }
        self.sections.push(metric);
    }

    /// Aggregate summary counters and order signals by severity.
    pub fn finalize(&mut self) {
        self.generated_at = now_rfc3339();
        self.signals.sort_by(|a, b| {
            severity_priority(&b.severity)
                .cmp(&severity_priority(&a.severity))
                .then_with(|| a.stage.cmp(&b.stage))
                .then_with(|| a.code.cmp(&b.code))
        });

        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        for severity in ["critical", "warning", "info"] {
            by_severity.insert(severity.to_string(), 0);
        }
        for signal in &self.signals {
            *by_severity.entry(signal.severity.clone()).or_insert(0) += 1;
        }

        let failed = self.stages.iter().filter(|s| s.status != "ok").count();
        let low_evidence = self.sections.iter().filter(|s| s.low_evidence).count();
        let avg_quality = if self.sections.is_empty() {
            0.0
        } else {
            self.sections
                .iter()
                .map(|s| s.writer_quality_score)
                .sum::<f64>()
                / self.sections.len() as f64
        };

        self.summary = ReportSummary {
            stage_count: self.stages.len(),
            section_count: self.sections.len(),
            failed_stages: failed,
            low_evidence_sections: low_evidence,
            avg_writer_quality: avg_quality,
            signals_by_severity: by_severity,
        };
    }

    /// Finalize and write as 2-space pretty JSON with a trailing newline.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.finalize();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut rendered = serde_json::to_string_pretty(self)?;
        rendered.push('\n');
        std::fs::write(path, rendered).with_context(|| format!("write {}", path.display()))
    }
}

fn severity_priority(severity: &str) -> u8 {
    match severity {
        "critical" => 3,
        "warning" => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_record_status_and_errors() {
        let mut report = PipelineReport::new("incremental", "docs");
        let handle = report.begin_stage("graph_update");
        report.end_stage(handle, "ok", BTreeMap::new(), vec![], None);

        let handle = report.begin_stage("indexing");
        let err = anyhow::anyhow!("boom");
        report.end_stage(handle, "ok", BTreeMap::new(), vec![], Some(&err));

        report.finalize();
        assert_eq!(report.summary.stage_count, 2);
        assert_eq!(report.summary.failed_stages, 1);
        assert_eq!(report.stages[1].status, "error");
        assert!(report.stages[1].error.contains("boom"));
    }

    #[test]
    fn signals_sort_by_severity_then_stage_and_code() {
        let mut report = PipelineReport::new("bootstrap", "docs");
        report.add_signal("writer_quality_low", "writer", "info", "meh", 0.4);
        report.add_signal("index_rebuild_failed", "index", "critical", "bad", 0.0);
        report.add_signal("low_evidence_section", "writer", "warning", "thin", 0.5);
        report.finalize();
        let codes: Vec<&str> = report.signals.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["index_rebuild_failed", "low_evidence_section", "writer_quality_low"]
        );
        assert_eq!(report.summary.signals_by_severity["critical"], 1);
    }

    #[test]
    fn malformed_signals_are_dropped() {
        let mut report = PipelineReport::new("bootstrap", "docs");
        report.add_signal("", "stage", "info", "message", 0.0);
        report.add_signal("code", "", "info", "message", 0.0);
        assert!(report.signals.is_empty());
    }

    #[test]
    fn save_writes_pretty_json_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline_report.json");
        let mut report = PipelineReport::new("bootstrap", "docs");
        report.add_section_metric(SectionMetric {
            section_id: "overview".into(),
            title: "Overview".into(),
            writer_quality_score: 0.8,
            ..SectionMetric::default()
        });
        report.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("\"section_count\": 1"));
        assert!((report.summary.avg_writer_quality - 0.8).abs() < 1e-9);
    }
}
