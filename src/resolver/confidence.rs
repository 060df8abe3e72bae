//! Confidence scoring for resolved relations.
//!
//! Every edge confidence flows through [`calibrate`], which starts from a
//! per-kind base, applies resolver and evidence modifiers, and clamps into
//! the `[0.10, 0.99]` range the rest of the pipeline relies on.

use crate::model::{Evidence, RelationKind};

pub const MIN_CONFIDENCE: f64 = 0.10;
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Base confidence per relation kind, before any resolver bonus.
pub fn base_confidence(kind: RelationKind) -> f64 {
    match kind {
        RelationKind::BelongsTo => 0.80,
        RelationKind::Instantiates => 0.72,
        RelationKind::Calls => 0.70,
        RelationKind::UsesType => 0.65,
        RelationKind::Embeds => 0.60,
    }
}

/// Calibrate an edge confidence.
///
/// Modifiers: `+0.18` for the typed resolver, `-0.03` for an unknown
/// resolver tag, and `-0.05` each when the evidence file or line range is
/// missing or invalid.
pub fn calibrate(kind: RelationKind, resolver: &str, evidence: &Evidence) -> f64 {
    let mut value = base_confidence(kind);

    match resolver {
        "types" => value += 0.18,
        "heuristic" => {}
        _ => value -= 0.03,
    }

    if evidence.file_path.is_empty() {
        value -= 0.05;
    }
    if evidence.start_line <= 0 || evidence.end_line < evidence.start_line {
        value -= 0.05;
    }

    value.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}
