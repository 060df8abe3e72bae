use serde::{Deserialize, Serialize};

/// Typed relation between two symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    UsesType,
    BelongsTo,
    Instantiates,
    Embeds,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Calls => "calls",
            RelationKind::UsesType => "uses_type",
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::Instantiates => "instantiates",
            RelationKind::Embeds => "embeds",
        }
    }

    pub fn parse(value: &str) -> Option<RelationKind> {
        match value {
            "calls" => Some(RelationKind::Calls),
            "uses_type" => Some(RelationKind::UsesType),
            "belongs_to" => Some(RelationKind::BelongsTo),
            "instantiates" => Some(RelationKind::Instantiates),
            "embeds" => Some(RelationKind::Embeds),
            _ => None,
        }
    }
}

/// Terminal reason recorded when no resolver produced an edge for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    NoCandidate,
    Ambiguous,
    TypecheckFailed,
    SourceMissing,
}

impl UnresolvedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnresolvedReason::NoCandidate => "no_candidate",
            UnresolvedReason::Ambiguous => "ambiguous",
            UnresolvedReason::TypecheckFailed => "typecheck_failed",
            UnresolvedReason::SourceMissing => "source_missing",
        }
    }
}

/// Source location backing a relation candidate or resolved edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(default)]
    pub start_line: i64,
    #[serde(default)]
    pub end_line: i64,
}

/// Relation captured at extraction time, not yet promoted to an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationCandidate {
    pub source_id: String,
    pub target_hint: String,
    pub kind: RelationKind,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnresolvedReason>,
    #[serde(default)]
    pub base_confidence: f64,
}

/// Optional per-symbol metadata kept outside the fingerprint-critical fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub receiver: String,
}

/// A single extracted code entity. The graph-domain node payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub package: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc: String,
    #[serde(default)]
    pub body: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default)]
    pub metadata: SymbolMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<RelationCandidate>,
}

impl Symbol {
    /// A symbol is documentation-relevant on its own when its name is exported
    /// in the Go sense (leading uppercase letter).
    pub fn is_exported(&self) -> bool {
        self.name
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
    }

    pub fn contains_line(&self, line: i64) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// Resolved, confidence-weighted edge. `(from_id, to_id, kind)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,
    pub kind: RelationKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resolver: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Evidence,
}

/// Changed file as parsed from a VCS delta. Lines are 1-based; an empty list
/// means the file was touched globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    #[serde(default)]
    pub changed_lines: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_symbol() -> Symbol {
        Symbol {
            id: "go/pkg:function:Run:abc".into(),
            file_path: "main.go".into(),
            start_line: 10,
            end_line: 40,
            language: "go".into(),
            package: "main".into(),
            kind: "function".into(),
            name: "Run".into(),
            doc: String::new(),
            body: String::new(),
            content_hash: String::new(),
            role: String::new(),
            metadata: SymbolMetadata::default(),
            candidates: Vec::new(),
        }
    }

    #[test]
    fn relation_kind_round_trips_through_str() {
        for kind in [
            RelationKind::Calls,
            RelationKind::UsesType,
            RelationKind::BelongsTo,
            RelationKind::Instantiates,
            RelationKind::Embeds,
        ] {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RelationKind::parse("imports"), None);
    }

    #[test]
    fn exported_detection_follows_go_convention() {
        let mut sym = sample_symbol();
        assert!(sym.is_exported());
        sym.name = "run".into();
        assert!(!sym.is_exported());
        sym.name = String::new();
        assert!(!sym.is_exported());
    }

    #[test]
    fn contains_line_is_inclusive() {
        let sym = sample_symbol();
        assert!(sym.contains_line(10));
        assert!(sym.contains_line(40));
        assert!(!sym.contains_line(9));
        assert!(!sym.contains_line(41));
    }

}
