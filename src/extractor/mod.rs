use crate::model::{Evidence, RelationCandidate, RelationKind, Symbol, SymbolMetadata};
use crate::resolver::confidence::base_confidence;
use anyhow::{Result, bail};
use std::collections::HashSet;

pub mod go;
pub mod scan;
pub mod stable_id;

/// Relation hint captured by a language parser, target not yet resolved.
#[derive(Debug, Clone)]
pub struct RawRelation {
    pub target: String,
    pub kind: RelationKind,
    pub start_line: i64,
    pub end_line: i64,
}

/// Symbol as produced by a language parser, before adaptation.
#[derive(Debug, Clone, Default)]
pub struct RawSymbol {
    pub kind: String,
    pub name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub body: String,
    pub doc: String,
    pub signature: String,
    pub receiver: String,
    pub relations: Vec<RawRelation>,
}

impl RawSymbol {
    fn raw_relations(self) -> (RawSymbol, Vec<RawRelation>) {
        let mut sym = self;
        let relations = std::mem::take(&mut sym.relations);
        (sym, relations)
    }
}

/// Parser output for one file.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub package_name: String,
    pub symbols: Vec<RawSymbol>,
}

/// Pluggable language parser capability. Pure over the input bytes; the only
/// filesystem access is reading the file handed to it.
pub trait LanguageParser {
    fn language(&self) -> &'static str;
    fn parse_file(&mut self, path: &str, source: &str) -> Result<ParsedFile>;
}

/// Factory keyed by a string configuration value.
pub fn parser_for(language: &str) -> Result<Box<dyn LanguageParser>> {
    match language {
        "go" => Ok(Box::new(go::GoParser::new()?)),
        other => bail!("unsupported language: {other}"),
    }
}

/// Target-hint noise filter. Builtin names and standard-library-prefixed
/// identifiers never become relation candidates. The lists are configuration,
/// not policy; `Default` carries the Go set.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    pub builtins: HashSet<String>,
    pub stdlib_prefixes: Vec<String>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        let builtins = [
            "string", "bool", "byte", "rune", "error", "any", "int", "int8", "int16", "int32",
            "int64", "uint", "uint8", "uint16", "uint32", "uint64", "uintptr", "float32",
            "float64", "complex64", "complex128", "map", "chan", "func", "len", "cap", "append",
            "make", "new", "copy", "delete", "close", "panic", "recover", "print", "println",
            "min", "max", "clear", "true", "false", "nil", "iota",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        let stdlib_prefixes = [
            "bufio.", "bytes.", "context.", "crypto.", "encoding.", "errors.", "fmt.", "io.",
            "log.", "math.", "net.", "os.", "path.", "regexp.", "sort.", "strconv.", "strings.",
            "sync.", "time.", "unicode.", "filepath.", "http.", "json.", "exec.", "sql.",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            builtins,
            stdlib_prefixes,
        }
    }
}

impl NoiseFilter {
    pub fn is_noise(&self, target: &str) -> bool {
        let clean = crate::graph::strip_type_sigils(target);
        if clean.is_empty() || self.builtins.contains(clean) {
            return true;
        }
        self.stdlib_prefixes.iter().any(|p| clean.starts_with(p))
    }
}

/// Names that flag a declared literal as sensitive (case-insensitive
/// substring match).
const SENSITIVE_NAME_TOKENS: &[&str] = &["key", "secret", "token", "password", "credential", "auth"];

const REDACTED_PLACEHOLDER: &str = "\"[REDACTED]\"";

/// Converts parser output into graph symbols: assigns stable IDs, computes
/// content hashes, redacts sensitive literals, filters noisy relation hints,
/// and attaches unresolved candidates.
#[derive(Debug, Default)]
pub struct ExtractionAdapter {
    noise: NoiseFilter,
}

impl ExtractionAdapter {
    pub fn new(noise: NoiseFilter) -> Self {
        Self { noise }
    }

    pub fn adapt_file(&self, file_path: &str, language: &str, parsed: ParsedFile) -> Vec<Symbol> {
        let package = parsed.package_name;
        let mut out = Vec::with_capacity(parsed.symbols.len());
        for raw in parsed.symbols {
            out.push(self.adapt_unit(file_path, language, &package, raw));
        }
        out.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Convert one raw extractor record into a Symbol.
    pub fn adapt_unit(
        &self,
        file_path: &str,
        language: &str,
        package: &str,
        raw: RawSymbol,
    ) -> Symbol {
        let (raw, relations) = raw.raw_relations();
        let body = redact_sensitive_literal(&raw.kind, &raw.name, raw.body);
        let content_hash = blake3::hash(body.as_bytes()).to_hex().to_string();

        let id = stable_id::build_stable_id(&stable_id::SymbolFingerprint {
            language,
            package,
            kind: &raw.kind,
            receiver: &raw.receiver,
            name: &raw.name,
            signature: &raw.signature,
            body: &body,
        });

        let candidates = relations
            .into_iter()
            .filter(|rel| !self.noise.is_noise(&rel.target))
            .map(|rel| RelationCandidate {
                source_id: id.clone(),
                target_hint: rel.target,
                kind: rel.kind,
                evidence: Evidence {
                    file_path: file_path.to_string(),
                    start_line: rel.start_line,
                    end_line: rel.end_line,
                },
                reason: None,
                base_confidence: base_confidence(rel.kind),
            })
            .collect();

        let role = infer_role(&raw.kind, &raw.name);
        Symbol {
            id,
            file_path: file_path.to_string(),
            start_line: raw.start_line,
            end_line: raw.end_line,
            language: language.to_string(),
            package: package.to_string(),
            kind: raw.kind,
            name: raw.name,
            doc: raw.doc,
            body,
            content_hash,
            role,
            metadata: SymbolMetadata {
                signature: raw.signature,
                receiver: raw.receiver,
            },
            candidates,
        }
    }
}

fn redact_sensitive_literal(kind: &str, name: &str, body: String) -> String {
    if kind != "constant" && kind != "variable" {
        return body;
    }
    let lower = name.to_ascii_lowercase();
    if !SENSITIVE_NAME_TOKENS.iter().any(|t| lower.contains(t)) {
        return body;
    }
    match body.find('=') {
        Some(idx) => format!("{}= {REDACTED_PLACEHOLDER}", &body[..idx]),
        None => body,
    }
}

/// Coarse architectural role inferred from kind + naming convention.
fn infer_role(kind: &str, name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let role = match kind {
        "interface" => "Interface",
        "struct" => {
            if lower.ends_with("service") {
                "Service"
            } else if lower.ends_with("repository") || lower.ends_with("repo") || lower.ends_with("store") {
                "Data Access"
            } else if lower.ends_with("handler") || lower.ends_with("controller") {
                "API Handler"
            } else if lower.ends_with("config") || lower.ends_with("options") {
                "Configuration"
            } else if lower.ends_with("request") || lower.ends_with("response") {
                "DTO"
            } else {
                "Data Model"
            }
        }
        "function" | "method" => {
            if lower.starts_with("new") {
                "Constructor"
            } else if lower.starts_with("get") || lower.starts_with("set") {
                "Accessor"
            } else if lower.contains("test") {
                "Test"
            } else {
                "Logic"
            }
        }
        "constant" => "Constant",
        "variable" => "Variable",
        _ => "Component",
    };
    role.to_string()
}
