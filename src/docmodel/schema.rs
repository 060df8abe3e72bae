use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// JSON Schema the persisted document model must validate against. Written
/// next to the model file on bootstrap so external tooling can validate the
/// artifact without this binary.
pub const DOC_MODEL_SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "docsync document model",
  "type": "object",
  "required": ["schema_version", "document", "sections", "policies", "meta"],
  "properties": {
    "schema_version": { "type": "string", "const": "v0.1.0" },
    "document": {
      "type": "object",
      "required": ["id", "title", "root_section_ids"],
      "properties": {
        "id": { "type": "string", "minLength": 1 },
        "title": { "type": "string" },
        "root_section_ids": {
          "type": "array",
          "items": { "type": "string", "minLength": 1 }
        }
      }
    },
    "sections": {
      "type": "array",
      "minItems": 1,
      "items": {
        "type": "object",
        "required": ["id", "title", "level", "order", "content_md", "status", "sources", "hash"],
        "properties": {
          "id": { "type": "string", "minLength": 1 },
          "title": { "type": "string" },
          "level": { "type": "integer", "minimum": 1, "maximum": 6 },
          "order": { "type": "integer", "minimum": 0 },
          "parent_id": { "type": ["string", "null"] },
          "content_md": { "type": "string" },
          "summary": { "type": "string" },
          "status": { "type": "string", "enum": ["active", "deprecated"] },
          "sources": {
            "type": "array",
            "items": {
              "type": "object",
              "required": ["symbol_id", "file_path", "relation"],
              "properties": {
                "symbol_id": { "type": "string" },
                "file_path": { "type": "string" },
                "start_line": { "type": "integer", "minimum": 1 },
                "end_line": { "type": "integer", "minimum": 1 },
                "relation": { "type": "string", "enum": ["primary", "dependency", "context"] },
                "commit_sha": { "type": "string" },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
              }
            }
          },
          "evidence": {
            "type": ["object", "null"],
            "properties": {
              "coverage": { "type": "number", "minimum": 0, "maximum": 1 },
              "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
              "chunk_count": { "type": "integer", "minimum": 0 },
              "source_count": { "type": "integer", "minimum": 0 },
              "query_count": { "type": "integer", "minimum": 0 },
              "low_evidence": { "type": "boolean" }
            }
          },
          "hash": { "type": "string" },
          "last_updated": {
            "type": ["object", "null"],
            "properties": {
              "commit_sha": { "type": "string" },
              "timestamp": { "type": "string" }
            }
          }
        }
      }
    },
    "policies": {
      "type": "object",
      "required": ["required_section_ids", "max_section_chars", "style"],
      "properties": {
        "required_section_ids": {
          "type": "array",
          "items": { "type": "string", "minLength": 1 }
        },
        "max_section_chars": { "type": "integer", "minimum": 0 },
        "style": {
          "type": "object",
          "properties": {
            "tone": { "type": "string" },
            "audience": { "type": "string" },
            "code_block_language": { "type": "string" },
            "focus_mode": { "type": "string" },
            "avoid_call_graph_narration": { "type": "boolean" },
            "prefer_conceptual_diagrams": { "type": "boolean" },
            "prefer_task_oriented_examples": { "type": "boolean" }
          }
        }
      }
    },
    "meta": {
      "type": "object",
      "properties": {
        "repo": { "type": "string" },
        "default_branch": { "type": "string" },
        "generated_at": { "type": "string" },
        "generator_version": { "type": "string" }
      }
    }
  }
}
"##;

/// Process-wide compiled-schema cache keyed by absolute path. The only
/// global mutable state in the crate.
fn schema_cache() -> &'static Mutex<HashMap<PathBuf, Arc<jsonschema::Validator>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<jsonschema::Validator>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Write the sibling schema file if it does not exist yet.
pub fn ensure_schema_file(docs_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(docs_dir)
        .with_context(|| format!("create docs directory {}", docs_dir.display()))?;
    let path = docs_dir.join("doc_model.schema.json");
    if !path.exists() {
        std::fs::write(&path, DOC_MODEL_SCHEMA)
            .with_context(|| format!("write schema file {}", path.display()))?;
    }
    Ok(path)
}

/// Locate the schema for a model path: sibling first, then `docs/`.
pub fn resolve_schema_path(model_path: &Path) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = model_path.parent() {
        candidates.push(dir.join("doc_model.schema.json"));
    }
    candidates.push(PathBuf::from("docs").join("doc_model.schema.json"));
    candidates.into_iter().find(|c| c.exists())
}

/// Compile (or fetch from cache) the schema at `schema_path`. Compilation
/// failures are fatal on save.
pub fn load_compiled(schema_path: &Path) -> Result<Arc<jsonschema::Validator>> {
    let abs = schema_path
        .canonicalize()
        .with_context(|| format!("resolve schema path {}", schema_path.display()))?;

    {
        let cache = schema_cache().lock().unwrap();
        if let Some(found) = cache.get(&abs) {
            return Ok(found.clone());
        }
    }

    let raw = std::fs::read_to_string(&abs)
        .with_context(|| format!("read schema {}", abs.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("parse doc model schema json")?;
    let validator = jsonschema::validator_for(&value)
        .map_err(|e| anyhow!("failed to compile doc model schema: {e}"))?;
    let validator = Arc::new(validator);

    let mut cache = schema_cache().lock().unwrap();
    cache.insert(abs, validator.clone());
    Ok(validator)
}

/// Validate an instance against the schema sitting next to `model_path`.
pub fn validate_instance(model_path: &Path, instance: &serde_json::Value) -> Result<()> {
    let Some(schema_path) = resolve_schema_path(model_path) else {
        bail!("doc model schema file not found for {}", model_path.display());
    };
    let validator = load_compiled(&schema_path)?;
    if let Err(error) = validator.validate(instance) {
        bail!("doc model schema validation failed: {error}");
    }
    Ok(())
}
