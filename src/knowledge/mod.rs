use serde::{Deserialize, Serialize};

pub mod embedder;
pub mod engine;
pub mod index;
pub mod textgen;

pub use embedder::{create_embedder, Embedder};
pub use engine::{Engine, IndexHealth, IndexingOptions};
pub use index::{MemoryIndex, VectorIndex};
pub use textgen::{create_text_generator, TextGenerator};

/// Provenance of a chunk, down to the line range it was cut from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSource {
    pub symbol_id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    /// primary | dependency | context
    pub relation: String,
    pub confidence: f64,
}

/// A structured piece of code knowledge, ready for indexing or embedding.
/// The four chunk shapes (symbol, symbol_segment, file_module,
/// evidence_block) share this record and differ only in `kind`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchChunk {
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub used_by: Vec<String>,
    #[serde(default)]
    pub sources: Vec<ChunkSource>,
}

impl SearchChunk {
    /// Single string optimized for the embedding model.
    pub fn to_embeddable_text(&self) -> String {
        let mut out = format!(
            "Symbol: {} ({}) in package {}\n",
            self.name, self.kind, self.package
        );
        if !self.description.is_empty() {
            out.push_str(&format!("Context: {}\n", self.description));
        }
        out.push_str(&format!("Definition: {}\n", self.signature));
        if !self.dependencies.is_empty() {
            out.push_str(&format!("Depends on: {}\n", self.dependencies.join(", ")));
        }
        if !self.used_by.is_empty() {
            out.push_str(&format!("Used by: {}\n", self.used_by.join(", ")));
        }
        out
    }

    /// Recompute the change-detection hash over the embed-relevant fields.
    pub fn compute_content_hash(&self) -> String {
        let material = [
            self.name.as_str(),
            self.kind.as_str(),
            self.package.as_str(),
            self.description.as_str(),
            self.signature.as_str(),
            self.body.as_str(),
        ]
        .join("|");
        blake3::hash(material.as_bytes()).to_hex().to_string()
    }

    /// The file this chunk belongs to, falling back to the ID prefix.
    pub fn file_key(&self) -> String {
        if !self.file_path.is_empty() {
            return self.file_path.clone();
        }
        match self.id.split_once(':') {
            Some((prefix, _)) => prefix.to_string(),
            None => self.id.clone(),
        }
    }
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorItem {
    pub chunk: SearchChunk,
    pub embedding: Vec<f32>,
}
