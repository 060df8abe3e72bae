use crate::knowledge::VectorItem;
use anyhow::Result;
use std::collections::HashMap;

/// Manages storage and retrieval of vector items. `content_hashes` is an
/// optional capability: a `None` return disables change filtering and the
/// engine always re-embeds.
pub trait VectorIndex {
    fn add(&mut self, items: Vec<VectorItem>) -> Result<()>;
    fn delete(&mut self, ids: &[String]) -> Result<()>;
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorItem>>;
    fn list_chunk_ids(&self) -> Result<Vec<String>>;
    fn content_hashes(&self, ids: &[String]) -> Result<Option<HashMap<String, String>>>;

    /// Search with per-candidate additive score boosts (graph proximity).
    /// Indexes without native support fall back to plain vector search.
    fn search_with_boost(
        &self,
        query: &[f32],
        top_k: usize,
        _boosts: &HashMap<String, f32>,
    ) -> Result<Vec<VectorItem>> {
        self.search(query, top_k)
    }
}

/// Cosine similarity; zero-norm or mismatched vectors return 0 so NaN never
/// propagates into rankings.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// In-memory vector index with upsert-by-ID semantics and hybrid
/// (vector + graph-proximity) ranking via `search_with_boost`.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    items: Vec<VectorItem>,
    positions: HashMap<String, usize>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&VectorItem> {
        self.positions.get(id).map(|pos| &self.items[*pos])
    }

    fn ranked(
        &self,
        query: &[f32],
        top_k: usize,
        boosts: &HashMap<String, f32>,
    ) -> Vec<VectorItem> {
        let mut scored: Vec<(f32, &VectorItem)> = self
            .items
            .iter()
            .map(|item| {
                let base = cosine_similarity(query, &item.embedding);
                let boost = boosts.get(&item.chunk.id).copied().unwrap_or(0.0);
                (base + boost, item)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.chunk.id.cmp(&b.1.chunk.id))
        });
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

impl VectorIndex for MemoryIndex {
    fn add(&mut self, items: Vec<VectorItem>) -> Result<()> {
        for item in items {
            match self.positions.get(&item.chunk.id) {
                Some(pos) => self.items[*pos] = item,
                None => {
                    self.positions.insert(item.chunk.id.clone(), self.items.len());
                    self.items.push(item);
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let drop: std::collections::HashSet<&String> = ids.iter().collect();
        self.items.retain(|item| !drop.contains(&item.chunk.id));
        self.positions.clear();
        for (pos, item) in self.items.iter().enumerate() {
            self.positions.insert(item.chunk.id.clone(), pos);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorItem>> {
        Ok(self.ranked(query, top_k, &HashMap::new()))
    }

    fn search_with_boost(
        &self,
        query: &[f32],
        top_k: usize,
        boosts: &HashMap<String, f32>,
    ) -> Result<Vec<VectorItem>> {
        Ok(self.ranked(query, top_k, boosts))
    }

    fn list_chunk_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.items.iter().map(|i| i.chunk.id.clone()).collect();
        ids.sort();
        Ok(ids)
    }

    fn content_hashes(&self, ids: &[String]) -> Result<Option<HashMap<String, String>>> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(item) = self.get(id) {
                if !item.chunk.content_hash.is_empty() {
                    out.insert(id.clone(), item.chunk.content_hash.clone());
                }
            }
        }
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SearchChunk;

    fn item(id: &str, embedding: Vec<f32>) -> VectorItem {
        VectorItem {
            chunk: SearchChunk {
                id: id.into(),
                name: id.to_uppercase(),
                kind: "function".into(),
                content_hash: format!("hash-{id}"),
                ..SearchChunk::default()
            },
            embedding,
        }
    }

    #[test]
    fn cosine_handles_zero_norm_without_nan() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn add_upserts_by_id() {
        let mut index = MemoryIndex::new();
        index.add(vec![item("a", vec![1.0, 0.0])]).unwrap();
        index.add(vec![item("a", vec![0.0, 1.0])]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap().embedding, vec![0.0, 1.0]);
    }

    #[test]
    fn search_ranks_by_similarity() {
        let mut index = MemoryIndex::new();
        index
            .add(vec![
                item("close", vec![1.0, 0.0]),
                item("far", vec![0.0, 1.0]),
            ])
            .unwrap();
        let results = index.search(&[1.0, 0.1], 1).unwrap();
        assert_eq!(results[0].chunk.id, "close");
    }

    #[test]
    fn boost_reorders_candidates() {
        let mut index = MemoryIndex::new();
        index
            .add(vec![
                item("vector-win", vec![1.0, 0.0]),
                item("graph-win", vec![0.8, 0.2]),
            ])
            .unwrap();
        let mut boosts = HashMap::new();
        boosts.insert("graph-win".to_string(), 0.2f32);
        let results = index
            .search_with_boost(&[1.0, 0.0], 2, &boosts)
            .unwrap();
        assert_eq!(results[0].chunk.id, "graph-win");
    }

    #[test]
    fn delete_removes_and_reindexes() {
        let mut index = MemoryIndex::new();
        index
            .add(vec![item("a", vec![1.0]), item("b", vec![0.5])])
            .unwrap();
        index.delete(&["a".to_string()]).unwrap();
        assert_eq!(index.list_chunk_ids().unwrap(), vec!["b"]);
        assert!(index.get("a").is_none());
        assert!(index.get("b").is_some());
    }

    #[test]
    fn content_hashes_capability_reports_known_ids() {
        let mut index = MemoryIndex::new();
        index.add(vec![item("a", vec![1.0])]).unwrap();
        let hashes = index
            .content_hashes(&["a".to_string(), "missing".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(hashes.get("a").unwrap(), "hash-a");
        assert!(!hashes.contains_key("missing"));
    }
}
