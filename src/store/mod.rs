use crate::graph::Graph;
use crate::knowledge::index::VectorIndex;
use crate::knowledge::{SearchChunk, VectorItem};
use crate::model::{Edge, Evidence, RelationCandidate, RelationKind, Symbol, SymbolMetadata};
use anyhow::{Context, Result, anyhow};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod migrations;

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

/// Durable snapshot of symbols, edges, and vector items. One writer at a
/// time through the guarded write connection; reads go through the pool.
pub struct Store {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db directory {}", parent.display()))?;
        }

        let write_conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db at {}", db_path.display()))?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::migrate(&write_conn)?;

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(4)
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .context("create read connection pool")?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.write_conn.lock().unwrap()
    }

    fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .context("get read connection from pool")
    }

    /// Exact-sync the snapshot to the in-memory graph inside a single
    /// transaction: rows absent from the graph are deleted, present rows are
    /// upserted. An empty graph empties the tables.
    pub fn save_graph(&self, graph: &Graph) -> Result<()> {
        let mut guard = self.conn();
        let tx = guard.transaction()?;

        tx.execute_batch(
            "
            CREATE TEMP TABLE IF NOT EXISTS keep_nodes (id TEXT PRIMARY KEY);
            CREATE TEMP TABLE IF NOT EXISTS keep_edges (
                from_id TEXT, to_id TEXT, kind TEXT,
                PRIMARY KEY (from_id, to_id, kind)
            );
            DELETE FROM keep_nodes;
            DELETE FROM keep_edges;
            ",
        )?;

        {
            let mut keep = tx.prepare("INSERT OR IGNORE INTO keep_nodes (id) VALUES (?1)")?;
            let mut upsert = tx.prepare(
                "INSERT INTO nodes (id, file_path, start_line, end_line, language, package,
                                    kind, name, doc, body, content_hash, role, metadata, candidates)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    file_path = excluded.file_path,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    language = excluded.language,
                    package = excluded.package,
                    kind = excluded.kind,
                    name = excluded.name,
                    doc = excluded.doc,
                    body = excluded.body,
                    content_hash = excluded.content_hash,
                    role = excluded.role,
                    metadata = excluded.metadata,
                    candidates = excluded.candidates",
            )?;
            for symbol in graph.symbols.values() {
                keep.execute(params![symbol.id])?;
                upsert.execute(params![
                    symbol.id,
                    symbol.file_path,
                    symbol.start_line,
                    symbol.end_line,
                    symbol.language,
                    symbol.package,
                    symbol.kind,
                    symbol.name,
                    symbol.doc,
                    symbol.body,
                    symbol.content_hash,
                    symbol.role,
                    serde_json::to_string(&symbol.metadata)?,
                    serde_json::to_string(&symbol.candidates)?,
                ])?;
            }

            let mut keep_edge = tx.prepare(
                "INSERT OR IGNORE INTO keep_edges (from_id, to_id, kind) VALUES (?1, ?2, ?3)",
            )?;
            let mut upsert_edge = tx.prepare(
                "INSERT INTO edges (from_id, to_id, kind, resolver, confidence, evidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(from_id, to_id, kind) DO UPDATE SET
                    resolver = excluded.resolver,
                    confidence = excluded.confidence,
                    evidence = excluded.evidence",
            )?;
            for edge in &graph.edges {
                keep_edge.execute(params![edge.from_id, edge.to_id, edge.kind.as_str()])?;
                upsert_edge.execute(params![
                    edge.from_id,
                    edge.to_id,
                    edge.kind.as_str(),
                    edge.resolver,
                    edge.confidence,
                    serde_json::to_string(&edge.evidence)?,
                ])?;
            }

            tx.execute(
                "DELETE FROM nodes WHERE id NOT IN (SELECT id FROM keep_nodes)",
                [],
            )?;
            tx.execute(
                "DELETE FROM edges WHERE NOT EXISTS (
                    SELECT 1 FROM keep_edges k
                    WHERE k.from_id = edges.from_id
                      AND k.to_id = edges.to_id
                      AND k.kind = edges.kind)",
                [],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_graph(&self) -> Result<Graph> {
        let conn = self.read_conn()?;
        let mut graph = Graph::new();

        let mut stmt = conn.prepare(
            "SELECT id, file_path, start_line, end_line, language, package, kind, name,
                    doc, body, content_hash, role, metadata, candidates
             FROM nodes",
        )?;
        let rows = stmt.query_map([], |row| {
            let metadata_json: String = row.get(12)?;
            let candidates_json: String = row.get(13)?;
            Ok(Symbol {
                id: row.get(0)?,
                file_path: row.get(1)?,
                start_line: row.get(2)?,
                end_line: row.get(3)?,
                language: row.get(4)?,
                package: row.get(5)?,
                kind: row.get(6)?,
                name: row.get(7)?,
                doc: row.get(8)?,
                body: row.get(9)?,
                content_hash: row.get(10)?,
                role: row.get(11)?,
                metadata: serde_json::from_str::<SymbolMetadata>(&metadata_json)
                    .unwrap_or_default(),
                candidates: serde_json::from_str::<Vec<RelationCandidate>>(&candidates_json)
                    .unwrap_or_default(),
            })
        })?;
        for row in rows {
            graph.add_symbol(row?);
        }

        let mut stmt = conn.prepare(
            "SELECT from_id, to_id, kind, resolver, confidence, evidence FROM edges",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(2)?;
            let evidence_json: String = row.get(5)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                kind,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                evidence_json,
            ))
        })?;
        for row in rows {
            let (from_id, to_id, kind, resolver, confidence, evidence_json) = row?;
            let Some(kind) = RelationKind::parse(&kind) else {
                continue;
            };
            graph.edges.push(Edge {
                from_id,
                to_id,
                kind,
                resolver,
                confidence,
                evidence: serde_json::from_str::<Evidence>(&evidence_json).unwrap_or_default(),
            });
        }

        graph.rebuild_indices();
        Ok(graph)
    }

    pub fn counts(&self) -> Result<(i64, i64, i64)> {
        let conn = self.read_conn()?;
        let nodes: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?;
        let edges: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?;
        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok((nodes, edges, chunks))
    }
}

/// Little-endian f32 encoding preserves equality across round-trips.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl VectorIndex for Store {
    fn add(&mut self, items: Vec<VectorItem>) -> Result<()> {
        let mut guard = self.conn();
        let tx = guard.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, content, content_hash, embedding)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    content_hash = excluded.content_hash,
                    embedding = excluded.embedding",
            )?;
            for item in &items {
                stmt.execute(params![
                    item.chunk.id,
                    serde_json::to_string(&item.chunk)?,
                    item.chunk.content_hash,
                    vec_to_blob(&item.embedding),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut guard = self.conn();
        let tx = guard.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM chunks WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorItem>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT content, embedding FROM chunks")?;
        let rows = stmt.query_map([], |row| {
            let content: String = row.get(0)?;
            let embedding: Option<Vec<u8>> = row.get(1)?;
            Ok((content, embedding))
        })?;

        let mut candidates: Vec<(f32, VectorItem)> = Vec::new();
        for row in rows {
            let (content, blob) = row?;
            let chunk: SearchChunk = match serde_json::from_str(&content) {
                Ok(chunk) => chunk,
                Err(_) => continue,
            };
            let embedding = blob.map(|b| blob_to_vec(&b)).unwrap_or_default();
            let score = crate::knowledge::index::cosine_similarity(query, &embedding);
            candidates.push((score, VectorItem { chunk, embedding }));
        }
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.chunk.id.cmp(&b.1.chunk.id))
        });
        Ok(candidates.into_iter().take(top_k).map(|(_, i)| i).collect())
    }

    fn list_chunk_ids(&self) -> Result<Vec<String>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT id FROM chunks ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn content_hashes(&self, ids: &[String]) -> Result<Option<HashMap<String, String>>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT content_hash FROM chunks WHERE id = ?1")?;
        let mut out = HashMap::new();
        for id in ids {
            let hash: Option<String> = stmt
                .query_row(params![id], |row| row.get(0))
                .map(Some)
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(anyhow!(other)),
                })?;
            if let Some(hash) = hash {
                if !hash.is_empty() {
                    out.insert(id.clone(), hash);
                }
            }
        }
        Ok(Some(out))
    }
}
