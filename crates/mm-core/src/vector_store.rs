//! VectorStore (C5): one logical instance hosting several named collections
//! (one per modality), each backed by a flat embedding array plus an HNSW
//! index, mirroring the storage layer this grew from — embeddings packed as
//! little-endian `f32` blobs in SQLite, indexed with HNSW once a collection
//! passes [`MIN_NODES_FOR_HNSW`], falling back to exact linear scan below it.

use std::collections::HashMap;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::hnsw::{HnswGraph, MIN_NODES_FOR_HNSW};
use crate::model::VectorPayload;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("collection missing: {0}")]
    CollectionMissing(String),
    #[error("dimension mismatch: collection expects {expected}, got {actual}")]
    DimMismatch { expected: usize, actual: usize },
    #[error("write error: {0}")]
    WriteError(#[from] rusqlite::Error),
}

/// A single hit returned from `Search`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub vector_id: Uuid,
    pub score: f32,
    pub payload: VectorPayload,
}

struct Collection {
    dim: usize,
    ids: Vec<Uuid>,
    embeddings: Vec<f32>,
    payloads: HashMap<Uuid, VectorPayload>,
    index: HnswGraph,
    index_dirty: bool,
}

impl Collection {
    fn new(dim: usize) -> Self {
        Self {
            dim,
            ids: Vec::new(),
            embeddings: Vec::new(),
            payloads: HashMap::new(),
            index: HnswGraph::new(),
            index_dirty: false,
        }
    }

    fn position_of(&self, vector_id: Uuid) -> Option<usize> {
        self.ids.iter().position(|id| *id == vector_id)
    }

    fn upsert(&mut self, vector_id: Uuid, embedding: Vec<f32>, payload: VectorPayload) {
        if let Some(pos) = self.position_of(vector_id) {
            let start = pos * self.dim;
            self.embeddings[start..start + self.dim].copy_from_slice(&embedding);
            self.payloads.insert(vector_id, payload);
        } else {
            self.ids.push(vector_id);
            self.embeddings.extend_from_slice(&embedding);
            self.payloads.insert(vector_id, payload);
        }
        self.index_dirty = true;
    }

    fn delete(&mut self, vector_id: Uuid) {
        if let Some(pos) = self.position_of(vector_id) {
            self.ids.remove(pos);
            self.embeddings.drain(pos * self.dim..(pos + 1) * self.dim);
            self.payloads.remove(&vector_id);
            self.index_dirty = true;
        }
    }

    fn rebuild_index_if_needed(&mut self) {
        if !self.index_dirty {
            return;
        }
        if self.ids.len() >= MIN_NODES_FOR_HNSW {
            self.index.rebuild(&self.embeddings, self.dim, self.ids.len());
        } else {
            self.index.clear();
        }
        self.index_dirty = false;
    }

    fn search(&mut self, query: &[f32], k: usize, threshold: f32) -> Vec<SearchHit> {
        self.rebuild_index_if_needed();

        let scored: Vec<(f32, usize)> = if self.ids.len() >= MIN_NODES_FOR_HNSW {
            self.index.search(query, k, &self.embeddings, self.dim)
        } else {
            linear_scan(query, &self.embeddings, self.dim, k)
        };

        scored
            .into_iter()
            .filter(|(score, _)| *score >= threshold)
            .filter_map(|(score, idx)| {
                let vector_id = *self.ids.get(idx)?;
                let payload = self.payloads.get(&vector_id)?.clone();
                Some(SearchHit {
                    vector_id,
                    score,
                    payload,
                })
            })
            .collect()
    }
}

fn linear_scan(query: &[f32], embeddings: &[f32], dim: usize, k: usize) -> Vec<(f32, usize)> {
    let n = embeddings.len() / dim.max(1);
    let mut scored: Vec<(f32, usize)> = (0..n)
        .map(|i| {
            let candidate = &embeddings[i * dim..(i + 1) * dim];
            (cosine_similarity(query, candidate), i)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Default `k` for `Search` calls that don't specify one; callers should
/// request more than they need to survive post-filter fusion.
pub const DEFAULT_K: usize = 50;

pub struct VectorStore {
    conn: Option<Connection>,
    collections: HashMap<String, Collection>,
}

impl VectorStore {
    /// Create an in-memory store with no persistence, useful for tests.
    pub fn in_memory() -> Self {
        Self {
            conn: None,
            collections: HashMap::new(),
        }
    }

    /// Open (or create) a persistent store backed by a SQLite file.
    pub fn open(conn: Connection) -> Result<Self, VectorStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vector_blobs (
                collection TEXT NOT NULL,
                vector_id TEXT NOT NULL,
                dim INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (collection, vector_id)
            );",
        )?;
        let mut store = Self {
            conn: Some(conn),
            collections: HashMap::new(),
        };
        store.load_from_disk()?;
        Ok(store)
    }

    fn load_from_disk(&mut self) -> Result<(), VectorStoreError> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let mut stmt =
            conn.prepare("SELECT collection, vector_id, dim, embedding, payload FROM vector_blobs")?;
        let rows = stmt.query_map([], |row| {
            let collection: String = row.get(0)?;
            let vector_id: String = row.get(1)?;
            let dim: i64 = row.get(2)?;
            let embedding: Vec<u8> = row.get(3)?;
            let payload: String = row.get(4)?;
            Ok((collection, vector_id, dim as usize, embedding, payload))
        })?;

        for row in rows {
            let (collection, vector_id, dim, blob, payload_json) = row?;
            let vector_id = Uuid::parse_str(&vector_id)
                .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?;
            let embedding = decode_f32_blob(&blob);
            let payload: VectorPayload = serde_json::from_str(&payload_json)
                .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?;
            self.collections
                .entry(collection)
                .or_insert_with(|| Collection::new(dim))
                .upsert(vector_id, embedding, payload);
        }
        Ok(())
    }

    /// Idempotent: creates the collection if absent, otherwise a no-op.
    pub fn create(&mut self, collection: &str, dim: usize) {
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection::new(dim));
    }

    pub fn upsert(
        &mut self,
        collection: &str,
        vector_id: Uuid,
        embedding: Vec<f32>,
        payload: VectorPayload,
    ) -> Result<(), VectorStoreError> {
        let col = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionMissing(collection.to_string()))?;
        if embedding.len() != col.dim {
            return Err(VectorStoreError::DimMismatch {
                expected: col.dim,
                actual: embedding.len(),
            });
        }

        if let Some(conn) = &self.conn {
            conn.execute(
                "INSERT INTO vector_blobs (collection, vector_id, dim, embedding, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(collection, vector_id) DO UPDATE SET embedding=excluded.embedding, payload=excluded.payload",
                params![
                    collection,
                    vector_id.to_string(),
                    col.dim as i64,
                    encode_f32_blob(&embedding),
                    serde_json::to_string(&payload).unwrap_or_default(),
                ],
            )?;
        }

        col.upsert(vector_id, embedding, payload);
        Ok(())
    }

    pub fn delete(&mut self, collection: &str, vector_id: Uuid) -> Result<(), VectorStoreError> {
        let col = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionMissing(collection.to_string()))?;
        col.delete(vector_id);

        if let Some(conn) = &self.conn {
            conn.execute(
                "DELETE FROM vector_blobs WHERE collection = ?1 AND vector_id = ?2",
                params![collection, vector_id.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn search(
        &mut self,
        collection: &str,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let col = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionMissing(collection.to_string()))?;
        if query.len() != col.dim {
            return Err(VectorStoreError::DimMismatch {
                expected: col.dim,
                actual: query.len(),
            });
        }
        Ok(col.search(query, k, threshold))
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.ids.len())
    }
}

fn encode_f32_blob(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
