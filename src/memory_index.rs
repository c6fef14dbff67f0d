//! In-memory [`VectorIndex`] implementation for tests and offline use.
//!
//! Stores points behind a `std::sync::RwLock`; search is brute-force
//! cosine similarity over all stored vectors. Semantics match the Qdrant
//! gateway: payload-complete points, source-filtered deletion, top-k
//! ordered by descending similarity with 4-decimal score rounding.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::IndexError;
use crate::index::{round_score, VectorIndex};
use crate::models::{Chunk, SearchHit};

/// Deterministic, non-semantic embedder for tests and offline smoke runs.
///
/// Hashes each text with SHA-256 and unrolls the digest into a unit-norm
/// vector, so identical texts always map to identical vectors and the
/// pipeline can run without any embedding API.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = Vec::with_capacity(self.dims);
                let mut counter: u64 = 0;
                while vector.len() < self.dims {
                    let mut hasher = Sha256::new();
                    hasher.update(text.as_bytes());
                    hasher.update(counter.to_le_bytes());
                    for byte in hasher.finalize() {
                        if vector.len() == self.dims {
                            break;
                        }
                        vector.push(byte as f32 / 255.0 - 0.5);
                    }
                    counter += 1;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > f32::EPSILON {
                    for v in &mut vector {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect())
    }
}

struct StoredPoint {
    _id: String,
    vector: Vec<f32>,
    chunk_text: String,
    source_id: String,
}

/// Brute-force in-memory vector index.
pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    points: RwLock<Vec<StoredPoint>>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            points: RwLock::new(Vec::new()),
        }
    }

    /// Distinct source ids currently indexed (test observability).
    pub fn indexed_source_ids(&self) -> Vec<String> {
        let points = self.points.read().expect("points lock");
        let mut ids: Vec<String> = points.iter().map(|p| p.source_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.read().expect("points lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn insert(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let mut points = self.points.write().expect("points lock");
        for (chunk, vector) in chunks.iter().zip(vectors) {
            points.push(StoredPoint {
                _id: Uuid::new_v4().to_string(),
                vector,
                chunk_text: chunk.text.clone(),
                source_id: chunk.source_id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<usize, IndexError> {
        let mut points = self.points.write().expect("points lock");
        let before = points.len();
        points.retain(|p| p.source_id != source_id);
        Ok(before - points.len())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let vector = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))?;

        let points = self.points.read().expect("points lock");
        let mut scored: Vec<SearchHit> = points
            .iter()
            .map(|p| SearchHit {
                chunk_text: p.chunk_text.clone(),
                source_id: p.source_id.clone(),
                score: round_score(cosine_similarity(&vector, &p.vector) as f64),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}
