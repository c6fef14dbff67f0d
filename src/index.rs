//! Vector index gateway (Qdrant).
//!
//! Owns the vector collection: ensures it exists with the embedding
//! model's dimensionality and cosine distance, performs similarity
//! search, and handles metadata-filtered deletion plus batched insertion.
//! Talks to Qdrant over its REST API.
//!
//! Deletion by source enumerates matching points via the paginated scroll
//! API, looping until no continuation offset remains, then issues deletes
//! in id batches to respect backend payload limits.
//!
//! Backend failures surface as typed [`IndexError`]s so the synchronizer
//! can treat them as failed-for-this-source instead of aborting the batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::config::VectorConfig;
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::models::{Chunk, SearchHit};

/// Page size for scroll enumeration and id-batch size for deletes.
const SCROLL_PAGE_SIZE: usize = 100;
const DELETE_BATCH_SIZE: usize = 100;

/// Nearest-neighbor store over chunk embeddings.
///
/// The synchronizer and responder depend on this trait; production uses
/// [`QdrantIndex`], tests an in-memory implementation.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed and upsert a batch of chunks. Either the whole batch lands
    /// with its ids and metadata, or the call reports failure.
    async fn insert(&self, chunks: &[Chunk]) -> Result<(), IndexError>;

    /// Remove every vector belonging to a source. Returns the number of
    /// points removed.
    async fn delete_by_source(&self, source_id: &str) -> Result<usize, IndexError>;

    /// Top-k similarity search for a query text, ordered by descending
    /// similarity, scores rounded to 4 decimals.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError>;
}

/// Qdrant-backed [`VectorIndex`].
pub struct QdrantIndex {
    base_url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
    embedder: Arc<dyn Embedder>,
}

impl QdrantIndex {
    /// Connect to Qdrant, verify reachability, and create the collection
    /// if it does not exist yet.
    ///
    /// The existence check is by name only; the dimension and metric of a
    /// pre-existing collection are not re-validated.
    pub async fn connect(
        config: &VectorConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let index = Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            client,
            embedder,
        };

        index.ensure_collection().await?;
        Ok(index)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    /// Idempotent create-if-absent for the collection, with the embedding
    /// model's dimensionality and cosine distance.
    async fn ensure_collection(&self) -> Result<(), IndexError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await
            .map_err(IndexError::from_transport)?;

        if resp.status().is_success() {
            info!(collection = %self.collection, "collection already exists");
            return Ok(());
        }
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(IndexError::OperationFailed(format!(
                "collection lookup failed (HTTP {})",
                resp.status()
            )));
        }

        info!(collection = %self.collection, dims = self.embedder.dims(), "creating collection");
        let body = json!({
            "vectors": {
                "size": self.embedder.dims(),
                "distance": "Cosine",
            }
        });
        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(IndexError::from_transport)?;

        if !resp.status().is_success() {
            return Err(IndexError::OperationFailed(format!(
                "collection create failed (HTTP {})",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Enumerate the point ids of every vector belonging to a source,
    /// following scroll pagination to the end.
    async fn point_ids_for_source(&self, source_id: &str) -> Result<Vec<Value>, IndexError> {
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": source_filter(source_id),
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": false,
                "with_vector": false,
            });
            if let Some(ref off) = offset {
                body["offset"] = off.clone();
            }

            let resp = self
                .request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/scroll", self.collection),
                )
                .json(&body)
                .send()
                .await
                .map_err(IndexError::from_transport)?;

            if !resp.status().is_success() {
                return Err(IndexError::OperationFailed(format!(
                    "scroll failed (HTTP {})",
                    resp.status()
                )));
            }

            let json: Value = resp
                .json()
                .await
                .map_err(|e| IndexError::OperationFailed(e.to_string()))?;

            let points = json["result"]["points"].as_array().cloned().unwrap_or_default();
            if points.is_empty() {
                break;
            }
            ids.extend(points.into_iter().filter_map(|p| p.get("id").cloned()));

            match json["result"]["next_page_offset"].clone() {
                Value::Null => break,
                next => offset = Some(next),
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
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
        if vectors.len() != chunks.len() {
            return Err(IndexError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let points: Vec<Value> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": {
                        "chunk_text": chunk.text,
                        "source_id": chunk.source_id,
                    },
                })
            })
            .collect();

        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(IndexError::from_transport)?;

        if !resp.status().is_success() {
            return Err(IndexError::OperationFailed(format!(
                "upsert of {} points failed (HTTP {})",
                chunks.len(),
                resp.status()
            )));
        }

        info!(count = chunks.len(), "inserted chunk embeddings");
        Ok(())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<usize, IndexError> {
        let ids = self.point_ids_for_source(source_id).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            let resp = self
                .request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/delete?wait=true", self.collection),
                )
                .json(&json!({ "points": batch }))
                .send()
                .await
                .map_err(IndexError::from_transport)?;

            if !resp.status().is_success() {
                return Err(IndexError::OperationFailed(format!(
                    "delete of {} points failed (HTTP {})",
                    batch.len(),
                    resp.status()
                )));
            }
        }

        info!(source_id, count = ids.len(), "removed embeddings for source");
        Ok(ids.len())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        info!(query, k, "searching vector index");
        let vector = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))?;

        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(IndexError::from_transport)?;

        if !resp.status().is_success() {
            return Err(IndexError::OperationFailed(format!(
                "search failed (HTTP {})",
                resp.status()
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| IndexError::OperationFailed(e.to_string()))?;
        Ok(parse_search_hits(&json))
    }
}

/// Metadata filter matching every point of one source.
fn source_filter(source_id: &str) -> Value {
    json!({
        "must": [
            { "key": "source_id", "match": { "value": source_id } }
        ]
    })
}

/// Round a similarity score to 4 decimal digits for display stability.
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Parse a Qdrant search response into ordered [`SearchHit`]s.
fn parse_search_hits(json: &Value) -> Vec<SearchHit> {
    json["result"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let payload = hit.get("payload")?;
                    Some(SearchHit {
                        chunk_text: payload["chunk_text"].as_str()?.to_string(),
                        source_id: payload["source_id"].as_str()?.to_string(),
                        score: round_score(hit["score"].as_f64().unwrap_or(0.0)),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
