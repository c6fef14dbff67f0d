//! Source synchronizer: reconciles the vector index with the desired
//! source set.
//!
//! Given the previously synchronized set and the new desired set, computes
//! the added and removed sources, drives extraction and chunking for
//! additions, and source-filtered deletion for removals. All deletions
//! complete (or are recorded as failed) before any insertion, so a source
//! that is removed and re-added in one save never accumulates duplicate
//! chunks.
//!
//! Failures are isolated per source: a bad link or missing file is
//! recorded in the result and the rest of the batch proceeds. Additions
//! are extracted and embedded in fixed-size batches to bound peak memory
//! and API load; an index failure fails only that batch's sources.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::chunk::chunk_documents;
use crate::config::ChunkingConfig;
use crate::error::FailureKind;
use crate::extract::ExtractText;
use crate::index::VectorIndex;
use crate::models::Source;
use crate::registry::LinkRegistry;
use crate::storage::{content_type_for, ObjectStorage};

/// How many sources are extracted and embedded per insertion batch.
const EXTRACTION_BATCH_SIZE: usize = 10;

/// One source that could not be synchronized, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub kind: FailureKind,
}

/// Failures split by direction, so callers can tell a source that failed
/// to index apart from one whose stale vectors could not be removed.
#[derive(Debug, Clone, Default)]
pub struct SyncFailures {
    pub added: Vec<SourceFailure>,
    pub removed: Vec<SourceFailure>,
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Source ids newly indexed in this pass.
    pub added: Vec<String>,
    /// Source ids whose vectors were removed in this pass.
    pub removed: Vec<String>,
    pub failed: SyncFailures,
}

impl SyncResult {
    pub fn is_fully_synced(&self) -> bool {
        self.failed.added.is_empty() && self.failed.removed.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.added.len() + self.failed.removed.len()
    }

    fn failed_added_ids(&self) -> BTreeSet<&str> {
        self.failed
            .added
            .iter()
            .map(|f| f.source_id.as_str())
            .collect()
    }
}

/// Drives the extractor, chunker, and vector index gateway through a
/// delete-then-insert synchronization pass.
pub struct Synchronizer {
    extractor: Arc<dyn ExtractText>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Synchronizer {
    pub fn new(
        extractor: Arc<dyn ExtractText>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            extractor,
            index,
            chunking,
            batch_size: EXTRACTION_BATCH_SIZE,
        }
    }

    #[cfg(test)]
    fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Reconcile the index from `previous` to `desired`.
    ///
    /// `added = desired − previous`, `removed = previous − desired`
    /// (set difference by source id, order-independent). A source present
    /// in both sets is untouched, so `synchronize(S, S)` performs no
    /// insertions and no deletions.
    pub async fn synchronize(&self, previous: &[Source], desired: &[Source]) -> SyncResult {
        let previous_ids: BTreeSet<&str> = previous.iter().map(|s| s.id()).collect();
        let desired_ids: BTreeSet<&str> = desired.iter().map(|s| s.id()).collect();

        let removed_ids: Vec<&str> = previous_ids.difference(&desired_ids).copied().collect();
        let added: Vec<&Source> = desired
            .iter()
            .filter(|s| !previous_ids.contains(s.id()))
            .collect();

        info!(
            added = added.len(),
            removed = removed_ids.len(),
            "synchronizing sources"
        );

        let mut result = SyncResult::default();

        // Delete phase. Removals first, then a clear of every added id:
        // an added source may carry stale vectors from an earlier failed
        // sync or an overwrite, and those must be gone before re-insertion.
        for id in removed_ids {
            match self.index.delete_by_source(id).await {
                Ok(count) => {
                    info!(source_id = id, count, "removed source from index");
                    result.removed.push(id.to_string());
                }
                Err(e) => {
                    warn!(source_id = id, error = %e, "failed to remove source from index");
                    result.failed.removed.push(SourceFailure {
                        source_id: id.to_string(),
                        kind: FailureKind::Index,
                    });
                }
            }
        }

        let mut insertable: Vec<&Source> = Vec::with_capacity(added.len());
        for source in added {
            match self.index.delete_by_source(source.id()).await {
                Ok(_) => insertable.push(source),
                Err(e) => {
                    warn!(source_id = source.id(), error = %e, "failed to clear stale vectors");
                    result.failed.added.push(SourceFailure {
                        source_id: source.id().to_string(),
                        kind: FailureKind::Index,
                    });
                }
            }
        }

        // Insert phase, in bounded batches with per-source failure
        // isolation.
        for batch in insertable.chunks(self.batch_size) {
            self.index_batch(batch, &mut result).await;
        }

        result
    }

    async fn index_batch(&self, batch: &[&Source], result: &mut SyncResult) {
        let mut batch_chunks = Vec::new();
        let mut batch_ids = Vec::new();

        for source in batch {
            match self.extractor.extract(source).await {
                Ok(Some(docs)) => {
                    let chunks = chunk_documents(
                        &docs,
                        self.chunking.chunk_size,
                        self.chunking.chunk_overlap,
                    );
                    if chunks.is_empty() {
                        warn!(source_id = source.id(), "no text content found");
                        result.failed.added.push(SourceFailure {
                            source_id: source.id().to_string(),
                            kind: FailureKind::NoContent,
                        });
                        continue;
                    }
                    batch_chunks.extend(chunks);
                    batch_ids.push(source.id().to_string());
                }
                Ok(None) => {
                    warn!(source_id = source.id(), "no content extracted, skipping");
                    result.failed.added.push(SourceFailure {
                        source_id: source.id().to_string(),
                        kind: FailureKind::NoContent,
                    });
                }
                Err(e) => {
                    warn!(source_id = source.id(), error = %e, "extraction failed");
                    result.failed.added.push(SourceFailure {
                        source_id: source.id().to_string(),
                        kind: FailureKind::UnsupportedFormat,
                    });
                }
            }
        }

        if batch_chunks.is_empty() {
            return;
        }

        match self.index.insert(&batch_chunks).await {
            Ok(()) => {
                info!(
                    sources = batch_ids.len(),
                    chunks = batch_chunks.len(),
                    "indexed batch"
                );
                result.added.extend(batch_ids);
            }
            Err(e) => {
                warn!(error = %e, "failed to index batch");
                for id in batch_ids {
                    result.failed.added.push(SourceFailure {
                        source_id: id,
                        kind: FailureKind::Index,
                    });
                }
            }
        }
    }

    /// Save action for the link page: synchronize the index against the
    /// desired link list, then persist the new baseline.
    ///
    /// Links whose indexing failed are left out of the persisted registry,
    /// so a later save retries them as additions.
    pub async fn sync_links(
        &self,
        registry: &LinkRegistry,
        desired_links: &[String],
    ) -> Result<SyncResult> {
        let previous: Vec<Source> = registry
            .get_links()
            .await?
            .into_iter()
            .map(|url| Source::WebLink { url })
            .collect();
        let desired: Vec<Source> = desired_links
            .iter()
            .map(|url| Source::WebLink { url: url.clone() })
            .collect();

        let result = self.synchronize(&previous, &desired).await;

        let failed = result.failed_added_ids();
        let persisted: Vec<String> = desired_links
            .iter()
            .filter(|url| !failed.contains(url.as_str()))
            .cloned()
            .collect();
        registry.replace_links(&persisted).await?;

        Ok(result)
    }

    /// Save action for the file page: synchronize the index after uploads
    /// and deletions have been applied to object storage.
    ///
    /// `uploaded` and `deleted` are the filenames changed by this save;
    /// the storage listing (already reflecting them) is the desired set.
    /// A re-uploaded file counts as added, so its old vectors are cleared
    /// before re-indexing.
    pub async fn sync_files(
        &self,
        storage: &dyn ObjectStorage,
        uploaded: &[String],
        deleted: &[String],
    ) -> Result<SyncResult> {
        let current = storage.list_filenames().await?;

        let desired: Vec<Source> = current
            .iter()
            .map(|name| Source::StoredFile {
                filename: name.clone(),
                content_type: content_type_for(name).to_string(),
            })
            .collect();

        let uploaded_ids: BTreeSet<&str> = uploaded.iter().map(|s| s.as_str()).collect();
        let mut previous: Vec<Source> = current
            .iter()
            .filter(|name| !uploaded_ids.contains(name.as_str()))
            .map(|name| Source::StoredFile {
                filename: name.clone(),
                content_type: content_type_for(name).to_string(),
            })
            .collect();
        for name in deleted {
            previous.push(Source::StoredFile {
                filename: name.clone(),
                content_type: content_type_for(name).to_string(),
            });
        }

        Ok(self.synchronize(&previous, &desired).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractError, IndexError};
    use crate::memory_index::{HashEmbedder, MemoryIndex};
    use crate::models::{Chunk, ExtractedDocument, SearchHit, SourceType};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Extractor fake: serves canned text per source id; unknown ids have
    /// no content, ids in `unsupported` fail fatally.
    struct FakeExtractor {
        texts: HashMap<String, String>,
        unsupported: Vec<String>,
    }

    impl FakeExtractor {
        fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                texts: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                unsupported: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ExtractText for FakeExtractor {
        async fn extract(
            &self,
            source: &Source,
        ) -> Result<Option<Vec<ExtractedDocument>>, ExtractError> {
            if self.unsupported.iter().any(|id| id == source.id()) {
                return Err(ExtractError::UnsupportedFormat("image/gif".to_string()));
            }
            Ok(self.texts.get(source.id()).map(|text| {
                vec![ExtractedDocument {
                    text: text.clone(),
                    source_id: source.id().to_string(),
                    source_type: SourceType::Document,
                }]
            }))
        }
    }

    /// Index wrapper counting operations and optionally failing them.
    struct RecordingIndex {
        inner: MemoryIndex,
        inserts: AtomicUsize,
        deletes: AtomicUsize,
        fail_insert_for: Option<String>,
        fail_delete_for: Option<String>,
    }

    impl RecordingIndex {
        fn new() -> Self {
            Self {
                inner: MemoryIndex::new(Arc::new(HashEmbedder::new(8))),
                inserts: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                fail_insert_for: None,
                fail_delete_for: None,
            }
        }
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn insert(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            if let Some(ref bad) = self.fail_insert_for {
                if chunks.iter().any(|c| &c.source_id == bad) {
                    return Err(IndexError::OperationFailed("injected".to_string()));
                }
            }
            self.inner.insert(chunks).await
        }

        async fn delete_by_source(&self, source_id: &str) -> Result<usize, IndexError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete_for.as_deref() == Some(source_id) {
                return Err(IndexError::Unavailable("injected".to_string()));
            }
            self.inner.delete_by_source(source_id).await
        }

        async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
            self.inner.search(query, k).await
        }
    }

    fn file(name: &str) -> Source {
        Source::StoredFile {
            filename: name.to_string(),
            content_type: content_type_for(name).to_string(),
        }
    }

    fn synchronizer(
        extractor: FakeExtractor,
        index: Arc<RecordingIndex>,
    ) -> (Synchronizer, Arc<RecordingIndex>) {
        let sync = Synchronizer::new(
            Arc::new(extractor),
            index.clone(),
            ChunkingConfig {
                chunk_size: 50,
                chunk_overlap: 10,
            },
        );
        (sync, index)
    }

    #[tokio::test]
    async fn identical_sets_perform_no_operations() {
        let extractor = FakeExtractor::new(&[("a.pdf", "alpha"), ("b.txt", "beta")]);
        let (sync, index) = synchronizer(extractor, Arc::new(RecordingIndex::new()));

        let set = vec![file("a.pdf"), file("b.txt")];
        let result = sync.synchronize(&set, &set).await;

        assert!(result.is_fully_synced());
        assert!(result.added.is_empty());
        assert!(result.removed.is_empty());
        assert_eq!(index.inserts.load(Ordering::SeqCst), 0);
        assert_eq!(index.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn add_and_remove_scenario() {
        let extractor = FakeExtractor::new(&[
            ("a.pdf", "content of a"),
            ("b.txt", "content of b"),
            ("c.txt", "content of c"),
        ]);
        let (sync, index) = synchronizer(extractor, Arc::new(RecordingIndex::new()));

        let initial = vec![file("a.pdf"), file("b.txt")];
        sync.synchronize(&[], &initial).await;
        assert_eq!(index.inner.indexed_source_ids(), vec!["a.pdf", "b.txt"]);

        let desired = vec![file("b.txt"), file("c.txt")];
        let result = sync.synchronize(&initial, &desired).await;

        assert_eq!(result.added, vec!["c.txt"]);
        assert_eq!(result.removed, vec!["a.pdf"]);
        assert!(result.is_fully_synced());
        assert_eq!(index.inner.indexed_source_ids(), vec!["b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn round_trip_restores_index_state() {
        let extractor = FakeExtractor::new(&[
            ("a.pdf", "content of a"),
            ("b.txt", "content of b"),
            ("c.txt", "content of c"),
        ]);
        let (sync, index) = synchronizer(extractor, Arc::new(RecordingIndex::new()));

        let set_a = vec![file("a.pdf"), file("b.txt")];
        let set_b = vec![file("b.txt"), file("c.txt")];

        sync.synchronize(&[], &set_a).await;
        let before = index.inner.indexed_source_ids();

        sync.synchronize(&set_a, &set_b).await;
        sync.synchronize(&set_b, &set_a).await;

        assert_eq!(index.inner.indexed_source_ids(), before);
    }

    #[tokio::test]
    async fn extraction_failure_is_recorded_and_isolated() {
        // c.txt has no content (storage 404 analog); a.pdf removal still
        // succeeds.
        let extractor = FakeExtractor::new(&[("a.pdf", "content of a")]);
        let (sync, index) = synchronizer(extractor, Arc::new(RecordingIndex::new()));

        sync.synchronize(&[], &[file("a.pdf")]).await;

        let result = sync
            .synchronize(&[file("a.pdf")], &[file("c.txt")])
            .await;

        assert_eq!(result.removed, vec!["a.pdf"]);
        assert_eq!(
            result.failed.added,
            vec![SourceFailure {
                source_id: "c.txt".to_string(),
                kind: FailureKind::NoContent,
            }]
        );
        assert!(index.inner.indexed_source_ids().is_empty());
    }

    #[tokio::test]
    async fn unsupported_format_is_recorded_distinctly() {
        let mut extractor = FakeExtractor::new(&[]);
        extractor.unsupported.push("pic.gif".to_string());
        let (sync, _) = synchronizer(extractor, Arc::new(RecordingIndex::new()));

        let result = sync
            .synchronize(
                &[],
                &[Source::StoredFile {
                    filename: "pic.gif".to_string(),
                    content_type: "image/gif".to_string(),
                }],
            )
            .await;

        assert_eq!(result.failed.added[0].kind, FailureKind::UnsupportedFormat);
    }

    #[tokio::test]
    async fn batch_failure_does_not_affect_other_batches() {
        let extractor = FakeExtractor::new(&[
            ("a.txt", "content of a"),
            ("bad.txt", "content of bad"),
            ("c.txt", "content of c"),
        ]);
        let mut index = RecordingIndex::new();
        index.fail_insert_for = Some("bad.txt".to_string());
        let index = Arc::new(index);
        let sync = Synchronizer::new(
            Arc::new(extractor),
            index.clone(),
            ChunkingConfig {
                chunk_size: 50,
                chunk_overlap: 10,
            },
        )
        .with_batch_size(1);

        let desired = vec![file("a.txt"), file("bad.txt"), file("c.txt")];
        let result = sync.synchronize(&[], &desired).await;

        assert_eq!(result.added, vec!["a.txt", "c.txt"]);
        assert_eq!(result.failed.added.len(), 1);
        assert_eq!(result.failed.added[0].source_id, "bad.txt");
        assert_eq!(result.failed.added[0].kind, FailureKind::Index);
        assert_eq!(index.inner.indexed_source_ids(), vec!["a.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn removal_failure_is_isolated_per_source() {
        let extractor = FakeExtractor::new(&[("a.txt", "aaa"), ("b.txt", "bbb")]);
        let previous = vec![file("a.txt"), file("b.txt")];

        let mut index = RecordingIndex::new();
        index.fail_delete_for = Some("a.txt".to_string());
        let index = Arc::new(index);
        let sync = Synchronizer::new(
            Arc::new(extractor),
            index.clone(),
            ChunkingConfig {
                chunk_size: 50,
                chunk_overlap: 10,
            },
        );
        sync.synchronize(&[], &previous).await;

        let result = sync.synchronize(&previous, &[]).await;

        assert_eq!(result.removed, vec!["b.txt"]);
        assert_eq!(result.failed.removed.len(), 1);
        assert_eq!(result.failed.removed[0].source_id, "a.txt");
        assert_eq!(result.failed.removed[0].kind, FailureKind::Index);
    }

    #[tokio::test]
    async fn re_added_source_is_not_duplicated() {
        // Simulates an overwrite: the id is absent from `previous` but its
        // chunks are already indexed.
        let extractor = FakeExtractor::new(&[("a.txt", "fresh content of a")]);
        let (sync, index) = synchronizer(extractor, Arc::new(RecordingIndex::new()));

        sync.synchronize(&[], &[file("a.txt")]).await;
        let first_count = index.inner.len();

        sync.synchronize(&[], &[file("a.txt")]).await;

        assert_eq!(index.inner.len(), first_count);
        assert_eq!(index.inner.indexed_source_ids(), vec!["a.txt"]);
    }
}
