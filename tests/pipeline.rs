//! End-to-end pipeline tests over in-memory collaborators: storage,
//! extractor, vector index, link registry, and responder wired together
//! the way the CLI wires the production implementations.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use common::{FakeExtractor, MemoryStorage};
use ragify::chat::ChatModel;
use ragify::config::ChunkingConfig;
use ragify::error::ChatError;
use ragify::index::VectorIndex;
use ragify::memory_index::{HashEmbedder, MemoryIndex};
use ragify::models::ChatMessage;
use ragify::registry::LinkRegistry;
use ragify::responder::Responder;
use ragify::storage::ObjectStorage;
use ragify::sync::Synchronizer;

fn chunking() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 40,
    }
}

struct Pipeline {
    storage: Arc<MemoryStorage>,
    index: Arc<MemoryIndex>,
    sync: Synchronizer,
}

fn pipeline(pages: &[(&str, &str)]) -> Pipeline {
    let storage = Arc::new(MemoryStorage::new());
    let index = Arc::new(MemoryIndex::new(Arc::new(HashEmbedder::new(32))));
    let extractor = Arc::new(FakeExtractor {
        pages: pages
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        storage: storage.clone(),
    });
    let sync = Synchronizer::new(extractor, index.clone(), chunking());
    Pipeline {
        storage,
        index,
        sync,
    }
}

async fn upload(storage: &MemoryStorage, name: &str, text: &str) {
    storage
        .put(name, text.as_bytes().to_vec(), "text/plain")
        .await
        .unwrap();
}

#[tokio::test]
async fn file_add_then_remove_keeps_index_consistent() {
    let p = pipeline(&[]);

    upload(&p.storage, "a.txt", "alpha document about refunds").await;
    upload(&p.storage, "b.txt", "beta document about shipping").await;

    let result = p
        .sync
        .sync_files(
            p.storage.as_ref(),
            &["a.txt".to_string(), "b.txt".to_string()],
            &[],
        )
        .await
        .unwrap();
    assert!(result.is_fully_synced());
    assert_eq!(p.index.indexed_source_ids(), vec!["a.txt", "b.txt"]);

    p.storage.delete("b.txt").await.unwrap();
    let result = p
        .sync
        .sync_files(p.storage.as_ref(), &[], &["b.txt".to_string()])
        .await
        .unwrap();
    assert_eq!(result.removed, vec!["b.txt"]);
    assert_eq!(p.index.indexed_source_ids(), vec!["a.txt"]);

    // nothing of the deleted source ever comes back from search
    let hits = p.index.search("beta document about shipping", 10).await.unwrap();
    assert!(hits.iter().all(|h| h.source_id != "b.txt"));
}

#[tokio::test]
async fn re_uploading_a_file_does_not_duplicate_chunks() {
    let p = pipeline(&[]);

    upload(&p.storage, "a.txt", "first version").await;
    p.sync
        .sync_files(p.storage.as_ref(), &["a.txt".to_string()], &[])
        .await
        .unwrap();
    let count = p.index.len();

    upload(&p.storage, "a.txt", "second version").await;
    p.sync
        .sync_files(p.storage.as_ref(), &["a.txt".to_string()], &[])
        .await
        .unwrap();

    assert_eq!(p.index.len(), count);
    let hits = p.index.search("second version", 1).await.unwrap();
    assert_eq!(hits[0].chunk_text, "second version");
}

#[tokio::test]
async fn link_save_persists_only_successfully_synced_links() {
    let p = pipeline(&[("https://example.com/faq", "our faq page text")]);
    let dir = tempfile::tempdir().unwrap();
    let registry = LinkRegistry::connect(&dir.path().join("links.db"))
        .await
        .unwrap();

    let desired = vec![
        "https://example.com/faq".to_string(),
        "https://example.com/missing".to_string(),
    ];
    let result = p.sync.sync_links(&registry, &desired).await.unwrap();

    assert_eq!(result.added, vec!["https://example.com/faq"]);
    assert_eq!(result.failed.added.len(), 1);
    assert_eq!(
        registry.get_links().await.unwrap(),
        vec!["https://example.com/faq".to_string()]
    );

    // a later save of the same desired set retries the failed link
    let result = p.sync.sync_links(&registry, &desired).await.unwrap();
    assert_eq!(result.failed.added.len(), 1);
    assert_eq!(
        result.failed.added[0].source_id,
        "https://example.com/missing"
    );
}

#[tokio::test]
async fn link_removal_clears_registry_and_index() {
    let p = pipeline(&[
        ("https://example.com/a", "page a text"),
        ("https://example.com/b", "page b text"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let registry = LinkRegistry::connect(&dir.path().join("links.db"))
        .await
        .unwrap();

    let both = vec![
        "https://example.com/a".to_string(),
        "https://example.com/b".to_string(),
    ];
    p.sync.sync_links(&registry, &both).await.unwrap();

    let only_a = vec!["https://example.com/a".to_string()];
    let result = p.sync.sync_links(&registry, &only_a).await.unwrap();

    assert_eq!(result.removed, vec!["https://example.com/b"]);
    assert_eq!(registry.get_links().await.unwrap(), only_a);
    assert_eq!(
        p.index.indexed_source_ids(),
        vec!["https://example.com/a"]
    );
}

/// Chat fake emitting a fixed fragment script.
struct ScriptedChat {
    fragments: Vec<&'static str>,
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn stream_chat(
        &self,
        _messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, ChatError>>, ChatError> {
        let fragments: Vec<String> = self.fragments.iter().map(|s| s.to_string()).collect();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for fragment in fragments {
                if tx.send(Ok(fragment)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

#[tokio::test]
async fn chat_answer_is_grounded_in_indexed_document() {
    let p = pipeline(&[]);
    upload(&p.storage, "policy.pdf.txt", "Refunds within 30 days.").await;
    p.sync
        .sync_files(p.storage.as_ref(), &["policy.pdf.txt".to_string()], &[])
        .await
        .unwrap();

    let responder = Responder::new(
        p.index.clone(),
        Arc::new(ScriptedChat {
            fragments: vec!["Refunds are accepted ", "within the 30-day window."],
        }),
        3,
    );

    let mut reply = responder.respond("What is the refund policy?", &[]).await;

    assert!(reply
        .hits
        .iter()
        .any(|h| h.source_id == "policy.pdf.txt" && h.chunk_text.contains("30 days")));

    let mut text = String::new();
    while let Some(fragment) = reply.fragments.recv().await {
        text.push_str(&fragment);
    }
    assert_eq!(text, "Refunds are accepted within the 30-day window.");
}

#[tokio::test]
async fn unsupported_file_is_reported_but_does_not_abort_the_save() {
    let p = pipeline(&[]);
    upload(&p.storage, "good.txt", "useful text").await;
    p.storage
        .put("pic.gif", b"GIF89a".to_vec(), "image/gif")
        .await
        .unwrap();

    let result = p
        .sync
        .sync_files(
            p.storage.as_ref(),
            &["good.txt".to_string(), "pic.gif".to_string()],
            &[],
        )
        .await
        .unwrap();

    assert_eq!(result.added, vec!["good.txt"]);
    assert_eq!(result.failed.added.len(), 1);
    assert_eq!(result.failed.added[0].source_id, "pic.gif");
    assert_eq!(p.index.indexed_source_ids(), vec!["good.txt"]);
}

#[tokio::test]
async fn extractor_map_is_case_sensitive_on_source_identity() {
    // identity is the exact string key, so differently-cased URLs are
    // distinct sources
    let mut pages = HashMap::new();
    pages.insert("https://example.com/A".to_string(), "text".to_string());
    let storage = Arc::new(MemoryStorage::new());
    let index = Arc::new(MemoryIndex::new(Arc::new(HashEmbedder::new(32))));
    let extractor = Arc::new(FakeExtractor {
        pages,
        storage: storage.clone(),
    });
    let sync = Synchronizer::new(extractor, index.clone(), chunking());

    let dir = tempfile::tempdir().unwrap();
    let registry = LinkRegistry::connect(&dir.path().join("links.db"))
        .await
        .unwrap();

    let result = sync
        .sync_links(&registry, &["https://example.com/a".to_string()])
        .await
        .unwrap();
    assert_eq!(result.failed.added.len(), 1);
    assert!(registry.get_links().await.unwrap().is_empty());
}
