//! Shared fakes for integration tests: an in-memory object store and a
//! canned-text extractor, so the full pipeline runs without S3, Qdrant,
//! or any API key.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use ragify::error::ExtractError;
use ragify::extract::ExtractText;
use ragify::models::{ExtractedDocument, Source};
use ragify::storage::ObjectStorage;

/// In-memory [`ObjectStorage`] with the same listing/get/put/delete
/// contract as the S3 client.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn list_filenames(&self) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        let mut names: Vec<String> = objects.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, filename: &str) -> Result<(Vec<u8>, String)> {
        let objects = self.objects.lock().unwrap();
        match objects.get(filename) {
            Some(entry) => Ok(entry.clone()),
            None => bail!("object not found: {}", filename),
        }
    }

    async fn put(&self, filename: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(filename.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://{}", filename))
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.remove(filename);
        Ok(())
    }
}

/// Extractor that decodes stored text files from a [`MemoryStorage`] and
/// serves canned page text for links. Unknown sources yield no content.
pub struct FakeExtractor {
    pub pages: HashMap<String, String>,
    pub storage: std::sync::Arc<MemoryStorage>,
}

#[async_trait]
impl ExtractText for FakeExtractor {
    async fn extract(
        &self,
        source: &Source,
    ) -> Result<Option<Vec<ExtractedDocument>>, ExtractError> {
        match source {
            Source::WebLink { url } => Ok(self.pages.get(url).map(|text| {
                vec![ExtractedDocument {
                    text: text.clone(),
                    source_id: url.clone(),
                    source_type: source.source_type(),
                }]
            })),
            Source::StoredFile { filename, .. } => {
                let Ok((bytes, content_type)) = self.storage.get(filename).await else {
                    return Ok(None);
                };
                if !content_type.starts_with("text/") {
                    return Err(ExtractError::UnsupportedFormat(content_type));
                }
                Ok(Some(vec![ExtractedDocument {
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                    source_id: filename.clone(),
                    source_type: source.source_type(),
                }]))
            }
        }
    }
}
