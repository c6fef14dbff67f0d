//! Text extraction for registered sources.
//!
//! A [`WebLink`](crate::models::Source::WebLink) is fetched over HTTP and
//! stripped to its main text; a
//! [`StoredFile`](crate::models::Source::StoredFile) is downloaded from
//! object storage and dispatched by content type (PDF text extraction or
//! raw text decode).
//!
//! Transient failures (network errors, unparseable pages, empty content)
//! are reported as `Ok(None)` so the synchronizer can skip the source and
//! continue; an unsupported content type is a fatal
//! [`ExtractError::UnsupportedFormat`] because it indicates a caller bug
//! rather than transient absence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use tracing::{info, warn};

use crate::error::ExtractError;
use crate::models::{ExtractedDocument, Source};
use crate::storage::ObjectStorage;

/// Seam between the synchronizer and the concrete extractor, so sync logic
/// can be exercised against fakes.
#[async_trait]
pub trait ExtractText: Send + Sync {
    /// Extract text for a source.
    ///
    /// `Ok(None)` means "no content, skip this source". Every returned
    /// document carries the source's identity in `source_id`.
    async fn extract(&self, source: &Source) -> Result<Option<Vec<ExtractedDocument>>, ExtractError>;
}

/// Default extractor backed by object storage and an HTTP client.
pub struct Extractor {
    storage: Arc<dyn ObjectStorage>,
    http: reqwest::Client,
}

impl Extractor {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("default reqwest client");
        Self { storage, http }
    }

    async fn extract_webpage(&self, url: &str) -> Option<Vec<ExtractedDocument>> {
        info!(url, "fetching webpage content");
        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "failed to fetch webpage");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "webpage fetch returned an error status");
            return None;
        }
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(url, error = %e, "failed to read webpage body");
                return None;
            }
        };

        let text = html_to_text(&body);
        if text.trim().is_empty() {
            warn!(url, "no text content found on webpage");
            return None;
        }

        Some(vec![ExtractedDocument {
            text,
            source_id: url.to_string(),
            source_type: crate::models::SourceType::Webpage,
        }])
    }

    async fn extract_stored_file(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<Option<Vec<ExtractedDocument>>, ExtractError> {
        info!(filename, content_type, "extracting text from stored file");
        let bytes = match self.storage.get(filename).await {
            Ok((bytes, _)) => bytes,
            Err(e) => {
                warn!(filename, error = %e, "failed to download file from storage");
                return Ok(None);
            }
        };

        let text = match extract_file_text(&bytes, filename, content_type)? {
            Some(t) => t,
            None => return Ok(None),
        };

        if text.trim().is_empty() {
            warn!(filename, "no text content extracted from file");
            return Ok(None);
        }

        Ok(Some(vec![ExtractedDocument {
            text,
            source_id: filename.to_string(),
            source_type: crate::models::SourceType::Document,
        }]))
    }
}

#[async_trait]
impl ExtractText for Extractor {
    async fn extract(
        &self,
        source: &Source,
    ) -> Result<Option<Vec<ExtractedDocument>>, ExtractError> {
        match source {
            Source::WebLink { url } => Ok(self.extract_webpage(url).await),
            Source::StoredFile {
                filename,
                content_type,
            } => self.extract_stored_file(filename, content_type).await,
        }
    }
}

/// Decode raw file bytes into text based on content type.
///
/// PDF pages are extracted and merged into one text. A parse failure is
/// `Ok(None)` (skip); an unrecognized content type is fatal.
pub fn extract_file_text(
    bytes: &[u8],
    filename: &str,
    content_type: &str,
) -> Result<Option<String>, ExtractError> {
    // Strip any charset suffix ("text/plain; charset=utf-8").
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();

    match mime {
        "application/pdf" => match pdf_extract::extract_text_from_mem(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                warn!(filename, error = %e, "PDF extraction failed");
                Ok(None)
            }
        },
        m if m == "text/plain" || m.starts_with("text/") => {
            Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
        }
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

/// Strip an HTML document to its visible text.
///
/// Walks the parse tree collecting text nodes, skipping script, style, and
/// other non-content subtrees, then collapses runs of blank lines.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut out = String::new();
    let mut stack = vec![document.tree.root()];
    while let Some(node) = stack.pop() {
        match node.value() {
            scraper::Node::Text(t) => out.push_str(&t.text),
            scraper::Node::Element(el) => {
                match el.name() {
                    "script" | "style" | "noscript" | "template" | "head" => continue,
                    "p" | "div" | "br" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5"
                    | "h6" | "blockquote" | "pre" | "section" | "article" => out.push('\n'),
                    _ => {}
                }
                let children: Vec<_> = node.children().collect();
                stack.extend(children.into_iter().rev());
            }
            _ => {
                let children: Vec<_> = node.children().collect();
                stack.extend(children.into_iter().rev());
            }
        }
    }

    normalize_whitespace(&out)
}

/// Collapse horizontal whitespace within lines and runs of blank lines
/// between paragraphs.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        blank_run = 0;
        out.push_str(&line);
    }
    out
}
