//! Core data models for the ingestion and retrieval pipeline.
//!
//! These types represent the sources, extracted documents, chunks, and
//! search hits that flow between the extractor, chunker, vector index
//! gateway, and responder.

use serde::{Deserialize, Serialize};

/// A unit of ingestable content, identified by a stable string key.
///
/// The identity string (URL or filename) is the join key between the
/// user-maintained source set and the chunks indexed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A registered web link, identified by its URL.
    WebLink { url: String },
    /// An uploaded file held by object storage, identified by filename.
    StoredFile {
        filename: String,
        content_type: String,
    },
}

impl Source {
    /// Stable identity of this source (the URL or filename).
    pub fn id(&self) -> &str {
        match self {
            Source::WebLink { url } => url,
            Source::StoredFile { filename, .. } => filename,
        }
    }

    /// Kind of document this source yields.
    pub fn source_type(&self) -> SourceType {
        match self {
            Source::WebLink { .. } => SourceType::Webpage,
            Source::StoredFile { .. } => SourceType::Document,
        }
    }
}

/// Whether extracted text came from a webpage or an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Webpage,
    Document,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Webpage => write!(f, "webpage"),
            SourceType::Document => write!(f, "document"),
        }
    }
}

/// Text extracted from a single source, carrying the source identity so
/// chunking never has to re-derive it.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub source_id: String,
    pub source_type: SourceType,
}

/// A bounded-length slice of a source's extracted text.
///
/// Chunks of the same document overlap by a fixed number of characters so
/// retrieval keeps cross-boundary context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
}

/// A single retrieval result: chunk text plus its source and similarity
/// score (rounded to 4 decimals for display stability).
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_text: String,
    pub source_id: String,
    pub score: f64,
}

/// Conversation roles understood by the chat-model collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_is_url_or_filename() {
        let link = Source::WebLink {
            url: "https://example.com/docs".to_string(),
        };
        assert_eq!(link.id(), "https://example.com/docs");
        assert_eq!(link.source_type(), SourceType::Webpage);

        let file = Source::StoredFile {
            filename: "policy.pdf".to_string(),
            content_type: "application/pdf".to_string(),
        };
        assert_eq!(file.id(), "policy.pdf");
        assert_eq!(file.source_type(), SourceType::Document);
    }

    #[test]
    fn source_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SourceType::Webpage).unwrap(),
            "\"webpage\""
        );
        assert_eq!(
            serde_json::to_string(&SourceType::Document).unwrap(),
            "\"document\""
        );
    }
}
