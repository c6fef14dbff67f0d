//! # Ragify
//!
//! A retrieval-augmented chat assistant over user-managed knowledge
//! sources: uploaded documents in object storage and registered web links.
//!
//! The pipeline keeps a vector index synchronized with the registered
//! source set and answers chat prompts with model output grounded in the
//! top-k retrieved chunks:
//!
//! 1. [`sync::Synchronizer`] diffs the previous source set against the
//!    desired one and drives extraction, chunking, and index updates.
//! 2. [`extract::Extractor`] turns web pages and stored files (PDF, plain
//!    text) into text documents.
//! 3. [`chunk`] splits extracted text into bounded, overlapping chunks.
//! 4. [`index::QdrantIndex`] embeds chunks and owns the vector collection.
//! 5. [`responder::Responder`] retrieves context for a user prompt and
//!    streams the chat model's reply.
//!
//! Persistent state lives in three places: the S3 bucket (uploaded files),
//! the SQLite link registry, and the Qdrant collection. The registry and
//! storage listing together are the source of truth; the index is derived
//! and can always be rebuilt from them.

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod memory_index;
pub mod models;
pub mod registry;
pub mod responder;
pub mod storage;
pub mod sync;
