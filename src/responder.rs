//! Retrieval-augmented responder: answers a user message with streamed
//! model output grounded in the top-k retrieved chunks.
//!
//! Failures never cross the chat boundary as errors. A retrieval or model
//! failure becomes a single user-facing error fragment terminating the
//! stream, so the session stays usable for the next turn.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chat::ChatModel;
use crate::index::VectorIndex;
use crate::models::{ChatMessage, SearchHit};

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant.";

/// A streamed reply plus the retrieval hits that grounded it.
pub struct ResponderReply {
    /// Top-k chunks retrieved for the user message, in relevance order.
    /// Empty when retrieval itself failed.
    pub hits: Vec<SearchHit>,
    /// Response fragments in generation order. The stream is finite; an
    /// error turns into a final user-facing fragment, never a panic.
    pub fragments: mpsc::Receiver<String>,
}

/// Streams retrieval-augmented answers over a vector index and chat model.
pub struct Responder {
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
}

impl Responder {
    pub fn new(index: Arc<dyn VectorIndex>, model: Arc<dyn ChatModel>, top_k: usize) -> Self {
        Self {
            index,
            model,
            top_k,
        }
    }

    /// Answer `user_prompt` in the context of `history`, streaming
    /// fragments as the model emits them.
    pub async fn respond(&self, user_prompt: &str, history: &[ChatMessage]) -> ResponderReply {
        let hits = match self.index.search(user_prompt, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                return ResponderReply {
                    hits: Vec::new(),
                    fragments: single_fragment(format!(
                        "Sorry, I could not look up the knowledge base: {e}"
                    )),
                };
            }
        };
        info!(hits = hits.len(), "retrieved context for prompt");

        let messages = build_messages(user_prompt, history, &hits);

        let receiver = match self.model.stream_chat(&messages).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "chat model request failed");
                return ResponderReply {
                    hits,
                    fragments: single_fragment(format!(
                        "Sorry, the assistant is unavailable right now: {e}"
                    )),
                };
            }
        };

        let (tx, fragments) = mpsc::channel(32);
        let mut receiver = receiver;
        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                let fragment = match item {
                    Ok(fragment) => fragment,
                    Err(e) => {
                        warn!(error = %e, "stream interrupted");
                        let _ = tx.send(format!("\n[response interrupted: {e}]")).await;
                        return;
                    }
                };
                if tx.send(fragment).await.is_err() {
                    // consumer went away; stop pulling model output
                    return;
                }
            }
        });

        ResponderReply { hits, fragments }
    }
}

/// Assemble the model prompt: system instruction, prior turns, then the
/// user's message with the retrieved context injected into that final turn.
fn build_messages(
    user_prompt: &str,
    history: &[ChatMessage],
    hits: &[SearchHit],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_INSTRUCTION));
    messages.extend(history.iter().cloned());

    let turn = if hits.is_empty() {
        user_prompt.to_string()
    } else {
        format!(
            "Here is some relevant information from the database:\n\n{}\n\n{}",
            format_context(hits),
            user_prompt
        )
    };
    messages.push(ChatMessage::user(turn));
    messages
}

fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("Document {}: {}", i + 1, hit.chunk_text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn single_fragment(text: String) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _ = tx.send(text).await;
    });
    rx
}
