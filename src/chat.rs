//! Chat-model collaborator: streams completion fragments for a prepared
//! message list.
//!
//! [`ChatModel`] is the seam the responder depends on; [`OpenAiChat`] is
//! the production implementation, calling the OpenAI chat completions API
//! with `stream: true` and relaying SSE delta fragments over a channel.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::models::ChatMessage;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Streams assistant response fragments for a message list.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion. Fragments arrive on the returned
    /// channel in generation order; an `Err` item ends the stream.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, ChatError>>, ChatError>;
}

/// Chat provider backed by the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiChat {
    config: ChatConfig,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: ChatConfig) -> Result<Self, ChatError> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(ChatError::Request(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, ChatError>>, ChatError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ChatError::Request("OPENAI_API_KEY not set".to_string()))?;

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": true,
        });

        let res = self
            .client
            .post(COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ChatError::Upstream(format!("{}: {}", status, text)));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            // SSE lines can straddle byte chunks, so incomplete trailing
            // data is carried into the next read.
            let mut carry = String::new();

            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        carry.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = carry.find('\n') {
                            let line = carry[..pos].trim().to_string();
                            carry.drain(..=pos);
                            match parse_sse_line(&line) {
                                SseEvent::Fragment(content) => {
                                    if tx.send(Ok(content)).await.is_err() {
                                        return;
                                    }
                                }
                                SseEvent::Done => return,
                                SseEvent::Skip => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ChatError::Upstream(e.to_string()))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

enum SseEvent {
    Fragment(String),
    Done,
    Skip,
}

/// Decode one SSE line from a chat completions stream.
fn parse_sse_line(line: &str) -> SseEvent {
    if line.is_empty() {
        return SseEvent::Skip;
    }
    if line == "data: [DONE]" {
        return SseEvent::Done;
    }
    let Some(data) = line.strip_prefix("data: ") else {
        return SseEvent::Skip;
    };
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseEvent::Fragment(content.to_string()),
            _ => SseEvent::Skip,
        },
        Err(_) => SseEvent::Skip,
    }
}
