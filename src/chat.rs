//! Chat model abstraction and the Ollama implementation.
//!
//! The orchestrator only sees the [`ChatModel`] trait: one blocking
//! completion call and one token stream. Streams are single-pass and
//! unbounded; dropping the stream drops the underlying HTTP response,
//! which closes the model connection.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single prompt message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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
}

/// Conversational model behind the chat API.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run the full exchange and return the complete response text.
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String>;

    /// Stream response fragments as the model produces them.
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<String>>>;
}

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatApiMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatApiChunk {
    #[serde(default)]
    message: Option<ChatApiMessage>,
    #[serde(default)]
    done: bool,
}

/// Chat client for a local Ollama instance (`POST /api/chat`).
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, model: &str, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let body = ChatApiRequest {
            model,
            messages,
            stream,
        };
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Chat request to {} failed", self.base_url))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Chat API error {}: {}", status, text);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String> {
        let json: serde_json::Value = self.send(model, messages, false).await?.json().await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .context("Invalid chat response: missing message content")
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<BoxStream<'static, Result<String>>> {
        let resp = self.send(model, messages, true).await?;

        // NDJSON: one JSON object per line, possibly split across network
        // chunks, so carry a line buffer between reads.
        let mut buf = String::new();
        let stream = resp.bytes_stream().map(move |chunk| {
            let bytes = chunk.context("Chat stream read failed")?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            let mut output = String::new();
            while let Some(pos) = buf.find('\n') {
                let line: String = buf.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parsed: ChatApiChunk =
                    serde_json::from_str(line).context("Invalid chat stream line")?;
                if let Some(message) = parsed.message {
                    output.push_str(&message.content);
                }
                if parsed.done {
                    break;
                }
            }
            Ok(output)
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let msg = Message::system("ctx");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        let msg = Message::user("hi");
        assert_eq!(serde_json::to_value(&msg).unwrap()["role"], "user");
    }

    #[test]
    fn test_chunk_parses_partial_fields() {
        let parsed: ChatApiChunk =
            serde_json::from_str(r#"{"message":{"content":"hel"},"done":false}"#).unwrap();
        assert_eq!(parsed.message.unwrap().content, "hel");
        let done: ChatApiChunk = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(done.done);
        assert!(done.message.is_none());
    }
}
