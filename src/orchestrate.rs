//! Retrieval-augmented chat orchestration.
//!
//! A grounded request runs two similarity searches — knowledge context
//! under the request's tag and conversational memory under its memory id —
//! then hands the model a three-message prompt: the raw user message, a
//! system message carrying the knowledge block, and a system message
//! carrying the history block. The user message is persisted as a memory
//! turn before the stream starts, so it is retrievable on the next turn
//! even if the client disconnects mid-stream.

use std::sync::Arc;

use anyhow::Result;
use futures::stream::BoxStream;

use crate::chat::{ChatModel, Message};
use crate::models::{Chunk, MetadataFilter, META_HISTORY, META_KNOWLEDGE, META_UPLOAD_TIME};
use crate::store::VectorStore;

const KNOWLEDGE_PROMPT: &str = "Use the information in the DOCUMENTS section to give an accurate answer, as if you knew it innately. If the documents do not cover the question, say you don't know.\nDOCUMENTS:\n{documents}";

const HISTORY_PROMPT: &str = "The CONVERSATION MEMORY section holds earlier messages from this conversation. Use it to stay consistent with what was already said.\nCONVERSATION MEMORY:\n{history}";

/// An incoming chat request, already classified.
#[derive(Debug, Clone)]
pub enum ChatRequest {
    Plain {
        model: String,
        message: String,
    },
    Grounded {
        model: String,
        message: String,
        rag_tag: String,
        memory_id: String,
    },
}

impl ChatRequest {
    /// Classify raw request fields: a blank tag means no grounding.
    pub fn from_parts(model: String, message: String, rag_tag: String, memory_id: String) -> Self {
        if rag_tag.trim().is_empty() {
            Self::Plain { model, message }
        } else {
            Self::Grounded {
                model,
                message,
                rag_tag,
                memory_id,
            }
        }
    }
}

pub struct ChatOrchestrator {
    store: Arc<dyn VectorStore>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
}

impl ChatOrchestrator {
    pub fn new(store: Arc<dyn VectorStore>, model: Arc<dyn ChatModel>, top_k: usize) -> Self {
        Self {
            store,
            model,
            top_k: top_k.max(1),
        }
    }

    /// One-shot completion with no retrieval and no memory.
    pub async fn complete(&self, model: &str, message: &str) -> Result<String> {
        self.model.complete(model, &[Message::user(message)]).await
    }

    /// Answer a request as a token stream.
    pub async fn respond(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
        match request {
            ChatRequest::Plain { model, message } => {
                self.model.stream(&model, &[Message::user(message)]).await
            }
            ChatRequest::Grounded {
                model,
                message,
                rag_tag,
                memory_id,
            } => {
                let knowledge = self
                    .search_block(&message, META_KNOWLEDGE, &rag_tag)
                    .await?;
                let history = self.search_block(&message, META_HISTORY, &memory_id).await?;
                tracing::debug!(
                    %rag_tag,
                    %memory_id,
                    knowledge_chars = knowledge.len(),
                    history_chars = history.len(),
                    "assembled grounding context"
                );

                self.save_memory_turn(&memory_id, &message).await?;

                let messages = build_messages(&message, &knowledge, &history);
                self.model.stream(&model, &messages).await
            }
        }
    }

    /// Top-k search under one metadata partition, concatenated in ranked
    /// order. Zero matches yield an empty block, not an error.
    async fn search_block(&self, query: &str, key: &str, value: &str) -> Result<String> {
        let filter = MetadataFilter::equals(key, value);
        let results = self
            .store
            .similarity_search(query, self.top_k, Some(&filter))
            .await?;
        Ok(results
            .into_iter()
            .map(|s| s.chunk.text)
            .collect::<String>())
    }

    /// Record the user's message under the conversation's memory id.
    async fn save_memory_turn(&self, memory_id: &str, message: &str) -> Result<()> {
        let mut turn = Chunk::new(message, Default::default());
        turn.metadata
            .insert(META_HISTORY.to_string(), memory_id.to_string());
        turn.metadata.insert(
            META_UPLOAD_TIME.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
        self.store.upsert(&[turn]).await
    }
}

/// Assemble the grounded prompt. Message order is fixed: user message
/// first, then the knowledge context, then the conversation memory.
pub fn build_messages(message: &str, knowledge: &str, history: &str) -> Vec<Message> {
    vec![
        Message::user(message),
        Message::system(KNOWLEDGE_PROMPT.replace("{documents}", knowledge)),
        Message::system(HISTORY_PROMPT.replace("{history}", history)),
    ]
}
