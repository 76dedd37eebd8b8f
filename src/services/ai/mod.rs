pub mod groq;
pub mod intent;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// A chat model that answers with one JSON object per call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, system_prompt: &str, messages: &[Message]) -> anyhow::Result<String>;
}

/// OpenAI-style message list with the system prompt first. Both providers
/// accept this shape.
fn chat_messages(system_prompt: &str, messages: &[Message]) -> Vec<Value> {
    std::iter::once(json!({ "role": "system", "content": system_prompt }))
        .chain(
            messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content })),
        )
        .collect()
}
