//! The in-character responder the player actually talks to.
//!
//! The responder is reconfigured every time the active challenge changes: a
//! new system prompt replaces the old one and wipes any turn memory, so a
//! jailbreak that worked against the previous persona does not leak forward.

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::retriever::Snippet;

/// The conversational collaborator capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Responder: Send + Sync {
    /// Replaces the system prompt and clears any turn memory the responder
    /// holds. Must be callable mid-session.
    async fn configure(&self, system_prompt: &str);

    /// Produces the next in-character reply. `context` carries supplementary
    /// snippets retrieved for this turn (empty when the feature is off).
    async fn respond(&self, input: &str, context: &[Snippet]) -> Result<String>;
}

/// An implementation of [`Responder`] for any OpenAI-compatible API, keeping
/// the full conversation history since the last `configure`.
pub struct ChatResponder {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    history: Mutex<Vec<ChatCompletionRequestMessage>>,
}

impl ChatResponder {
    pub fn new(config: OpenAIConfig, model: String, temperature: f32) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            temperature,
            history: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Responder for ChatResponder {
    async fn configure(&self, system_prompt: &str) {
        let mut history = self.history.lock().await;
        history.clear();
        if let Ok(message) = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()
        {
            history.push(message.into());
        }
    }

    async fn respond(&self, input: &str, context: &[Snippet]) -> Result<String> {
        let user_content = if context.is_empty() {
            input.to_string()
        } else {
            let references = context
                .iter()
                .map(|snippet| format!("- {}", snippet.content))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Relevant reference material:\n{references}\n\n{input}")
        };

        let mut history = self.history.lock().await;
        history.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_content)
                .build()?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(history.clone())
            .build()?;

        let response = self.client.chat().create(request).await?;
        let reply = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?
            .trim()
            .to_string();

        history.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(reply.clone())
                .build()?
                .into(),
        );

        Ok(reply)
    }
}
