//! Language-model seam shared by the evaluator and security-explainer roles.

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

/// A single-shot text model: one prompt in, one completion out.
///
/// This abstraction lets the session logic swap between providers (or mocks
/// in tests) while keeping a consistent call site for every "ask the model a
/// question" concern that does not need conversation memory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// An implementation of [`LanguageModel`] for any OpenAI-compatible API.
///
/// The system prompt is fixed at construction; each call is an independent
/// exchange with no carried history.
pub struct OpenAICompatibleModel {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: String,
    temperature: f32,
}

impl OpenAICompatibleModel {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - OpenAI client configuration (API key, base URL, etc.).
    /// * `model` - Model identifier to use for chat completions (e.g., "gpt-4o").
    /// * `system_prompt` - The role instructions sent with every call.
    /// * `temperature` - Sampling temperature for the completions.
    pub fn new(
        config: OpenAIConfig,
        model: String,
        system_prompt: String,
        temperature: f32,
    ) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            system_prompt,
            temperature,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAICompatibleModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.system_prompt.clone())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let answer = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;

        Ok(answer.clone())
    }
}
