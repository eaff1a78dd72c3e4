//! OpenAI-compatible chat backend via rig-core.
//!
//! Serves both hosted OpenAI models and local servers (llama.cpp, vLLM,
//! SGLang) that expose `/v1/chat/completions`. Local servers differ in how
//! they accept structured-output hints, so the schema is appended to the
//! prompt instead of being sent as `response_format`.

use async_trait::async_trait;
use coordination::debate::{AgentConfig, CapabilityError, DebateError};
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use serde_json::Value;

use super::{CompletionBackend, OPENAI_BASE_URL};

pub struct RigBackend {
    client: openai::CompletionsClient,
    model: String,
    temperature: f64,
    top_p: f64,
}

impl RigBackend {
    pub fn from_config(config: &AgentConfig, api_key: &str) -> Result<Self, DebateError> {
        let base_url = config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        let client = openai::CompletionsClient::builder()
            .api_key(api_key)
            .base_url(base_url)
            .build()
            .map_err(|e| DebateError::CapabilityBuild {
                agent: config.id.clone(),
                reason: format!("failed to build client for {base_url}: {e}"),
            })?;
        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }
}

/// User prompt with the expected reply schema appended.
pub(crate) fn prompt_with_schema(user: &str, schema: &Value) -> String {
    let schema = serde_json::to_string_pretty(schema).unwrap_or_default();
    format!(
        "{user}\n## Reply format\nReply with JSON matching this schema:\n```json\n{schema}\n```\n"
    )
}

#[async_trait]
impl CompletionBackend for RigBackend {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<String, CapabilityError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(system)
            .temperature(self.temperature)
            .additional_params(serde_json::json!({ "top_p": self.top_p }))
            .build();

        let response: String = agent
            .prompt(prompt_with_schema(user, schema))
            .await
            .map_err(|e| CapabilityError::provider(format!("{}: {e}", self.model)))?;
        Ok(response)
    }
}
