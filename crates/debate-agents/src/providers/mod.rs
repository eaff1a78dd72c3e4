//! Concrete agent capabilities backed by hosted or self-hosted models.
//!
//! Layering, outermost first:
//!
//! ```text
//! TimedCapability      (coordination: deadline + heartbeat)
//!   RetryingCapability (re-ask on malformed output)
//!     PromptedCapability (prompts + JSON decoding)
//!       CompletionBackend (rig OpenAI-compatible client | Gemini REST)
//! ```

pub mod gemini;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use coordination::debate::{
    output_schema, AgentCapability, AgentConfig, AgentId, AgentRole, CapabilityError,
    CapabilityFactory, DebateError, ProviderKind, SharedCapability, StageOutput, StageRequest,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::prompts;
use crate::structured;

pub use gemini::GeminiBackend;
pub use openai::RigBackend;

/// Default endpoint for hosted OpenAI models.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default endpoint for the Gemini REST API.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One raw chat completion: system + user text in, reply text out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// `schema` is the JSON Schema the reply should follow; backends with a
    /// native structured-output mode pass it through, others append it to
    /// the prompt.
    async fn complete(&self, system: &str, user: &str, schema: &Value)
        -> Result<String, CapabilityError>;
}

/// Turns stage requests into prompts and decodes the replies.
pub struct PromptedCapability {
    agent: AgentId,
    backend: Arc<dyn CompletionBackend>,
}

impl PromptedCapability {
    pub fn new(agent: AgentId, backend: Arc<dyn CompletionBackend>) -> Self {
        Self { agent, backend }
    }
}

#[async_trait]
impl AgentCapability for PromptedCapability {
    async fn generate(
        &self,
        role: AgentRole,
        request: StageRequest,
    ) -> Result<StageOutput, CapabilityError> {
        let stage = request.stage();
        let system = prompts::preamble_for(role, &request);
        let user = prompts::user_prompt(&request);
        let schema = output_schema(stage);

        debug!(
            agent = %self.agent,
            %stage,
            %role,
            prompt_chars = system.len() + user.len(),
            "sending prompt"
        );
        let reply = self.backend.complete(&system, &user, &schema).await?;
        debug!(agent = %self.agent, %stage, reply_chars = reply.len(), "reply received");

        structured::decode(stage, &reply)
    }
}

/// Re-asks the inner capability when its output was malformed.
pub struct RetryingCapability {
    agent: AgentId,
    inner: SharedCapability,
    max_attempts: u32,
}

impl RetryingCapability {
    /// `retries` extra attempts after the first one.
    pub fn new(agent: AgentId, inner: SharedCapability, retries: u32) -> Self {
        Self {
            agent,
            inner,
            max_attempts: retries.saturating_add(1),
        }
    }
}

#[async_trait]
impl AgentCapability for RetryingCapability {
    async fn generate(
        &self,
        role: AgentRole,
        request: StageRequest,
    ) -> Result<StageOutput, CapabilityError> {
        let mut attempt = 1;
        loop {
            match self.inner.generate(role, request.clone()).await {
                Err(e) if e.is_retriable() && attempt < self.max_attempts => {
                    warn!(
                        agent = %self.agent,
                        stage = %request.stage(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "retrying after malformed output"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Environment variable consulted for a provider's API key when the agent
/// config does not name one.
pub fn default_api_key_env(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Gemini => "GOOGLE_API_KEY",
        ProviderKind::OpenAi => "OPENAI_API_KEY",
        ProviderKind::Local => "DEBATE_LOCAL_API_KEY",
    }
}

/// Resolve the API key for `config`. Local endpoints work without one.
pub fn resolve_api_key(
    config: &AgentConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, DebateError> {
    let var = config
        .api_key_env
        .as_deref()
        .unwrap_or_else(|| default_api_key_env(config.provider));
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        Some(key) => Ok(key),
        None if config.provider == ProviderKind::Local => Ok("not-needed".to_string()),
        None => Err(DebateError::CapabilityBuild {
            agent: config.id.clone(),
            reason: format!("environment variable {var} is not set"),
        }),
    }
}

/// Builds provider-backed capabilities from agent configs.
pub struct ProviderFactory {
    http: reqwest::Client,
    malformed_retries: u32,
}

impl ProviderFactory {
    pub fn new(malformed_retries: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            malformed_retries,
        }
    }

    fn backend(&self, config: &AgentConfig) -> Result<Arc<dyn CompletionBackend>, DebateError> {
        let api_key = resolve_api_key(config, |var| std::env::var(var).ok())?;
        let backend: Arc<dyn CompletionBackend> = match config.provider {
            ProviderKind::OpenAi | ProviderKind::Local => {
                Arc::new(RigBackend::from_config(config, &api_key)?)
            }
            ProviderKind::Gemini => {
                Arc::new(GeminiBackend::from_config(self.http.clone(), config, api_key))
            }
        };
        Ok(backend)
    }
}

impl CapabilityFactory for ProviderFactory {
    fn build(&self, config: &AgentConfig) -> Result<SharedCapability, DebateError> {
        let prompted: SharedCapability =
            Arc::new(PromptedCapability::new(config.id.clone(), self.backend(config)?));
        Ok(Arc::new(RetryingCapability::new(
            config.id.clone(),
            prompted,
            self.malformed_retries,
        )))
    }
}
