//! Agent configuration and the immutable, shared agent pool.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::artifacts::AgentId;
use super::capability::{CallPolicy, SharedCapability, TimedCapability};
use super::error::DebateError;

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.95
}

/// Backend that serves an agent's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    /// Self-hosted OpenAI-compatible endpoint (llama.cpp, vLLM, ...).
    Local,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::OpenAi => write!(f, "openai"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Static configuration of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl AgentConfig {
    pub fn new(id: impl Into<AgentId>, provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider,
            model: model.into(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            base_url: None,
            api_key_env: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_sampling(mut self, temperature: f64, top_p: f64) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("agent id must not be empty".into());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature must be in [0, 2], got {}", self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            return Err(format!("top_p must be in (0, 1], got {}", self.top_p));
        }
        if self.provider == ProviderKind::Local && self.base_url.is_none() {
            return Err("local provider requires base_url".into());
        }
        Ok(())
    }
}

/// Builds the capability backing one agent. Called once per agent per run.
pub trait CapabilityFactory: Send + Sync {
    fn build(&self, config: &AgentConfig) -> Result<SharedCapability, DebateError>;
}

impl<F> CapabilityFactory for F
where
    F: Fn(&AgentConfig) -> Result<SharedCapability, DebateError> + Send + Sync,
{
    fn build(&self, config: &AgentConfig) -> Result<SharedCapability, DebateError> {
        self(config)
    }
}

/// A configured agent with its capability handle and pool position.
#[derive(Clone)]
pub struct Agent {
    config: Arc<AgentConfig>,
    capability: SharedCapability,
    index: usize,
}

impl Agent {
    fn build(
        config: AgentConfig,
        index: usize,
        factory: &dyn CapabilityFactory,
        policy: CallPolicy,
    ) -> Result<Self, DebateError> {
        config
            .validate()
            .map_err(|reason| DebateError::InvalidAgent {
                agent: config.id.clone(),
                reason,
            })?;

        let inner = factory.build(&config)?;
        let capability: SharedCapability =
            Arc::new(TimedCapability::new(config.id.clone(), inner, policy));
        Ok(Self {
            config: Arc::new(config),
            capability,
            index,
        })
    }

    /// An agent outside any pool, such as the answer grader.
    pub fn standalone(
        config: AgentConfig,
        factory: &dyn CapabilityFactory,
        policy: CallPolicy,
    ) -> Result<Self, DebateError> {
        Self::build(config, 0, factory, policy)
    }

    pub fn id(&self) -> &AgentId {
        &self.config.id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn capability(&self) -> &SharedCapability {
        &self.capability
    }

    /// Registration order within the pool.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.config.id)
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .field("index", &self.index)
            .finish()
    }
}

/// Ordered, read-only set of agents shared by every session of a run.
#[derive(Debug, Clone)]
pub struct AgentPool {
    agents: Arc<[Agent]>,
}

impl AgentPool {
    /// Build the pool once: validate configs, reject duplicate ids, and wrap
    /// each capability with the call policy.
    pub fn build(
        configs: Vec<AgentConfig>,
        factory: &dyn CapabilityFactory,
        policy: CallPolicy,
    ) -> Result<Self, DebateError> {
        let mut seen = HashSet::new();
        let mut agents = Vec::with_capacity(configs.len());

        for (index, config) in configs.into_iter().enumerate() {
            if !seen.insert(config.id.clone()) {
                return Err(DebateError::DuplicateAgent(config.id));
            }
            let agent = Agent::build(config, index, factory, policy)?;
            info!(
                agent = %agent.id(),
                provider = %agent.config().provider,
                model = %agent.config().model,
                index,
                "agent registered"
            );
            agents.push(agent);
        }

        Ok(Self {
            agents: agents.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id() == id)
    }

    /// Pool position of `id`, if registered.
    pub fn position(&self, id: &AgentId) -> Option<usize> {
        self.get(id).map(Agent::index)
    }

    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|a| a.id().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::capability::MockAgentCapability;

    fn factory() -> impl CapabilityFactory {
        |_: &AgentConfig| -> Result<SharedCapability, DebateError> {
            Ok(Arc::new(MockAgentCapability::new()))
        }
    }

    fn local(id: &str) -> AgentConfig {
        AgentConfig::new(id, ProviderKind::Local, "qwen").with_base_url("http://localhost:8080/v1")
    }

    #[test]
    fn pool_keeps_registration_order() {
        let pool = AgentPool::build(
            vec![local("c"), local("a"), local("b")],
            &factory(),
            CallPolicy::default(),
        )
        .unwrap();
        assert_eq!(pool.ids(), vec![AgentId::from("c"), AgentId::from("a"), AgentId::from("b")]);
        assert_eq!(pool.position(&AgentId::from("b")), Some(2));
        assert!(pool.get(&AgentId::from("z")).is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = AgentPool::build(
            vec![local("a"), local("b"), local("a")],
            &factory(),
            CallPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DebateError::DuplicateAgent(id) if id.as_str() == "a"));
    }

    #[test]
    fn invalid_config_rejected() {
        let bad = AgentConfig::new("x", ProviderKind::Local, "qwen");
        let err = AgentPool::build(vec![bad], &factory(), CallPolicy::default()).unwrap_err();
        assert!(matches!(err, DebateError::InvalidAgent { .. }));
    }

    #[test]
    fn factory_errors_propagate() {
        let failing = |config: &AgentConfig| -> Result<SharedCapability, DebateError> {
            Err(DebateError::CapabilityBuild {
                agent: config.id.clone(),
                reason: "missing key".into(),
            })
        };
        let err = AgentPool::build(vec![local("a")], &failing, CallPolicy::default()).unwrap_err();
        assert!(err.to_string().contains("missing key"));
    }

    #[test]
    fn provider_kind_serde_names() {
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
        assert_eq!(serde_json::to_string(&ProviderKind::Gemini).unwrap(), "\"gemini\"");
    }

    #[test]
    fn sampling_validation() {
        let config = local("a").with_sampling(0.3, 0.0);
        assert!(config.validate().unwrap_err().contains("top_p"));
        let config = local("a").with_sampling(2.5, 0.9);
        assert!(config.validate().unwrap_err().contains("temperature"));
    }
}
