//! Run configuration: TOML file, then `DEBATE_*` environment overrides, then
//! CLI flags (applied by [`crate::cli`]).
//!
//! ```toml
//! [run]
//! dataset = "data/problems.json"
//! output_dir = "runs"
//! max_concurrent = 7
//!
//! [store]
//! backend = "jsonl"
//!
//! [[agents]]
//! id = "gemini-a"
//! provider = "gemini"
//! model = "gemini-2.5-pro"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::debate::{AgentConfig, CallPolicy, OrchestratorConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::providers::OPENAI_BASE_URL;

pub const ENV_DATASET: &str = "DEBATE_DATASET";
pub const ENV_OUTPUT_DIR: &str = "DEBATE_OUTPUT_DIR";
pub const ENV_MAX_CONCURRENT: &str = "DEBATE_MAX_CONCURRENT";
pub const ENV_CALL_TIMEOUT_SECS: &str = "DEBATE_CALL_TIMEOUT_SECS";
pub const ENV_HEARTBEAT_SECS: &str = "DEBATE_HEARTBEAT_SECS";
pub const ENV_MALFORMED_RETRIES: &str = "DEBATE_MALFORMED_RETRIES";
pub const ENV_STORE: &str = "DEBATE_STORE";
pub const ENV_POSTGRES_URL: &str = "DEBATE_POSTGRES_URL";
pub const ENV_RUN_ID: &str = "DEBATE_RUN_ID";
pub const ENV_LOCAL_BASE_URL: &str = "DEBATE_LOCAL_BASE_URL";
pub const ENV_LOCAL_MODEL: &str = "DEBATE_LOCAL_MODEL";

const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:8080/v1";
const DEFAULT_LOCAL_MODEL: &str = "qwen3-32b";

/// Settings for one run over a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub dataset: Option<PathBuf>,
    /// Root for snapshots, JSONL collections and telemetry.
    pub output_dir: PathBuf,
    pub max_concurrent: usize,
    pub call_timeout_secs: u64,
    /// 0 disables the "still waiting" heartbeat.
    pub heartbeat_secs: u64,
    /// Extra attempts after a malformed reply.
    pub malformed_retries: u32,
    pub skip: usize,
    pub take: Option<usize>,
    pub run_id: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        let policy = CallPolicy::default();
        Self {
            dataset: None,
            output_dir: PathBuf::from("runs"),
            max_concurrent: defaults.max_concurrent_sessions,
            call_timeout_secs: policy.timeout.as_secs(),
            heartbeat_secs: policy.heartbeat.map(|h| h.as_secs()).unwrap_or(0),
            malformed_retries: 1,
            skip: 0,
            take: None,
            run_id: None,
        }
    }
}

/// Where documents go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// `<output_dir>/store/<Collection>.jsonl`
    Jsonl,
    Postgres,
    /// Discarded at exit; for dry runs.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" => Ok(Self::Jsonl),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub postgres_url: Option<String>,
    /// Mirror every artifact to `<output_dir>/<problem_id>/...`.
    pub snapshots: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Jsonl,
            postgres_url: None,
            snapshots: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateConfig {
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Agent used for post-run answer grading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grader: Option<AgentConfig>,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            store: StoreSettings::default(),
            agents: default_local_pool(|var| std::env::var(var).ok()),
            grader: None,
        }
    }
}

/// Four agents on one OpenAI-compatible local endpoint, spread over
/// temperatures so their answers diverge.
pub fn default_local_pool(lookup: impl Fn(&str) -> Option<String>) -> Vec<AgentConfig> {
    let base_url = lookup(ENV_LOCAL_BASE_URL).unwrap_or_else(|| DEFAULT_LOCAL_BASE_URL.into());
    let model = lookup(ENV_LOCAL_MODEL).unwrap_or_else(|| DEFAULT_LOCAL_MODEL.into());
    [0.3, 0.5, 0.7, 0.9]
        .into_iter()
        .enumerate()
        .map(|(i, temperature)| {
            AgentConfig::new(format!("local-{}", i + 1), ProviderKind::Local, model.clone())
                .with_base_url(base_url.clone())
                .with_sampling(temperature, 0.95)
        })
        .collect()
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid environment override");
            None
        }
    }
}

impl DebateConfig {
    /// Load `path` (or defaults when `None`) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                let mut config: Self = toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?;
                if config.agents.is_empty() {
                    config.agents = default_local_pool(|var| std::env::var(var).ok());
                }
                config
            }
            None => Self::default(),
        };
        config.apply_env_from(|var| std::env::var(var).ok());
        Ok(config)
    }

    /// Apply `DEBATE_*` overrides. Unparseable values are logged and ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dataset) = lookup(ENV_DATASET) {
            self.run.dataset = Some(PathBuf::from(dataset));
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.run.output_dir = PathBuf::from(dir);
        }
        if let Some(n) = env_parse(&lookup, ENV_MAX_CONCURRENT) {
            self.run.max_concurrent = n;
        }
        if let Some(secs) = env_parse(&lookup, ENV_CALL_TIMEOUT_SECS) {
            self.run.call_timeout_secs = secs;
        }
        if let Some(secs) = env_parse(&lookup, ENV_HEARTBEAT_SECS) {
            self.run.heartbeat_secs = secs;
        }
        if let Some(n) = env_parse(&lookup, ENV_MALFORMED_RETRIES) {
            self.run.malformed_retries = n;
        }
        if let Some(backend) = env_parse(&lookup, ENV_STORE) {
            self.store.backend = backend;
        }
        if let Some(url) = lookup(ENV_POSTGRES_URL) {
            self.store.postgres_url = Some(url);
        }
        if let Some(run_id) = lookup(ENV_RUN_ID) {
            self.run.run_id = Some(run_id);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.run.max_concurrent == 0 {
            return Err("run.max_concurrent must be > 0".to_string());
        }
        if self.run.call_timeout_secs == 0 {
            return Err("run.call_timeout_secs must be > 0".to_string());
        }
        if self.run.take == Some(0) {
            return Err("run.take must be > 0 when set".to_string());
        }
        if self.store.backend == StoreBackend::Postgres && self.store.postgres_url.is_none() {
            return Err("store.postgres_url is required for the postgres backend".to_string());
        }
        for agent in &self.agents {
            agent
                .validate()
                .map_err(|e| format!("agent '{}': {e}", agent.id))?;
        }
        if let Some(grader) = &self.grader {
            grader.validate().map_err(|e| format!("grader: {e}"))?;
        }
        Ok(())
    }

    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.run.call_timeout_secs),
            heartbeat: (self.run.heartbeat_secs > 0)
                .then(|| Duration::from_secs(self.run.heartbeat_secs)),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_sessions: self.run.max_concurrent,
        }
    }

    /// OpenAI-compatible endpoints used by the pool and grader, deduplicated.
    pub fn openai_endpoints(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for agent in self.agents.iter().chain(self.grader.iter()) {
            if agent.provider == ProviderKind::Gemini {
                continue;
            }
            let url = agent
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }
}

/// Check whether an OpenAI-compatible endpoint is reachable.
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
