//! Error taxonomy for the debate pipeline.
//!
//! | Error                    | Scope            | Effect                                  |
//! |--------------------------|------------------|-----------------------------------------|
//! | `CapabilityError`        | one agent call   | fails the owning session                |
//! | `StageError`             | one sub-stage    | recorded as the session failure cause   |
//! | `DebateError`            | pool / run setup | fails the whole run before any session  |
//! | `PersistenceWarning`     | one write        | attached to the result, never fatal     |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::artifacts::AgentId;
use super::capability::Stage;
use super::state::{IllegalTransition, SessionPhase};

/// Failure of a single Agent Capability call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CapabilityError {
    /// Response did not match the stage's expected shape.
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    /// Transport, auth, or rate-limit failure from the provider.
    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl CapabilityError {
    /// Whether a capability-level retry could plausibly succeed.
    ///
    /// The pipeline itself never retries; this is for provider wrappers.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::MalformedOutput(_))
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedOutput(detail.into())
    }

    pub fn provider(detail: impl Into<String>) -> Self {
        Self::ProviderError(detail.into())
    }
}

/// Why a sub-stage could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StageError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("insufficient agent pool: need {required}, have {available}")]
    InsufficientAgentPool { required: usize, available: usize },

    /// A structural invariant of the debate would be broken.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The task was cancelled or panicked before producing a result.
    #[error("aborted: {0}")]
    Aborted(String),
}

/// Terminal failure of one session: where it stopped and who caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    /// The phase the session was trying to reach.
    pub phase: SessionPhase,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentId>,
    pub cause: StageError,
}

impl SessionFailure {
    pub fn new(stage: Stage, agent: Option<AgentId>, cause: StageError) -> Self {
        Self {
            phase: stage.target_phase(),
            stage,
            agent,
            cause,
        }
    }

    /// Whether the failure came from an agent call rather than the pipeline.
    pub fn is_agent_fault(&self) -> bool {
        matches!(self.cause, StageError::Capability(_))
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed reaching {} during {}", self.phase, self.stage)?;
        if let Some(agent) = &self.agent {
            write!(f, " (agent {})", agent)?;
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for SessionFailure {}

/// Run-level and setup errors.
#[derive(Debug, Error)]
pub enum DebateError {
    #[error("insufficient agent pool: need at least {required} agents, have {available}")]
    InsufficientAgentPool { required: usize, available: usize },

    #[error("duplicate agent id in pool: {0}")]
    DuplicateAgent(AgentId),

    #[error("invalid configuration for agent {agent}: {reason}")]
    InvalidAgent { agent: AgentId, reason: String },

    #[error("failed to build capability for agent {agent}: {reason}")]
    CapabilityBuild { agent: AgentId, reason: String },

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_output_is_retriable() {
        assert!(CapabilityError::malformed("bad json").is_retriable());
        assert!(!CapabilityError::provider("503").is_retriable());
        assert!(!CapabilityError::Timeout { after_ms: 10 }.is_retriable());
    }

    #[test]
    fn session_failure_display_names_agent_and_phase() {
        let failure = SessionFailure::new(
            Stage::Solve,
            Some(AgentId::from("gemini-pro")),
            CapabilityError::provider("rate limited").into(),
        );
        assert_eq!(failure.phase, SessionPhase::Solved);
        let line = failure.to_string();
        assert!(line.contains("solved"));
        assert!(line.contains("gemini-pro"));
        assert!(line.contains("rate limited"));
        assert!(failure.is_agent_fault());
    }

    #[test]
    fn stage_error_serializes_with_kind_tag() {
        let err = StageError::Capability(CapabilityError::Timeout { after_ms: 5 });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "capability");
        assert_eq!(json["detail"]["kind"], "timeout");
    }
}
