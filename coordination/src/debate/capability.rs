//! Agent capability contract: typed stage requests in, validated stage outputs out.
//!
//! Every model call in the pipeline goes through [`AgentCapability::generate`].
//! The request carries its stage, so a single method covers all six stages; the
//! returned [`StageOutput`] variant must match that stage or the caller treats
//! it as malformed.
//!
//! [`TimedCapability`] wraps any capability with the run's [`CallPolicy`]: a
//! hard deadline plus an optional "still waiting" heartbeat log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Interval};
use tracing::{info, warn};

use super::artifacts::{
    AgentId, AnswerCheckDraft, JudgementDraft, Problem, ProblemSolution, ProblemSolutionReview,
    PromptProfile, RefinedProblemSolution, RefinementDraft, ReviewDraft, RoleAssessmentDraft,
    SolutionDraft,
};
use super::error::CapabilityError;
use super::state::SessionPhase;

/// Default per-call deadline (matches the long reasoning budgets of hosted models).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2000);
/// Default interval between "still waiting" log lines.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Role an agent plays for a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Not yet assigned; used for role self-assessment.
    Candidate,
    Solver,
    Judge,
    /// Post-run answer grading.
    Grader,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candidate => write!(f, "candidate"),
            Self::Solver => write!(f, "solver"),
            Self::Judge => write!(f, "judge"),
            Self::Grader => write!(f, "grader"),
        }
    }
}

/// Pipeline stage a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RoleAssessment,
    Solve,
    Review,
    Refine,
    Judge,
    AnswerCheck,
}

impl Stage {
    /// Session phase reached when this stage completes.
    pub fn target_phase(self) -> SessionPhase {
        match self {
            Self::RoleAssessment => SessionPhase::RolesAssigned,
            Self::Solve => SessionPhase::Solved,
            Self::Review => SessionPhase::Reviewed,
            Self::Refine => SessionPhase::Refined,
            Self::Judge => SessionPhase::Judged,
            Self::AnswerCheck => SessionPhase::Completed,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoleAssessment => write!(f, "role_assessment"),
            Self::Solve => write!(f, "solve"),
            Self::Review => write!(f, "review"),
            Self::Refine => write!(f, "refine"),
            Self::Judge => write!(f, "judge"),
            Self::AnswerCheck => write!(f, "answer_check"),
        }
    }
}

/// Typed input for one model call. Each variant carries everything the model
/// needs; capabilities hold no per-session state.
#[derive(Debug, Clone)]
pub enum StageRequest {
    RoleAssessment {
        problem: Arc<Problem>,
    },
    Solve {
        problem: Arc<Problem>,
        profile: PromptProfile,
    },
    Review {
        problem: Arc<Problem>,
        subject: ProblemSolution,
    },
    Refine {
        problem: Arc<Problem>,
        original: ProblemSolution,
        reviews: Vec<ProblemSolutionReview>,
    },
    Judge {
        problem: Arc<Problem>,
        solutions: Vec<ProblemSolution>,
        reviews: Vec<ProblemSolutionReview>,
        refinements: Vec<RefinedProblemSolution>,
    },
    AnswerCheck {
        problem: Arc<Problem>,
        candidate_answer: String,
    },
}

impl StageRequest {
    pub fn stage(&self) -> Stage {
        match self {
            Self::RoleAssessment { .. } => Stage::RoleAssessment,
            Self::Solve { .. } => Stage::Solve,
            Self::Review { .. } => Stage::Review,
            Self::Refine { .. } => Stage::Refine,
            Self::Judge { .. } => Stage::Judge,
            Self::AnswerCheck { .. } => Stage::AnswerCheck,
        }
    }

    pub fn problem(&self) -> &Problem {
        match self {
            Self::RoleAssessment { problem }
            | Self::Solve { problem, .. }
            | Self::Review { problem, .. }
            | Self::Refine { problem, .. }
            | Self::Judge { problem, .. }
            | Self::AnswerCheck { problem, .. } => problem.as_ref(),
        }
    }
}

/// Structured result of one model call, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    RoleAssessment(RoleAssessmentDraft),
    Solution(SolutionDraft),
    Review(ReviewDraft),
    Refinement(RefinementDraft),
    Judgement(JudgementDraft),
    AnswerCheck(AnswerCheckDraft),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            Self::RoleAssessment(_) => Stage::RoleAssessment,
            Self::Solution(_) => Stage::Solve,
            Self::Review(_) => Stage::Review,
            Self::Refinement(_) => Stage::Refine,
            Self::Judgement(_) => Stage::Judge,
            Self::AnswerCheck(_) => Stage::AnswerCheck,
        }
    }

    /// Field-range validation of the contained draft.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::RoleAssessment(d) => d.validate(),
            Self::Solution(d) => d.validate(),
            Self::Review(d) => d.validate(),
            Self::Refinement(d) => d.validate(),
            Self::Judgement(d) => d.validate(),
            Self::AnswerCheck(_) => Ok(()),
        }
    }

    /// Decode a bare JSON document into the draft shape for `stage`, then validate.
    pub fn from_json(stage: Stage, json: &str) -> Result<Self, CapabilityError> {
        fn parse<T: serde::de::DeserializeOwned>(
            stage: Stage,
            json: &str,
        ) -> Result<T, CapabilityError> {
            serde_json::from_str(json)
                .map_err(|e| CapabilityError::malformed(format!("{stage} output: {e}")))
        }

        let output = match stage {
            Stage::RoleAssessment => Self::RoleAssessment(parse(stage, json)?),
            Stage::Solve => Self::Solution(parse(stage, json)?),
            Stage::Review => Self::Review(parse(stage, json)?),
            Stage::Refine => Self::Refinement(parse(stage, json)?),
            Stage::Judge => Self::Judgement(parse(stage, json)?),
            Stage::AnswerCheck => Self::AnswerCheck(parse(stage, json)?),
        };
        output
            .validate()
            .map_err(|e| CapabilityError::malformed(format!("{stage} output: {e}")))?;
        Ok(output)
    }
}

fn inline_schema<T: schemars::JsonSchema>() -> schemars::schema::RootSchema {
    // Provider structured-output modes reject `$ref`, so nested types are inlined.
    schemars::gen::SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator()
        .into_root_schema_for::<T>()
}

/// JSON Schema of the draft shape expected for `stage`.
pub fn output_schema(stage: Stage) -> serde_json::Value {
    let schema = match stage {
        Stage::RoleAssessment => inline_schema::<RoleAssessmentDraft>(),
        Stage::Solve => inline_schema::<SolutionDraft>(),
        Stage::Review => inline_schema::<ReviewDraft>(),
        Stage::Refine => inline_schema::<RefinementDraft>(),
        Stage::Judge => inline_schema::<JudgementDraft>(),
        Stage::AnswerCheck => inline_schema::<AnswerCheckDraft>(),
    };
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                %stage,
                error = %e,
                "output schema could not be serialized; sending an open object schema"
            );
            serde_json::json!({ "type": "object" })
        }
    }
}

/// A model-backed agent able to produce any stage's output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn generate(
        &self,
        role: AgentRole,
        request: StageRequest,
    ) -> Result<StageOutput, CapabilityError>;
}

pub type SharedCapability = Arc<dyn AgentCapability>;

/// Deadline and progress-logging policy applied to every capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// `None` disables the heartbeat log.
    pub heartbeat: Option<Duration>,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            heartbeat: Some(DEFAULT_HEARTBEAT),
        }
    }
}

impl CallPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = None;
        self
    }
}

/// Applies a [`CallPolicy`] around an inner capability.
pub struct TimedCapability {
    agent: AgentId,
    inner: SharedCapability,
    policy: CallPolicy,
}

impl TimedCapability {
    pub fn new(agent: AgentId, inner: SharedCapability, policy: CallPolicy) -> Self {
        Self {
            agent,
            inner,
            policy,
        }
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl AgentCapability for TimedCapability {
    async fn generate(
        &self,
        role: AgentRole,
        request: StageRequest,
    ) -> Result<StageOutput, CapabilityError> {
        let stage = request.stage();
        let started = Instant::now();
        let call = self.inner.generate(role, request);
        tokio::pin!(call);
        let deadline = tokio::time::sleep(self.policy.timeout);
        tokio::pin!(deadline);
        let mut heartbeat = self
            .policy
            .heartbeat
            .filter(|period| !period.is_zero())
            .map(|period| tokio::time::interval_at(started + period, period));

        loop {
            tokio::select! {
                result = &mut call => return result,
                _ = &mut deadline => {
                    let after_ms = started.elapsed().as_millis() as u64;
                    warn!(agent = %self.agent, %role, %stage, after_ms, "agent call timed out");
                    return Err(CapabilityError::Timeout { after_ms });
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    info!(
                        agent = %self.agent,
                        %role,
                        %stage,
                        waited_s = started.elapsed().as_secs(),
                        "still waiting for agent"
                    );
                }
            }
        }
    }
}
