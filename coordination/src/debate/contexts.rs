//! Role-specific views of an agent within one session.
//!
//! A context builds the typed request for a stage, calls the agent's
//! capability, checks that the returned variant belongs to that stage, and
//! stamps the draft into an immutable artifact. Contexts never retry.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::debug;

use super::agent::Agent;
use super::artifacts::{
    answers_differ, new_artifact_id, AgentId, FinalJudgement, Problem, ProblemSolution,
    ProblemSolutionReview, RefinedProblemSolution, RoleAssessment,
};
use super::capability::{AgentRole, Stage, StageOutput, StageRequest};
use super::error::{CapabilityError, StageError};

/// Identity shared by every call in one session.
#[derive(Debug, Clone)]
pub struct SessionScope {
    pub run_id: Arc<str>,
    pub problem: Arc<Problem>,
}

impl SessionScope {
    pub fn new(run_id: impl Into<Arc<str>>, problem: Arc<Problem>) -> Self {
        Self {
            run_id: run_id.into(),
            problem,
        }
    }
}

fn mismatch(expected: Stage, output: &StageOutput) -> StageError {
    CapabilityError::malformed(format!(
        "expected {expected} output, got {}",
        output.stage()
    ))
    .into()
}

/// An agent bound to a session, before any role is assigned.
#[derive(Debug, Clone)]
pub struct AgentContext {
    agent: Agent,
    scope: SessionScope,
}

impl AgentContext {
    pub fn new(agent: Agent, scope: SessionScope) -> Self {
        Self { agent, scope }
    }

    pub fn agent_id(&self) -> &AgentId {
        self.agent.id()
    }

    pub fn pool_index(&self) -> usize {
        self.agent.index()
    }

    fn problem(&self) -> Arc<Problem> {
        Arc::clone(&self.scope.problem)
    }

    async fn call(
        &self,
        role: AgentRole,
        request: StageRequest,
    ) -> Result<(StageOutput, u64), StageError> {
        let stage = request.stage();
        let started = Instant::now();
        let output = self.agent.capability().generate(role, request).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        output
            .validate()
            .map_err(|e| CapabilityError::malformed(format!("{stage} output: {e}")))?;
        debug!(
            agent = %self.agent.id(),
            %role,
            %stage,
            elapsed_ms,
            "agent call returned"
        );
        Ok((output, elapsed_ms))
    }

    /// Self-assessed suitability for the solver and judge roles.
    pub async fn assess_role(&self) -> Result<RoleAssessment, StageError> {
        let request = StageRequest::RoleAssessment {
            problem: self.problem(),
        };
        let (output, elapsed_ms) = self.call(AgentRole::Candidate, request).await?;
        let StageOutput::RoleAssessment(draft) = output else {
            return Err(mismatch(Stage::RoleAssessment, &output));
        };

        Ok(RoleAssessment {
            assessment_id: new_artifact_id(),
            run_id: self.scope.run_id.to_string(),
            problem_id: self.scope.problem.id.clone(),
            agent_id: self.agent.id().clone(),
            solver_score: draft.solver_score,
            judge_score: draft.judge_score,
            reasoning: draft.reasoning,
            elapsed_ms,
            created_at: Utc::now(),
        })
    }

    /// Whether `candidate_answer` matches the problem's reference answer.
    pub async fn check_answer(&self, candidate_answer: &str) -> Result<(bool, u64), StageError> {
        let request = StageRequest::AnswerCheck {
            problem: self.problem(),
            candidate_answer: candidate_answer.to_string(),
        };
        let (output, elapsed_ms) = self.call(AgentRole::Grader, request).await?;
        let StageOutput::AnswerCheck(draft) = output else {
            return Err(mismatch(Stage::AnswerCheck, &output));
        };
        Ok((draft.is_correct, elapsed_ms))
    }
}

/// An agent acting as one of the three solvers.
#[derive(Debug, Clone)]
pub struct SolverContext {
    inner: AgentContext,
}

impl SolverContext {
    pub fn new(inner: AgentContext) -> Self {
        Self { inner }
    }

    pub fn agent_id(&self) -> &AgentId {
        self.inner.agent_id()
    }

    pub async fn assess_role(&self) -> Result<RoleAssessment, StageError> {
        self.inner.assess_role().await
    }

    /// Independent solution using the problem's category prompt profile.
    pub async fn solve(&self) -> Result<ProblemSolution, StageError> {
        let problem = self.inner.problem();
        let request = StageRequest::Solve {
            profile: problem.prompt_profile(),
            problem,
        };
        let (output, elapsed_ms) = self.inner.call(AgentRole::Solver, request).await?;
        let StageOutput::Solution(draft) = output else {
            return Err(mismatch(Stage::Solve, &output));
        };

        Ok(ProblemSolution {
            solution_id: new_artifact_id(),
            run_id: self.inner.scope.run_id.to_string(),
            problem_id: self.inner.scope.problem.id.clone(),
            solver_id: self.agent_id().clone(),
            answer: draft.answer,
            reasoning: draft.reasoning,
            confidence: draft.confidence,
            elapsed_ms,
            created_at: Utc::now(),
        })
    }

    /// Critique a peer's solution. Reviewing one's own solution is refused.
    pub async fn review(
        &self,
        subject: &ProblemSolution,
    ) -> Result<ProblemSolutionReview, StageError> {
        if &subject.solver_id == self.agent_id() {
            return Err(StageError::Invariant(format!(
                "solver {} asked to review its own solution",
                self.agent_id()
            )));
        }

        let request = StageRequest::Review {
            problem: self.inner.problem(),
            subject: subject.clone(),
        };
        let (output, elapsed_ms) = self.inner.call(AgentRole::Solver, request).await?;
        let StageOutput::Review(draft) = output else {
            return Err(mismatch(Stage::Review, &output));
        };

        Ok(ProblemSolutionReview {
            review_id: new_artifact_id(),
            run_id: self.inner.scope.run_id.to_string(),
            problem_id: self.inner.scope.problem.id.clone(),
            reviewer_id: self.agent_id().clone(),
            subject_id: subject.solver_id.clone(),
            subject_solution_id: subject.solution_id.clone(),
            critique: draft.critique,
            evaluation: draft.evaluation,
            overall_assessment: draft.overall_assessment,
            recommendation: draft.recommendation,
            confidence: draft.confidence,
            elapsed_ms,
            created_at: Utc::now(),
        })
    }

    /// Revise this solver's own solution given the reviews addressed to it.
    /// An empty review set is allowed.
    pub async fn refine(
        &self,
        original: &ProblemSolution,
        reviews: &[ProblemSolutionReview],
    ) -> Result<RefinedProblemSolution, StageError> {
        if &original.solver_id != self.agent_id() {
            return Err(StageError::Invariant(format!(
                "solver {} asked to refine solution of {}",
                self.agent_id(),
                original.solver_id
            )));
        }
        if let Some(stray) = reviews
            .iter()
            .find(|r| r.subject_solution_id != original.solution_id)
        {
            return Err(StageError::Invariant(format!(
                "review {} addresses solution {}, not {}",
                stray.review_id, stray.subject_solution_id, original.solution_id
            )));
        }

        let request = StageRequest::Refine {
            problem: self.inner.problem(),
            original: original.clone(),
            reviews: reviews.to_vec(),
        };
        let (output, elapsed_ms) = self.inner.call(AgentRole::Solver, request).await?;
        let StageOutput::Refinement(draft) = output else {
            return Err(mismatch(Stage::Refine, &output));
        };

        Ok(RefinedProblemSolution {
            refined_solution_id: new_artifact_id(),
            run_id: self.inner.scope.run_id.to_string(),
            problem_id: self.inner.scope.problem.id.clone(),
            solver_id: self.agent_id().clone(),
            parent_solution_id: original.solution_id.clone(),
            review_ids: reviews.iter().map(|r| r.review_id.clone()).collect(),
            answer_changed: answers_differ(&original.answer, &draft.answer),
            answer: draft.answer,
            reasoning: draft.reasoning,
            confidence: draft.confidence,
            change_rationale: draft.change_rationale,
            elapsed_ms,
            created_at: Utc::now(),
        })
    }
}

/// The session's single judge.
#[derive(Debug, Clone)]
pub struct JudgeContext {
    inner: AgentContext,
    /// Solver ids in pool order; also the set of valid winners.
    solvers: Vec<AgentId>,
}

impl JudgeContext {
    pub fn new(inner: AgentContext, solvers: Vec<AgentId>) -> Self {
        Self { inner, solvers }
    }

    pub fn agent_id(&self) -> &AgentId {
        self.inner.agent_id()
    }

    pub async fn assess_role(&self) -> Result<RoleAssessment, StageError> {
        self.inner.assess_role().await
    }

    fn rank(&self, id: &AgentId) -> usize {
        self.solvers
            .iter()
            .position(|s| s == id)
            .unwrap_or(self.solvers.len())
    }

    /// Pick the winning solver from the full debate record.
    pub async fn judge(
        &self,
        solutions: &[ProblemSolution],
        reviews: &[ProblemSolutionReview],
        refinements: &[RefinedProblemSolution],
    ) -> Result<FinalJudgement, StageError> {
        let mut solutions = solutions.to_vec();
        solutions.sort_by_key(|s| self.rank(&s.solver_id));
        let mut reviews = reviews.to_vec();
        reviews.sort_by_key(|r| (self.rank(&r.subject_id), self.rank(&r.reviewer_id)));
        let mut refinements = refinements.to_vec();
        refinements.sort_by_key(|r| self.rank(&r.solver_id));

        let request = StageRequest::Judge {
            problem: self.inner.problem(),
            solutions,
            reviews,
            refinements,
        };
        let (output, elapsed_ms) = self.inner.call(AgentRole::Judge, request).await?;
        let StageOutput::Judgement(draft) = output else {
            return Err(mismatch(Stage::Judge, &output));
        };

        let winner = self
            .solvers
            .iter()
            .find(|s| s.as_str() == draft.winner.trim())
            .cloned()
            .ok_or_else(|| {
                CapabilityError::malformed(format!(
                    "judge named unknown winner {:?}; expected one of {:?}",
                    draft.winner, self.solvers
                ))
            })?;

        Ok(FinalJudgement {
            judgement_id: new_artifact_id(),
            run_id: self.inner.scope.run_id.to_string(),
            problem_id: self.inner.scope.problem.id.clone(),
            judge_id: self.agent_id().clone(),
            winner,
            final_answer: draft.final_answer,
            justification: draft.justification,
            confidence: draft.confidence,
            elapsed_ms,
            created_at: Utc::now(),
        })
    }
}
