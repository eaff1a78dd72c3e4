//! One problem driven through the five debate stages.
//!
//! ```text
//! run()
//!   → assess roles      (all pool agents, concurrent)   → RolesAssigned
//!   → solve             (3 solvers, concurrent)         → Solved
//!   → review            (6 ordered pairs, concurrent)   → Reviewed
//!   → refine            (3 solvers, concurrent)         → Refined
//!   → judge             (1 call)                        → Judged
//!   → persist trail + run record                        → Completed
//! ```
//!
//! Each sub-stage is a barrier: every member must succeed before the next
//! stage starts. The first failure aborts the remaining members and fails the
//! session; the partial trail is still persisted.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use super::agent::{Agent, AgentPool};
use super::artifacts::{new_artifact_id, AgentId, FinalJudgement, Problem};
use super::capability::Stage;
use super::contexts::{AgentContext, JudgeContext, SessionScope, SolverContext};
use super::error::{SessionFailure, StageError};
use super::persistence::{
    trail_documents, ArtifactDocument, ArtifactRecorder, Collection, PersistenceWarning,
    WriteTarget,
};
use super::roles::{ensure_pool_size, select_roles, AssignedRoles};
use super::state::{SessionPhase, SessionStateMachine, TransitionRecord};
use super::trail::AuditTrail;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "failure", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Failed(SessionFailure),
}

/// Everything a finished session produced.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub run_id: String,
    pub session_id: String,
    pub problem: Arc<Problem>,
    pub outcome: SessionOutcome,
    pub trail: AuditTrail,
    pub warnings: Vec<PersistenceWarning>,
    pub transitions: Vec<TransitionRecord>,
    pub elapsed_ms: u64,
}

impl SessionResult {
    /// Result for a session that never ran (cancelled while queued, or its
    /// task died).
    pub fn aborted(run_id: &str, problem: Arc<Problem>, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            session_id: new_artifact_id(),
            problem,
            outcome: SessionOutcome::Failed(SessionFailure::new(
                Stage::RoleAssessment,
                None,
                StageError::Aborted(reason.into()),
            )),
            trail: AuditTrail::default(),
            warnings: Vec::new(),
            transitions: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Completed)
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match &self.outcome {
            SessionOutcome::Failed(f) => Some(f),
            SessionOutcome::Completed => None,
        }
    }

    pub fn final_judgement(&self) -> Option<&FinalJudgement> {
        self.trail.judgement.as_ref()
    }

    /// Phase the session ended in.
    pub fn final_phase(&self) -> SessionPhase {
        match self.outcome {
            SessionOutcome::Completed => SessionPhase::Completed,
            SessionOutcome::Failed(_) => SessionPhase::Failed,
        }
    }
}

/// Document written to the `Runs` collection for every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub run_id: String,
    pub problem_id: String,
    pub category: String,
    pub outcome: SessionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<AssignedRoles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<AgentId>,
    pub artifact_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub transitions: Vec<TransitionRecord>,
}

/// Run `jobs` concurrently, one task each, and return their values in input
/// order. The first error (or cancellation) aborts every remaining task.
async fn fan_out<T, Fut>(
    stage: Stage,
    cancel: &CancellationToken,
    jobs: Vec<(AgentId, Fut)>,
) -> Result<Vec<T>, SessionFailure>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, StageError>> + Send + 'static,
{
    let mut set = JoinSet::new();
    let count = jobs.len();
    for (slot, (agent, job)) in jobs.into_iter().enumerate() {
        set.spawn(async move { (slot, agent, job.await) });
    }

    let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                set.abort_all();
                return Err(SessionFailure::new(
                    stage,
                    None,
                    StageError::Aborted("session cancelled".into()),
                ));
            }
            joined = set.join_next() => joined,
        };
        let Some(joined) = joined else { break };

        match joined {
            Ok((slot, _, Ok(value))) => slots[slot] = Some(value),
            Ok((_, agent, Err(cause))) => {
                set.abort_all();
                return Err(SessionFailure::new(stage, Some(agent), cause));
            }
            Err(e) => {
                set.abort_all();
                let reason = if e.is_panic() {
                    "agent task panicked".to_string()
                } else {
                    format!("agent task ended early: {e}")
                };
                return Err(SessionFailure::new(stage, None, StageError::Aborted(reason)));
            }
        }
    }

    slots.into_iter().collect::<Option<Vec<T>>>().ok_or_else(|| {
        SessionFailure::new(
            stage,
            None,
            StageError::Invariant("fan-out finished with missing results".into()),
        )
    })
}

/// Drives one problem through the debate for a fixed pool.
pub struct ProblemSolvingSession {
    session_id: String,
    scope: SessionScope,
    pool: AgentPool,
    recorder: ArtifactRecorder,
    cancel: CancellationToken,
    machine: SessionStateMachine,
    trail: AuditTrail,
    started_at: DateTime<Utc>,
}

impl ProblemSolvingSession {
    pub fn new(
        run_id: impl Into<Arc<str>>,
        problem: Arc<Problem>,
        pool: AgentPool,
        recorder: ArtifactRecorder,
    ) -> Self {
        Self {
            session_id: new_artifact_id(),
            scope: SessionScope::new(run_id, problem),
            pool,
            recorder,
            cancel: CancellationToken::new(),
            machine: SessionStateMachine::new(),
            trail: AuditTrail::default(),
            started_at: Utc::now(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.machine.current()
    }

    /// Run to a terminal phase. Never panics on agent failure; the outcome is
    /// in the result.
    pub async fn run(self) -> SessionResult {
        let span = tracing::info_span!(
            "session",
            run_id = %self.scope.run_id,
            problem_id = %self.scope.problem.id,
            session_id = %self.session_id,
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> SessionResult {
        info!(
            category = %self.scope.problem.category,
            pool_size = self.pool.len(),
            "session started"
        );

        let outcome = match self.drive().await {
            Ok(()) => SessionOutcome::Completed,
            Err(failure) => {
                warn!(error = %failure, "session failed");
                // Never terminal here: Completed is only reached on success.
                let _ = self.machine.fail(&failure.to_string());
                SessionOutcome::Failed(failure)
            }
        };

        let warnings = self.persist(&outcome).await;
        let elapsed_ms = self.machine.elapsed_ms();

        match &outcome {
            SessionOutcome::Completed => info!(
                winner = self
                    .trail
                    .judgement
                    .as_ref()
                    .map(|j| j.winner.as_str())
                    .unwrap_or_default(),
                elapsed_ms,
                warnings = warnings.len(),
                "session completed"
            ),
            SessionOutcome::Failed(f) => info!(
                phase = %f.phase,
                stage = %f.stage,
                artifacts = self.trail.artifact_count(),
                "session ended in failure"
            ),
        }

        SessionResult {
            run_id: self.scope.run_id.to_string(),
            session_id: self.session_id,
            problem: self.scope.problem,
            outcome,
            trail: self.trail,
            warnings,
            transitions: self.machine.into_transitions(),
            elapsed_ms,
        }
    }

    fn advance(&mut self, stage: Stage, reason: String) -> Result<(), SessionFailure> {
        self.machine
            .advance(stage.target_phase(), Some(&reason))
            .map_err(|e| SessionFailure::new(stage, None, StageError::Invariant(e.to_string())))
    }

    fn member(&self, id: &AgentId, stage: Stage) -> Result<Agent, SessionFailure> {
        self.pool.get(id).cloned().ok_or_else(|| {
            SessionFailure::new(
                stage,
                Some(id.clone()),
                StageError::Invariant(format!("agent {id} is not in the pool")),
            )
        })
    }

    fn context(&self, agent: Agent) -> AgentContext {
        AgentContext::new(agent, self.scope.clone())
    }

    async fn drive(&mut self) -> Result<(), SessionFailure> {
        if self.cancel.is_cancelled() {
            return Err(SessionFailure::new(
                Stage::RoleAssessment,
                None,
                StageError::Aborted("run cancelled before session start".into()),
            ));
        }
        ensure_pool_size(self.pool.len())
            .map_err(|cause| SessionFailure::new(Stage::RoleAssessment, None, cause))?;

        let roles = self.assign_roles().await?;
        let mut solvers = Vec::with_capacity(roles.solvers.len());
        for id in &roles.solvers {
            solvers.push(SolverContext::new(self.context(self.member(id, Stage::Solve)?)));
        }
        let judge = JudgeContext::new(
            self.context(self.member(&roles.judge, Stage::Judge)?),
            roles.solvers.clone(),
        );

        self.solve(&solvers).await?;
        self.review(&solvers).await?;
        self.refine(&solvers).await?;
        self.judge(&judge).await?;

        self.machine
            .advance(SessionPhase::Completed, Some("trail handed to persistence"))
            .map_err(|e| {
                SessionFailure::new(Stage::Judge, None, StageError::Invariant(e.to_string()))
            })
    }

    async fn assign_roles(&mut self) -> Result<AssignedRoles, SessionFailure> {
        let jobs = self
            .pool
            .iter()
            .map(|agent| {
                let ctx = self.context(agent.clone());
                (agent.id().clone(), async move { ctx.assess_role().await })
            })
            .collect();
        let assessments = fan_out(Stage::RoleAssessment, &self.cancel, jobs).await?;

        let roles = select_roles(&assessments)
            .map_err(|cause| SessionFailure::new(Stage::RoleAssessment, None, cause))?;
        self.trail.role_assessments = assessments;
        self.trail.roles = Some(roles.clone());

        info!(
            judge = %roles.judge,
            solvers = ?roles.solvers,
            unassigned = roles.unassigned.len(),
            "roles assigned"
        );
        self.advance(
            Stage::RoleAssessment,
            format!("judge {}, {} solvers", roles.judge, roles.solvers.len()),
        )?;
        Ok(roles)
    }

    async fn solve(&mut self, solvers: &[SolverContext]) -> Result<(), SessionFailure> {
        let jobs = solvers
            .iter()
            .map(|solver| {
                let solver = solver.clone();
                (solver.agent_id().clone(), async move { solver.solve().await })
            })
            .collect();
        let solutions = fan_out(Stage::Solve, &self.cancel, jobs).await?;

        info!(solutions = solutions.len(), "solutions collected");
        self.trail.solutions = solutions;
        self.advance(Stage::Solve, format!("{} solutions", self.trail.solutions.len()))
    }

    async fn review(&mut self, solvers: &[SolverContext]) -> Result<(), SessionFailure> {
        // Every ordered pair (reviewer, subject) with reviewer != subject.
        let mut jobs = Vec::new();
        for reviewer in solvers {
            for subject in &self.trail.solutions {
                if &subject.solver_id == reviewer.agent_id() {
                    continue;
                }
                let reviewer = reviewer.clone();
                let subject = subject.clone();
                jobs.push((reviewer.agent_id().clone(), async move {
                    reviewer.review(&subject).await
                }));
            }
        }
        let mut reviews = fan_out(Stage::Review, &self.cancel, jobs).await?;

        // Group by subject, then reviewer, both in pool order.
        let rank = |id: &AgentId| self.pool.position(id).unwrap_or(usize::MAX);
        reviews.sort_by_key(|r| (rank(&r.subject_id), rank(&r.reviewer_id)));

        info!(reviews = reviews.len(), "peer reviews collected");
        self.trail.reviews = reviews;
        self.advance(Stage::Review, format!("{} reviews", self.trail.reviews.len()))
    }

    async fn refine(&mut self, solvers: &[SolverContext]) -> Result<(), SessionFailure> {
        let mut jobs = Vec::with_capacity(solvers.len());
        for solver in solvers {
            let original = self.trail.solution_of(solver.agent_id()).cloned().ok_or_else(|| {
                SessionFailure::new(
                    Stage::Refine,
                    Some(solver.agent_id().clone()),
                    StageError::Invariant("solver has no original solution".into()),
                )
            })?;
            let received: Vec<_> = self
                .trail
                .reviews_for(solver.agent_id())
                .into_iter()
                .cloned()
                .collect();
            let solver = solver.clone();
            jobs.push((solver.agent_id().clone(), async move {
                solver.refine(&original, &received).await
            }));
        }
        let refinements = fan_out(Stage::Refine, &self.cancel, jobs).await?;

        let changed = refinements.iter().filter(|r| r.answer_changed).count();
        info!(refinements = refinements.len(), changed, "refinements collected");
        self.trail.refinements = refinements;
        self.advance(
            Stage::Refine,
            format!("{} refinements, {changed} changed", self.trail.refinements.len()),
        )
    }

    async fn judge(&mut self, judge: &JudgeContext) -> Result<(), SessionFailure> {
        let judge = judge.clone();
        let solutions = self.trail.solutions.clone();
        let reviews = self.trail.reviews.clone();
        let refinements = self.trail.refinements.clone();
        let jobs = vec![(judge.agent_id().clone(), async move {
            judge.judge(&solutions, &reviews, &refinements).await
        })];
        let judgement = fan_out(Stage::Judge, &self.cancel, jobs)
            .await?
            .pop()
            .ok_or_else(|| {
                SessionFailure::new(
                    Stage::Judge,
                    None,
                    StageError::Invariant("judge returned nothing".into()),
                )
            })?;

        info!(
            winner = %judgement.winner,
            confidence = judgement.confidence,
            "final judgement"
        );
        let reason = format!("winner {}", judgement.winner);
        self.trail.judgement = Some(judgement);
        self.advance(Stage::Judge, reason)
    }

    fn record(&self, outcome: &SessionOutcome) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id.clone(),
            run_id: self.scope.run_id.to_string(),
            problem_id: self.scope.problem.id.clone(),
            category: self.scope.problem.category.clone(),
            outcome: outcome.clone(),
            roles: self.trail.roles.clone(),
            winner: self.trail.judgement.as_ref().map(|j| j.winner.clone()),
            artifact_count: self.trail.artifact_count(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_ms: self.machine.elapsed_ms(),
            transitions: self.machine.transitions().to_vec(),
        }
    }

    /// Best-effort write of the trail and the run record.
    async fn persist(&self, outcome: &SessionOutcome) -> Vec<PersistenceWarning> {
        let record = self.record(outcome);
        let docs = trail_documents(&self.trail).and_then(|mut docs| {
            docs.push(ArtifactDocument::new(
                Collection::Runs,
                &self.session_id,
                format!("session_{}", self.session_id),
                &record,
            )?);
            Ok(docs)
        });

        match docs {
            Ok(docs) => self.recorder.record_all(&self.scope.problem.id, &docs).await,
            Err(e) => {
                warn!(error = %e, "could not serialize session artifacts");
                vec![PersistenceWarning {
                    target: WriteTarget::Store,
                    collection: Collection::Runs,
                    document_id: self.session_id.clone(),
                    message: e.to_string(),
                }]
            }
        }
    }
}
