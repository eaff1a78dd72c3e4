//! Post-run answer grading against a problem's reference answer.
//!
//! A grader agent compares each candidate answer (the final judgement and every
//! refined answer) with `Problem::ground_truth` and returns a binary verdict.
//! Grades are appended to the `AnswerCorrectness` collection. Problems without
//! a reference answer, and sessions that did not complete, are skipped.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::agent::Agent;
use super::artifacts::{new_artifact_id, AgentId};
use super::contexts::{AgentContext, SessionScope};
use super::error::StageError;
use super::orchestrator::RunReport;
use super::persistence::{ArtifactDocument, ArtifactRecorder, Collection, PersistenceWarning};
use super::session::SessionResult;

/// Which answer a grade applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradedAnswer {
    FinalJudgement { judgement_id: String, judge_id: AgentId },
    Refinement { refined_solution_id: String, solver_id: AgentId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerGrade {
    pub grade_id: String,
    pub run_id: String,
    pub problem_id: String,
    pub grader_id: AgentId,
    pub subject: GradedAnswer,
    pub candidate_answer: String,
    pub ground_truth: String,
    pub is_correct: bool,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// All grades for one completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerGradeReport {
    pub run_id: String,
    pub session_id: String,
    pub problem_id: String,
    pub final_answer_correct: bool,
    /// Final judgement first, then refinements in trail order.
    pub grades: Vec<AnswerGrade>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PersistenceWarning>,
}

impl AnswerGradeReport {
    /// Share of refined answers graded correct.
    pub fn refinement_accuracy(&self) -> f64 {
        let refined: Vec<_> = self
            .grades
            .iter()
            .filter(|g| matches!(g.subject, GradedAnswer::Refinement { .. }))
            .collect();
        if refined.is_empty() {
            return 0.0;
        }
        refined.iter().filter(|g| g.is_correct).count() as f64 / refined.len() as f64
    }
}

/// Grades completed sessions with a dedicated grader agent.
pub struct AnswerGrader {
    agent: Agent,
    recorder: Option<ArtifactRecorder>,
}

impl AnswerGrader {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: ArtifactRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Grade one session. `Ok(None)` when there is nothing to grade.
    pub async fn grade_session(
        &self,
        result: &SessionResult,
    ) -> Result<Option<AnswerGradeReport>, StageError> {
        let Some(ground_truth) = result.problem.ground_truth.clone() else {
            return Ok(None);
        };
        let Some(judgement) = result.final_judgement().filter(|_| result.is_completed()) else {
            return Ok(None);
        };

        let ctx = AgentContext::new(
            self.agent.clone(),
            SessionScope::new(result.run_id.as_str(), result.problem.clone()),
        );

        let mut candidates = vec![(
            GradedAnswer::FinalJudgement {
                judgement_id: judgement.judgement_id.clone(),
                judge_id: judgement.judge_id.clone(),
            },
            judgement.final_answer.clone(),
        )];
        candidates.extend(result.trail.refinements.iter().map(|r| {
            (
                GradedAnswer::Refinement {
                    refined_solution_id: r.refined_solution_id.clone(),
                    solver_id: r.solver_id.clone(),
                },
                r.answer.clone(),
            )
        }));

        let grades = try_join_all(candidates.into_iter().map(|(subject, answer)| {
            let ctx = &ctx;
            let ground_truth = &ground_truth;
            async move {
                let (is_correct, elapsed_ms) = ctx.check_answer(&answer).await?;
                Ok::<_, StageError>(AnswerGrade {
                    grade_id: new_artifact_id(),
                    run_id: result.run_id.clone(),
                    problem_id: result.problem.id.clone(),
                    grader_id: ctx.agent_id().clone(),
                    subject,
                    candidate_answer: answer,
                    ground_truth: ground_truth.clone(),
                    is_correct,
                    elapsed_ms,
                    created_at: Utc::now(),
                })
            }
        }))
        .await?;

        let mut report = AnswerGradeReport {
            run_id: result.run_id.clone(),
            session_id: result.session_id.clone(),
            problem_id: result.problem.id.clone(),
            final_answer_correct: grades.first().map(|g| g.is_correct).unwrap_or(false),
            grades,
            warnings: Vec::new(),
        };

        if let Some(recorder) = &self.recorder {
            let docs = report
                .grades
                .iter()
                .map(|g| {
                    let name = match &g.subject {
                        GradedAnswer::FinalJudgement { .. } => "final_answer".to_string(),
                        GradedAnswer::Refinement { solver_id, .. } => {
                            format!("refined_{solver_id}")
                        }
                    };
                    ArtifactDocument::new(Collection::AnswerCorrectness, &g.grade_id, name, g)
                })
                .collect::<Result<Vec<_>, _>>();
            match docs {
                Ok(docs) => {
                    report.warnings = recorder.record_all(&report.problem_id, &docs).await;
                }
                Err(e) => warn!(
                    problem_id = %report.problem_id,
                    error = %e,
                    "could not serialize grades"
                ),
            }
        }

        info!(
            problem_id = %report.problem_id,
            final_answer_correct = report.final_answer_correct,
            refinement_accuracy = report.refinement_accuracy(),
            "session graded"
        );
        Ok(Some(report))
    }

    /// Grade every completed session of a run. Grading failures are logged
    /// and skipped.
    pub async fn grade_run(&self, run: &RunReport) -> Vec<AnswerGradeReport> {
        let mut reports = Vec::new();
        for result in &run.results {
            match self.grade_session(result).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => warn!(problem_id = %result.problem.id, error = %e, "grading failed"),
            }
        }
        reports
    }
}
