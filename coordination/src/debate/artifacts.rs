//! Debate artifacts: problems, model-facing drafts, and the stamped records
//! each stage appends to the audit trail.
//!
//! Drafts are what an agent returns (and what providers describe to the model
//! via `schemars`). Records are drafts stamped with identity by the pipeline:
//! run/problem ids, author, generated artifact id, and call latency. Records are
//! never mutated after construction; refinement produces a new record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identifier of an agent in the pool. Stable across all sessions of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Generate a fresh artifact identifier (32 hex chars).
pub fn new_artifact_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A problem to debate. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(alias = "problem_statement")]
    pub statement: String,
    /// Reference answer, used only for post-run grading.
    #[serde(default, alias = "ground_answer", skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl Problem {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            subcategory: None,
            statement: statement.into(),
            ground_truth: None,
            difficulty: None,
        }
    }

    pub fn with_ground_truth(mut self, answer: impl Into<String>) -> Self {
        self.ground_truth = Some(answer.into());
        self
    }

    /// Solver prompt profile selected by this problem's category.
    pub fn prompt_profile(&self) -> PromptProfile {
        PromptProfile::for_category(&self.category)
    }
}

/// Category-specific solver prompt family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptProfile {
    Math,
    Logic,
    Physics,
    Code,
    General,
}

impl PromptProfile {
    pub fn for_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "math" | "mathematics" | "algebra" | "geometry" | "number_theory"
            | "combinatorics" | "probability" => Self::Math,
            "logic" | "puzzle" | "puzzles" | "riddle" | "lateral_thinking" => Self::Logic,
            "physics" => Self::Physics,
            "code" | "coding" | "programming" | "algorithms" => Self::Code,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for PromptProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Math => write!(f, "math"),
            Self::Logic => write!(f, "logic"),
            Self::Physics => write!(f, "physics"),
            Self::Code => write!(f, "code"),
            Self::General => write!(f, "general"),
        }
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{field} must be in [0, 1], got {value}"))
    }
}

fn check_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

// ── Drafts (model-facing shapes) ────────────────────────────────────────────

/// Self-assessed suitability for each role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoleAssessmentDraft {
    /// Suitability for independently solving the problem, 0.0–1.0.
    pub solver_score: f64,
    /// Suitability for judging other agents' solutions, 0.0–1.0.
    pub judge_score: f64,
    pub reasoning: String,
}

impl RoleAssessmentDraft {
    pub fn validate(&self) -> Result<(), String> {
        check_unit_interval("solver_score", self.solver_score)?;
        check_unit_interval("judge_score", self.judge_score)
    }
}

/// An independent answer to the problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SolutionDraft {
    pub answer: String,
    /// Step-by-step reasoning leading to the answer.
    pub reasoning: Vec<String>,
    pub confidence: f64,
}

impl SolutionDraft {
    pub fn validate(&self) -> Result<(), String> {
        check_non_empty("answer", &self.answer)?;
        check_unit_interval("confidence", self.confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    LogicalError,
    MissingCase,
    InvalidAssumption,
    MathError,
    Inconsistency,
    UnclearReasoning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Minor,
    Major,
    Critical,
}

/// One concrete problem a reviewer found in a peer's solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewIssue {
    /// Where the issue occurs ("Step 5", "final answer", ...).
    pub location: String,
    pub kind: IssueKind,
    pub description: String,
    pub severity: IssueSeverity,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PeerEvaluation {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub issues: Vec<ReviewIssue>,
    pub suggested_changes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverallAssessment {
    Correct,
    MostlyCorrect,
    PromisingButFlawed,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Revise,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Revise => write!(f, "revise"),
        }
    }
}

/// A critique of one peer solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewDraft {
    pub critique: String,
    pub evaluation: PeerEvaluation,
    pub overall_assessment: OverallAssessment,
    pub recommendation: Recommendation,
    /// Reviewer's confidence in its own review, 0.0–1.0.
    pub confidence: f64,
}

impl ReviewDraft {
    pub fn validate(&self) -> Result<(), String> {
        check_non_empty("critique", &self.critique)?;
        check_unit_interval("confidence", self.confidence)
    }
}

/// A revised answer after reading peer reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RefinementDraft {
    pub answer: String,
    pub reasoning: Vec<String>,
    pub confidence: f64,
    /// Why the answer changed, or why the original was kept.
    pub change_rationale: String,
}

impl RefinementDraft {
    pub fn validate(&self) -> Result<(), String> {
        check_non_empty("answer", &self.answer)?;
        check_unit_interval("confidence", self.confidence)
    }
}

/// The judge's selection of a winning solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JudgementDraft {
    /// Identifier of the winning solver, exactly as given in the input.
    pub winner: String,
    pub final_answer: String,
    pub justification: String,
    pub confidence: f64,
}

impl JudgementDraft {
    pub fn validate(&self) -> Result<(), String> {
        check_non_empty("winner", &self.winner)?;
        check_non_empty("final_answer", &self.final_answer)?;
        check_unit_interval("confidence", self.confidence)
    }
}

/// Binary answer-equivalence verdict used by grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnswerCheckDraft {
    pub is_correct: bool,
}

// ── Stamped records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssessment {
    pub assessment_id: String,
    pub run_id: String,
    pub problem_id: String,
    pub agent_id: AgentId,
    pub solver_score: f64,
    pub judge_score: f64,
    pub reasoning: String,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSolution {
    pub solution_id: String,
    pub run_id: String,
    pub problem_id: String,
    pub solver_id: AgentId,
    pub answer: String,
    pub reasoning: Vec<String>,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSolutionReview {
    pub review_id: String,
    pub run_id: String,
    pub problem_id: String,
    pub reviewer_id: AgentId,
    /// Solver whose solution is under review.
    pub subject_id: AgentId,
    pub subject_solution_id: String,
    pub critique: String,
    pub evaluation: PeerEvaluation,
    pub overall_assessment: OverallAssessment,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedProblemSolution {
    pub refined_solution_id: String,
    pub run_id: String,
    pub problem_id: String,
    pub solver_id: AgentId,
    pub parent_solution_id: String,
    /// Exactly the reviews addressed to the parent solution.
    pub review_ids: Vec<String>,
    pub answer: String,
    pub reasoning: Vec<String>,
    pub confidence: f64,
    pub answer_changed: bool,
    pub change_rationale: String,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalJudgement {
    pub judgement_id: String,
    pub run_id: String,
    pub problem_id: String,
    pub judge_id: AgentId,
    pub winner: AgentId,
    pub final_answer: String,
    pub justification: String,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Whether two answers differ after whitespace trimming.
pub fn answers_differ(before: &str, after: &str) -> bool {
    before.trim() != after.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_deserializes_dataset_aliases() {
        let raw = r#"{
            "id": "p-7",
            "category": "math",
            "subcategory": "algebra",
            "problem_statement": "Solve x + 1 = 2",
            "ground_answer": "1",
            "difficulty": "easy"
        }"#;
        let problem: Problem = serde_json::from_str(raw).unwrap();
        assert_eq!(problem.statement, "Solve x + 1 = 2");
        assert_eq!(problem.ground_truth.as_deref(), Some("1"));
        assert_eq!(problem.prompt_profile(), PromptProfile::Math);
    }

    #[test]
    fn prompt_profile_falls_back_to_general() {
        assert_eq!(PromptProfile::for_category(" Logic "), PromptProfile::Logic);
        assert_eq!(PromptProfile::for_category("physics"), PromptProfile::Physics);
        assert_eq!(PromptProfile::for_category("poetry"), PromptProfile::General);
    }

    #[test]
    fn role_assessment_scores_must_be_unit_interval() {
        let mut draft = RoleAssessmentDraft {
            solver_score: 0.4,
            judge_score: 0.9,
            reasoning: "good at checking".into(),
        };
        assert!(draft.validate().is_ok());
        draft.judge_score = 1.3;
        assert!(draft.validate().unwrap_err().contains("judge_score"));
        draft.judge_score = f64::NAN;
        assert!(draft.validate().is_err());
    }

    #[test]
    fn empty_answer_rejected() {
        let draft = SolutionDraft {
            answer: "   ".into(),
            reasoning: vec![],
            confidence: 0.5,
        };
        assert!(draft.validate().unwrap_err().contains("answer"));
    }

    #[test]
    fn review_enums_use_snake_case() {
        let json = serde_json::to_string(&OverallAssessment::PromisingButFlawed).unwrap();
        assert_eq!(json, "\"promising_but_flawed\"");
        let kind: IssueKind = serde_json::from_str("\"math_error\"").unwrap();
        assert_eq!(kind, IssueKind::MathError);
    }

    #[test]
    fn answers_differ_ignores_surrounding_whitespace() {
        assert!(!answers_differ(" 42 ", "42"));
        assert!(answers_differ("42", "43"));
    }

    #[test]
    fn artifact_ids_are_unique() {
        assert_ne!(new_artifact_id(), new_artifact_id());
        assert_eq!(new_artifact_id().len(), 32);
    }
}
