//! Per-session audit trail, appended strictly in stage order.

use serde::{Deserialize, Serialize};

use super::artifacts::{
    AgentId, FinalJudgement, ProblemSolution, ProblemSolutionReview, RefinedProblemSolution,
    RoleAssessment,
};
use super::roles::AssignedRoles;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub role_assessments: Vec<RoleAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<AssignedRoles>,
    pub solutions: Vec<ProblemSolution>,
    pub reviews: Vec<ProblemSolutionReview>,
    pub refinements: Vec<RefinedProblemSolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgement: Option<FinalJudgement>,
}

impl AuditTrail {
    pub fn solution_of(&self, solver: &AgentId) -> Option<&ProblemSolution> {
        self.solutions.iter().find(|s| &s.solver_id == solver)
    }

    /// Reviews whose subject is `solver`, in trail order.
    pub fn reviews_for(&self, solver: &AgentId) -> Vec<&ProblemSolutionReview> {
        self.reviews.iter().filter(|r| &r.subject_id == solver).collect()
    }

    /// Reviews authored by `reviewer`, in trail order.
    pub fn reviews_by(&self, reviewer: &AgentId) -> Vec<&ProblemSolutionReview> {
        self.reviews.iter().filter(|r| &r.reviewer_id == reviewer).collect()
    }

    pub fn refinement_of(&self, solver: &AgentId) -> Option<&RefinedProblemSolution> {
        self.refinements.iter().find(|r| &r.solver_id == solver)
    }

    /// Total number of artifacts recorded so far.
    pub fn artifact_count(&self) -> usize {
        self.role_assessments.len()
            + self.solutions.len()
            + self.reviews.len()
            + self.refinements.len()
            + usize::from(self.judgement.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::artifacts::{OverallAssessment, PeerEvaluation, Recommendation};
    use chrono::Utc;

    fn review(reviewer: &str, subject: &str) -> ProblemSolutionReview {
        ProblemSolutionReview {
            review_id: format!("{reviewer}->{subject}"),
            run_id: "run".into(),
            problem_id: "p".into(),
            reviewer_id: AgentId::from(reviewer),
            subject_id: AgentId::from(subject),
            subject_solution_id: format!("sol-{subject}"),
            critique: "ok".into(),
            evaluation: PeerEvaluation::default(),
            overall_assessment: OverallAssessment::Correct,
            recommendation: Recommendation::Accept,
            confidence: 0.5,
            elapsed_ms: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn review_lookups_by_subject_and_author() {
        let trail = AuditTrail {
            reviews: vec![review("a", "b"), review("a", "c"), review("b", "a"), review("c", "a")],
            ..AuditTrail::default()
        };
        assert_eq!(trail.reviews_for(&AgentId::from("a")).len(), 2);
        assert_eq!(trail.reviews_by(&AgentId::from("a")).len(), 2);
        assert!(trail.reviews_for(&AgentId::from("z")).is_empty());
        assert_eq!(trail.artifact_count(), 4);
    }
}
