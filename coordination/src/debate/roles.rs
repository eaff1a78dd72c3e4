//! Role selection from self-assessments.
//!
//! The judge is the agent with the highest `judge_score`; the solvers are the
//! three best remaining agents by `solver_score`. Ties go to the agent
//! registered first, so selection is a pure function of the assessments.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::artifacts::{AgentId, RoleAssessment};
use super::error::StageError;

/// Solvers per session.
pub const SOLVER_COUNT: usize = 3;
/// Smallest pool able to staff one judge and three solvers.
pub const MIN_POOL_SIZE: usize = SOLVER_COUNT + 1;

/// Roles for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedRoles {
    pub judge: AgentId,
    /// Exactly three solvers, in pool order.
    pub solvers: Vec<AgentId>,
    /// Agents that take no part in this session, in pool order.
    pub unassigned: Vec<AgentId>,
}

impl AssignedRoles {
    pub fn is_solver(&self, id: &AgentId) -> bool {
        self.solvers.contains(id)
    }

    pub fn solver_position(&self, id: &AgentId) -> Option<usize> {
        self.solvers.iter().position(|s| s == id)
    }
}

pub fn ensure_pool_size(available: usize) -> Result<(), StageError> {
    if available < MIN_POOL_SIZE {
        return Err(StageError::InsufficientAgentPool {
            required: MIN_POOL_SIZE,
            available,
        });
    }
    Ok(())
}

/// Pick one judge and three solvers.
///
/// `assessments` must be in pool order; that order is the tie-breaker.
pub fn select_roles(assessments: &[RoleAssessment]) -> Result<AssignedRoles, StageError> {
    ensure_pool_size(assessments.len())?;

    // Stable sorts keep pool order among equal scores.
    let mut by_judge: Vec<usize> = (0..assessments.len()).collect();
    by_judge.sort_by(|&a, &b| descending(assessments[a].judge_score, assessments[b].judge_score));
    let judge_idx = by_judge[0];

    let mut by_solver: Vec<usize> = (0..assessments.len()).filter(|&i| i != judge_idx).collect();
    by_solver.sort_by(|&a, &b| {
        descending(assessments[a].solver_score, assessments[b].solver_score)
    });
    let mut solver_idx: Vec<usize> = by_solver.into_iter().take(SOLVER_COUNT).collect();
    solver_idx.sort_unstable();

    let unassigned = (0..assessments.len())
        .filter(|i| *i != judge_idx && !solver_idx.contains(i))
        .map(|i| assessments[i].agent_id.clone())
        .collect();

    Ok(AssignedRoles {
        judge: assessments[judge_idx].agent_id.clone(),
        solvers: solver_idx
            .into_iter()
            .map(|i| assessments[i].agent_id.clone())
            .collect(),
        unassigned,
    })
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn assessment(agent: &str, solver: f64, judge: f64) -> RoleAssessment {
        RoleAssessment {
            assessment_id: format!("ra-{agent}"),
            run_id: "run".into(),
            problem_id: "p".into(),
            agent_id: AgentId::from(agent),
            solver_score: solver,
            judge_score: judge,
            reasoning: String::new(),
            elapsed_ms: 0,
            created_at: Utc::now(),
        }
    }

    fn ids(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::from(*n)).collect()
    }

    #[test]
    fn highest_judge_score_judges_and_top_three_solve() {
        let roles = select_roles(&[
            assessment("a", 0.9, 0.2),
            assessment("b", 0.1, 0.95),
            assessment("c", 0.5, 0.3),
            assessment("d", 0.8, 0.1),
            assessment("e", 0.2, 0.4),
        ])
        .unwrap();
        assert_eq!(roles.judge, AgentId::from("b"));
        assert_eq!(roles.solvers, ids(&["a", "c", "d"]));
        assert_eq!(roles.unassigned, ids(&["e"]));
    }

    #[test]
    fn judge_excluded_from_solvers_even_with_best_solver_score() {
        let roles = select_roles(&[
            assessment("a", 1.0, 1.0),
            assessment("b", 0.5, 0.5),
            assessment("c", 0.5, 0.5),
            assessment("d", 0.5, 0.5),
        ])
        .unwrap();
        assert_eq!(roles.judge, AgentId::from("a"));
        assert!(!roles.is_solver(&AgentId::from("a")));
        assert_eq!(roles.solvers, ids(&["b", "c", "d"]));
        assert!(roles.unassigned.is_empty());
    }

    #[test]
    fn ties_break_by_pool_order() {
        let all_equal = [
            assessment("w", 0.5, 0.5),
            assessment("x", 0.5, 0.5),
            assessment("y", 0.5, 0.5),
            assessment("z", 0.5, 0.5),
            assessment("v", 0.5, 0.5),
        ];
        let roles = select_roles(&all_equal).unwrap();
        assert_eq!(roles.judge, AgentId::from("w"));
        assert_eq!(roles.solvers, ids(&["x", "y", "z"]));
        assert_eq!(roles.unassigned, ids(&["v"]));
    }

    #[test]
    fn selection_is_deterministic() {
        let input = [
            assessment("a", 0.3, 0.6),
            assessment("b", 0.7, 0.6),
            assessment("c", 0.7, 0.2),
            assessment("d", 0.3, 0.1),
            assessment("e", 0.7, 0.6),
        ];
        let first = select_roles(&input).unwrap();
        for _ in 0..10 {
            assert_eq!(select_roles(&input).unwrap(), first);
        }
    }

    #[test]
    fn solvers_listed_in_pool_order_not_score_order() {
        let roles = select_roles(&[
            assessment("j", 0.0, 0.9),
            assessment("low", 0.6, 0.0),
            assessment("high", 0.99, 0.0),
            assessment("mid", 0.8, 0.0),
        ])
        .unwrap();
        assert_eq!(roles.solvers, ids(&["low", "high", "mid"]));
        assert_eq!(roles.solver_position(&AgentId::from("mid")), Some(2));
    }

    #[test]
    fn three_agents_is_insufficient() {
        let err = select_roles(&[
            assessment("a", 0.1, 0.1),
            assessment("b", 0.1, 0.1),
            assessment("c", 0.1, 0.1),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            StageError::InsufficientAgentPool {
                required: 4,
                available: 3
            }
        );
    }
}
