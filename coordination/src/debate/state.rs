//! Session state machine: phases, legal transitions, and transition history.
//!
//! ```text
//! Initialized → RolesAssigned → Solved → Reviewed → Refined → Judged → Completed
//!      │              │            │         │          │         │
//!      └──────────────┴────────────┴─────────┴──────────┴─────────┴──→ Failed
//! ```
//!
//! Every phase is a prerequisite for the next; there are no skips and no
//! back-edges. `Failed` is reachable from any non-terminal phase.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a problem-solving session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Session created, no agent called yet.
    Initialized,
    /// One judge and three solvers selected.
    RolesAssigned,
    /// Three original solutions collected.
    Solved,
    /// Six peer reviews collected.
    Reviewed,
    /// Three refined solutions collected.
    Refined,
    /// Final judgement produced.
    Judged,
    /// Audit trail handed to persistence. Terminal.
    Completed,
    /// A stage failed. Terminal.
    Failed,
}

impl SessionPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The next phase on the success path.
    pub fn successor(self) -> Option<SessionPhase> {
        match self {
            Self::Initialized => Some(Self::RolesAssigned),
            Self::RolesAssigned => Some(Self::Solved),
            Self::Solved => Some(Self::Reviewed),
            Self::Reviewed => Some(Self::Refined),
            Self::Refined => Some(Self::Judged),
            Self::Judged => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Whether `self → to` is a legal edge.
    pub fn can_transition_to(self, to: SessionPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.successor() == Some(to)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::RolesAssigned => write!(f, "roles_assigned"),
            Self::Solved => write!(f, "solved"),
            Self::Reviewed => write!(f, "reviewed"),
            Self::Refined => write!(f, "refined"),
            Self::Judged => write!(f, "judged"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A single recorded phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: SessionPhase,
    pub to: SessionPhase,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal session transition {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current phase and keeps a log of every transition.
#[derive(Debug)]
pub struct SessionStateMachine {
    current: SessionPhase,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            current: SessionPhase::Initialized,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> SessionPhase {
        self.current
    }

    /// Attempt to advance to `to`.
    pub fn advance(
        &mut self,
        to: SessionPhase,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !self.current.can_transition_to(to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            reason: reason.map(str::to_string),
        });
        tracing::debug!(from = %self.current, to = %to, "session transition");
        self.current = to;
        Ok(())
    }

    /// Move to `Failed`. Errors if already terminal.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(SessionPhase::Failed, Some(reason))
    }

    /// Whether the session has passed through (or is at) `phase` on the
    /// success path.
    pub fn has_reached(&self, phase: SessionPhase) -> bool {
        self.current == phase || self.transitions.iter().any(|t| t.to == phase)
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }
}
