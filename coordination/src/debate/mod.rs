//! Debate Pipeline: Staged Multi-Agent Problem Solving
//!
//! Several independent agents solve one problem through a fixed sequence of
//! stages. A session owns one problem; the orchestrator runs many sessions
//! over a shared, read-only agent pool.
//!
//! # Session Flow
//!
//! ```text
//! Initialized → RolesAssigned → Solved → Reviewed → Refined → Judged → Completed
//!      │             │             │         │          │         │
//!      │   1 judge + 3 solvers     │   6 peer reviews   │    winner ∈ solvers
//!      │                     3 solutions          3 refinements
//!      │
//!      └─ any agent failure → Failed (partial trail still persisted)
//! ```
//!
//! Provider code lives outside this crate; everything here talks to agents
//! through [`AgentCapability`].

pub mod agent;
pub mod artifacts;
pub mod capability;
pub mod contexts;
pub mod error;
pub mod grading;
pub mod orchestrator;
pub mod persistence;
pub mod roles;
pub mod session;
pub mod state;
pub mod trail;

pub use agent::{Agent, AgentConfig, AgentPool, CapabilityFactory, ProviderKind};
pub use artifacts::{
    AgentId, FinalJudgement, Problem, ProblemSolution, ProblemSolutionReview, PromptProfile,
    RefinedProblemSolution, RoleAssessment,
};
pub use capability::{
    output_schema, AgentCapability, AgentRole, CallPolicy, SharedCapability, Stage, StageOutput,
    StageRequest, TimedCapability,
};
pub use contexts::{AgentContext, JudgeContext, SessionScope, SolverContext};
pub use error::{CapabilityError, DebateError, SessionFailure, StageError};
pub use grading::{AnswerGrade, AnswerGradeReport, AnswerGrader, GradedAnswer};
pub use orchestrator::{DebateOrchestrator, OrchestratorConfig, RunReport};
pub use persistence::{
    ArtifactRecorder, Collection, DiscardSnapshots, DocumentStore, MemoryStore, PersistenceError,
    PersistenceWarning, SnapshotWriter, WriteTarget,
};
pub use roles::{select_roles, AssignedRoles, MIN_POOL_SIZE, SOLVER_COUNT};
pub use session::{ProblemSolvingSession, SessionOutcome, SessionRecord, SessionResult};
pub use state::{IllegalTransition, SessionPhase, SessionStateMachine, TransitionRecord};
pub use trail::AuditTrail;
