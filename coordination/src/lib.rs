//! Debate Coordination Library
//!
//! Core of the staged multi-agent debate pipeline:
//! - typed stage requests and outputs behind the `AgentCapability` contract
//! - per-session state machine with validated transitions
//! - bounded-concurrency orchestration across problems
//! - append-only persistence contracts and post-run answer grading
//!
//! Concrete model providers, configuration, and sinks live in the
//! `debate-agents` crate.

#![allow(clippy::uninlined_format_args)]

pub mod debate;

pub use debate::{
    AgentCapability, AgentConfig, AgentId, AgentPool, CallPolicy, DebateError,
    DebateOrchestrator, OrchestratorConfig, Problem, RunReport, SessionOutcome, SessionResult,
};
