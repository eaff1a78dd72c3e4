//! Debate orchestrator: one session per problem over a shared agent pool.
//!
//! The pool is built once and shared read-only. Sessions run concurrently up
//! to `max_concurrent_sessions`; the rest queue on a semaphore. A failed or
//! panicking session never affects its siblings.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, info};

use super::agent::AgentPool;
use super::artifacts::{new_artifact_id, Problem};
use super::error::DebateError;
use super::persistence::ArtifactRecorder;
use super::roles::MIN_POOL_SIZE;
use super::session::{ProblemSolvingSession, SessionResult};

/// Configuration for a debate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Sessions allowed to run at once.
    pub max_concurrent_sessions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 7,
        }
    }
}

/// Outcome of a whole run: one result per problem, in input order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub results: Vec<SessionResult>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn completed(&self) -> impl Iterator<Item = &SessionResult> {
        self.results.iter().filter(|r| r.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &SessionResult> {
        self.results.iter().filter(|r| !r.is_completed())
    }

    /// Ids of problems whose session failed, for a retry run.
    pub fn failed_problem_ids(&self) -> Vec<String> {
        self.failed().map(|r| r.problem.id.clone()).collect()
    }

    pub fn warning_count(&self) -> usize {
        self.results.iter().map(|r| r.warnings.len()).sum()
    }

    pub fn all_completed(&self) -> bool {
        self.results.iter().all(SessionResult::is_completed)
    }

    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        let status = if self.all_completed() { "OK" } else { "PARTIAL" };
        format!(
            "[{}] run={} | {}/{} completed | {} failed | {} warnings | {:.1}s",
            status,
            self.run_id,
            self.completed().count(),
            self.results.len(),
            self.failed().count(),
            self.warning_count(),
            self.elapsed_ms as f64 / 1000.0,
        )
    }
}

/// Runs the debate pipeline over many problems.
pub struct DebateOrchestrator {
    run_id: Arc<str>,
    pool: AgentPool,
    recorder: ArtifactRecorder,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl DebateOrchestrator {
    pub fn new(pool: AgentPool, recorder: ArtifactRecorder, config: OrchestratorConfig) -> Self {
        Self {
            run_id: new_artifact_id().into(),
            pool,
            recorder,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<Arc<str>>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Use an externally owned token, e.g. a child of a process-wide one.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    /// Cancelling this token stops queued sessions and aborts running ones.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one session per problem.
    ///
    /// Fails only when the run cannot start at all; individual session
    /// failures are reported in the [`RunReport`].
    pub async fn run(&self, problems: Vec<Problem>) -> Result<RunReport, DebateError> {
        if self.pool.len() < MIN_POOL_SIZE {
            return Err(DebateError::InsufficientAgentPool {
                required: MIN_POOL_SIZE,
                available: self.pool.len(),
            });
        }
        if self.config.max_concurrent_sessions == 0 {
            return Err(DebateError::Configuration(
                "max_concurrent_sessions must be at least 1".into(),
            ));
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let problems: Vec<Arc<Problem>> = problems.into_iter().map(Arc::new).collect();
        info!(
            run_id = %self.run_id,
            problems = problems.len(),
            agents = self.pool.len(),
            max_concurrent = self.config.max_concurrent_sessions,
            "debate run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sessions));
        let mut set = JoinSet::new();

        for (idx, problem) in problems.iter().enumerate() {
            let problem = Arc::clone(problem);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let run_id = Arc::clone(&self.run_id);
            let pool = self.pool.clone();
            let recorder = self.recorder.clone();

            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (
                        idx,
                        SessionResult::aborted(&run_id, problem, "run cancelled while queued"),
                    );
                };

                let session = ProblemSolvingSession::new(
                    Arc::clone(&run_id),
                    Arc::clone(&problem),
                    pool,
                    recorder,
                )
                .with_cancellation(cancel.child_token());
                // Inner task contains panics to this session and dies with the handle.
                let handle = AbortOnDropHandle::new(tokio::spawn(session.run()));
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(problem_id = %problem.id, error = %e, "session task failed");
                        let reason = format!("session task failed: {e}");
                        SessionResult::aborted(&run_id, problem, reason)
                    }
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<SessionResult>> = (0..problems.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    info!(
                        problem_id = %result.problem.id,
                        phase = %result.final_phase(),
                        "session finished"
                    );
                    slots[idx] = Some(result);
                }
                Err(e) => error!(error = %e, "session wrapper task failed"),
            }
        }

        let results = slots
            .into_iter()
            .zip(problems)
            .map(|(slot, problem)| {
                slot.unwrap_or_else(|| {
                    SessionResult::aborted(&self.run_id, problem, "session produced no result")
                })
            })
            .collect();

        let report = RunReport {
            run_id: self.run_id.to_string(),
            results,
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        };
        info!(summary = %report.summary_line(), "debate run finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::debate::agent::{AgentConfig, ProviderKind};
    use crate::debate::capability::{
        AgentCapability, AgentRole, CallPolicy, MockAgentCapability, SharedCapability,
        StageOutput, StageRequest,
    };
    use crate::debate::error::CapabilityError;
    use crate::debate::persistence::MemoryStore;

    fn pool_of(n: usize) -> AgentPool {
        let factory = |_: &AgentConfig| -> Result<SharedCapability, DebateError> {
            let mut mock = MockAgentCapability::new();
            mock.expect_generate().never();
            Ok(Arc::new(mock))
        };
        let configs = (0..n)
            .map(|i| {
                AgentConfig::new(format!("agent-{i}"), ProviderKind::Local, "m")
                    .with_base_url("http://localhost:1/v1")
            })
            .collect();
        AgentPool::build(configs, &factory, CallPolicy::default()).unwrap()
    }

    #[tokio::test]
    async fn small_pool_fails_before_any_agent_call() {
        let orchestrator = DebateOrchestrator::new(
            pool_of(3),
            ArtifactRecorder::store_only(Arc::new(MemoryStore::new())),
            OrchestratorConfig::default(),
        );
        let err = orchestrator
            .run(vec![Problem::new("p", "math", "1+1")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DebateError::InsufficientAgentPool {
                required: 4,
                available: 3
            }
        ));
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let orchestrator = DebateOrchestrator::new(
            pool_of(4),
            ArtifactRecorder::store_only(Arc::new(MemoryStore::new())),
            OrchestratorConfig {
                max_concurrent_sessions: 0,
            },
        );
        let err = orchestrator.run(vec![]).await.unwrap_err();
        assert!(matches!(err, DebateError::Configuration(_)));
    }

    #[tokio::test]
    async fn cancelled_run_marks_every_session_aborted() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = DebateOrchestrator::new(
            pool_of(4),
            ArtifactRecorder::store_only(store),
            OrchestratorConfig::default(),
        )
        .with_run_id("run-x");
        orchestrator.cancellation_token().cancel();

        let report = orchestrator
            .run(vec![Problem::new("a", "math", "?"), Problem::new("b", "logic", "?")])
            .await
            .unwrap();
        assert_eq!(report.run_id, "run-x");
        assert_eq!(report.failed_problem_ids(), vec!["a", "b"]);
        assert!(report.summary_line().starts_with("[PARTIAL]"));
    }

    /// Never answers; counts calls started and call futures dropped.
    struct HangingCapability {
        started: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl AgentCapability for HangingCapability {
        async fn generate(
            &self,
            _role: AgentRole,
            _request: StageRequest,
        ) -> Result<StageOutput, CapabilityError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _guard = DropCounter(Arc::clone(&self.dropped));
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_run_future_stops_running_sessions() {
        let started = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let factory = |_: &AgentConfig| -> Result<SharedCapability, DebateError> {
            Ok(Arc::new(HangingCapability {
                started: Arc::clone(&started),
                dropped: Arc::clone(&dropped),
            }))
        };
        let configs = (0..4)
            .map(|i| {
                AgentConfig::new(format!("agent-{i}"), ProviderKind::Local, "m")
                    .with_base_url("http://localhost:1/v1")
            })
            .collect();
        let policy = CallPolicy::default()
            .with_timeout(Duration::from_secs(3600))
            .without_heartbeat();
        let pool = AgentPool::build(configs, &factory, policy).unwrap();
        let orchestrator = DebateOrchestrator::new(
            pool,
            ArtifactRecorder::store_only(Arc::new(MemoryStore::new())),
            OrchestratorConfig::default(),
        );

        let run = orchestrator.run(vec![Problem::new("p", "math", "1+1")]);
        let timed_out = tokio::time::timeout(Duration::from_secs(5), run).await;
        assert!(timed_out.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 4);

        for _ in 0..50 {
            if dropped.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 4);
        assert_eq!(started.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn empty_report_summary() {
        let report = RunReport {
            run_id: "r".into(),
            results: vec![],
            started_at: Utc::now(),
            elapsed_ms: 1500,
        };
        assert!(report.all_completed());
        assert_eq!(
            report.summary_line(),
            "[OK] run=r | 0/0 completed | 0 failed | 0 warnings | 1.5s"
        );
    }
}
