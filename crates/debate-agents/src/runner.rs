//! One complete run: pool → sessions → grading → telemetry.

use std::sync::Arc;

use anyhow::{Context, Result};
use coordination::debate::{
    Agent, AgentPool, AnswerGradeReport, AnswerGrader, CapabilityFactory, DebateOrchestrator,
    Problem, RunReport,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DebateConfig;
use crate::sinks;
use crate::telemetry::{self, RunSummary};

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub report: RunReport,
    pub grades: Vec<AnswerGradeReport>,
    pub summary: RunSummary,
}

pub struct DebateRunner {
    config: DebateConfig,
    factory: Arc<dyn CapabilityFactory>,
    cancel: CancellationToken,
}

impl DebateRunner {
    pub fn new(config: DebateConfig, factory: Arc<dyn CapabilityFactory>) -> Self {
        Self {
            config,
            factory,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling stops queued sessions and aborts running ones.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DebateConfig {
        &self.config
    }

    pub async fn run(&self, problems: Vec<Problem>, grade: bool) -> Result<RunOutput> {
        let policy = self.config.call_policy();
        let grader = match (&self.config.grader, grade) {
            (Some(config), true) => Some(
                Agent::standalone(config.clone(), self.factory.as_ref(), policy)
                    .context("Failed to build grader agent")?,
            ),
            (None, true) => anyhow::bail!("--grade requires a [grader] agent in the config"),
            (_, false) => None,
        };

        let pool = AgentPool::build(self.config.agents.clone(), self.factory.as_ref(), policy)
            .context("Failed to build agent pool")?;
        let recorder = sinks::build_recorder(&self.config).await?;

        let mut orchestrator =
            DebateOrchestrator::new(pool, recorder.clone(), self.config.orchestrator_config())
                .with_cancellation(self.cancel.child_token());
        if let Some(run_id) = &self.config.run.run_id {
            orchestrator = orchestrator.with_run_id(run_id.as_str());
        }

        let report = orchestrator
            .run(problems)
            .await
            .context("Debate run could not start")?;

        let grades = match grader {
            Some(agent) => {
                let grades = AnswerGrader::new(agent)
                    .with_recorder(recorder)
                    .grade_run(&report)
                    .await;
                info!(graded = grades.len(), "grading finished");
                grades
            }
            None => Vec::new(),
        };

        let summary = RunSummary::from_report(&report, &grades);
        let output_dir = &self.config.run.output_dir;
        match std::fs::create_dir_all(output_dir) {
            Ok(()) => {
                telemetry::write_latest(&summary, output_dir);
                telemetry::append_telemetry(&summary, output_dir);
            }
            Err(e) => warn!("Failed to create output dir {}: {e}", output_dir.display()),
        }

        Ok(RunOutput {
            report,
            grades,
            summary,
        })
    }
}
