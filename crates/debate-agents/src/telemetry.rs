//! Run-level telemetry.
//!
//! Two output sinks:
//! - `<output>/run-summary.json`: summary of the latest run, overwritten each run
//! - `<output>/run-telemetry.jsonl`: append-only log of every run

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use coordination::debate::{AnswerGradeReport, GradedAnswer, RunReport, SessionOutcome};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::prompts::PROMPT_VERSION;

/// Accuracy figures from post-run grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingSummary {
    pub graded_sessions: usize,
    pub final_correct: usize,
    pub final_accuracy: f64,
    /// Share of all graded refinements that were correct.
    pub refinement_accuracy: f64,
}

impl GradingSummary {
    pub fn from_reports(reports: &[AnswerGradeReport]) -> Option<Self> {
        if reports.is_empty() {
            return None;
        }
        let final_correct = reports.iter().filter(|r| r.final_answer_correct).count();
        let (refined, refined_correct) = reports
            .iter()
            .flat_map(|r| r.grades.iter())
            .filter(|g| matches!(g.subject, GradedAnswer::Refinement { .. }))
            .fold((0usize, 0usize), |(n, ok), g| (n + 1, ok + usize::from(g.is_correct)));
        Some(Self {
            graded_sessions: reports.len(),
            final_correct,
            final_accuracy: final_correct as f64 / reports.len() as f64,
            refinement_accuracy: if refined == 0 {
                0.0
            } else {
                refined_correct as f64 / refined as f64
            },
        })
    }
}

/// One line of `run-telemetry.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub prompt_version: String,
    pub problems: usize,
    pub completed: usize,
    pub failed: usize,
    pub failed_problem_ids: Vec<String>,
    /// Failures keyed by the stage that failed.
    pub failures_by_stage: BTreeMap<String, usize>,
    pub persistence_warnings: usize,
    pub artifacts: usize,
    /// Refinements whose answer differs from the original solution.
    pub answers_changed: usize,
    pub refinements: usize,
    pub wins_by_agent: BTreeMap<String, usize>,
    pub judge_turns_by_agent: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading: Option<GradingSummary>,
}

impl RunSummary {
    pub fn from_report(report: &RunReport, grades: &[AnswerGradeReport]) -> Self {
        let mut failures_by_stage = BTreeMap::new();
        let mut wins_by_agent = BTreeMap::new();
        let mut judge_turns_by_agent = BTreeMap::new();
        let mut answers_changed = 0;
        let mut refinements = 0;

        for result in &report.results {
            if let SessionOutcome::Failed(failure) = &result.outcome {
                *failures_by_stage.entry(failure.stage.to_string()).or_insert(0) += 1;
            }
            if let Some(judgement) = result.final_judgement() {
                *wins_by_agent.entry(judgement.winner.to_string()).or_insert(0) += 1;
            }
            if let Some(roles) = &result.trail.roles {
                *judge_turns_by_agent.entry(roles.judge.to_string()).or_insert(0) += 1;
            }
            refinements += result.trail.refinements.len();
            answers_changed += result
                .trail
                .refinements
                .iter()
                .filter(|r| r.answer_changed)
                .count();
        }

        Self {
            run_id: report.run_id.clone(),
            started_at: report.started_at,
            elapsed_ms: report.elapsed_ms,
            prompt_version: PROMPT_VERSION.to_string(),
            problems: report.results.len(),
            completed: report.completed().count(),
            failed: report.failed().count(),
            failed_problem_ids: report.failed_problem_ids(),
            failures_by_stage,
            persistence_warnings: report.warning_count(),
            artifacts: report.results.iter().map(|r| r.trail.artifact_count()).sum(),
            answers_changed,
            refinements,
            wins_by_agent,
            judge_turns_by_agent,
            grading: GradingSummary::from_reports(grades),
        }
    }
}

/// Write the latest run summary to `<output>/run-summary.json`.
pub fn write_latest(summary: &RunSummary, output_dir: &Path) {
    let path = output_dir.join("run-summary.json");
    match serde_json::to_string_pretty(summary) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote run summary"),
            Err(e) => warn!("Failed to write run summary: {e}"),
        },
        Err(e) => warn!("Failed to serialize run summary: {e}"),
    }
}

/// Append the run summary to `<output>/run-telemetry.jsonl`.
pub fn append_telemetry(summary: &RunSummary, output_dir: &Path) {
    let path = output_dir.join("run-telemetry.jsonl");
    match serde_json::to_string(summary) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), "Appended run telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
