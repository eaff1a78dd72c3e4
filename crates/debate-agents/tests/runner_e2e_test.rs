//! Full runs through the prompt/decode layer with a scripted completion
//! backend: prompts are rendered, replies are raw model text, documents land
//! in JSONL files and snapshots, telemetry is appended.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coordination::debate::{
    AgentConfig, CapabilityError, CapabilityFactory, DebateError, Problem, ProviderKind,
    SessionPhase, SharedCapability, Stage,
};
use debate_agents::config::{DebateConfig, RunSettings, StoreSettings};
use debate_agents::prompts;
use debate_agents::providers::{CompletionBackend, PromptedCapability, RetryingCapability};
use debate_agents::runner::DebateRunner;
use serde_json::{json, Value};

/// Plays one agent. Picks the reply by recognising the stage preamble.
struct ScriptedBackend {
    solver_score: f64,
    judge_score: f64,
    answer: String,
    /// First solve reply is prose with no JSON.
    garble_first_solve: bool,
    garbled: AtomicBool,
    /// Answer checks: which candidate answers are correct.
    accepted: Vec<String>,
}

impl ScriptedBackend {
    fn new(solver_score: f64, judge_score: f64, answer: &str) -> Self {
        Self {
            solver_score,
            judge_score,
            answer: answer.to_string(),
            garble_first_solve: false,
            garbled: AtomicBool::new(false),
            accepted: vec!["42".to_string()],
        }
    }

    fn garbling_first_solve(mut self) -> Self {
        self.garble_first_solve = true;
        self
    }
}

fn stage_of(system: &str) -> Stage {
    if system.starts_with(prompts::ROLE_ASSESSMENT_PREAMBLE) {
        Stage::RoleAssessment
    } else if system.starts_with(prompts::PEER_REVIEW_PREAMBLE) {
        Stage::Review
    } else if system.starts_with(prompts::REFINEMENT_PREAMBLE) {
        Stage::Refine
    } else if system.starts_with(prompts::JUDGE_PREAMBLE) {
        Stage::Judge
    } else if system.starts_with(prompts::ANSWER_CHECK_PREAMBLE) {
        Stage::AnswerCheck
    } else {
        Stage::Solve
    }
}

fn first_winner_id(user: &str) -> String {
    user.lines()
        .find_map(|l| l.strip_prefix("Valid winner ids: "))
        .and_then(|ids| ids.split(", ").next())
        .unwrap_or_default()
        .to_string()
}

fn candidate_answer(user: &str) -> String {
    user.lines()
        .find_map(|l| l.strip_prefix("Candidate answer: "))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        _schema: &Value,
    ) -> Result<String, CapabilityError> {
        tokio::task::yield_now().await;
        let reply = match stage_of(system) {
            Stage::RoleAssessment => json!({
                "solver_score": self.solver_score,
                "judge_score": self.judge_score,
                "reasoning": "calibrated"
            }),
            Stage::Solve => {
                if self.garble_first_solve && !self.garbled.swap(true, Ordering::SeqCst) {
                    return Ok("Let me think about this carefully first.".to_string());
                }
                json!({
                    "answer": self.answer,
                    "reasoning": ["multiply 6 by 7"],
                    "confidence": 0.8
                })
            }
            Stage::Review => json!({
                "critique": "The arithmetic checks out.",
                "evaluation": {
                    "strengths": ["clear"],
                    "weaknesses": [],
                    "issues": [],
                    "suggested_changes": []
                },
                "overall_assessment": "correct",
                "recommendation": "accept",
                "confidence": 0.9
            }),
            Stage::Refine => json!({
                "answer": self.answer,
                "reasoning": ["multiply 6 by 7", "double-checked"],
                "confidence": 0.85,
                "change_rationale": "Reviews agreed."
            }),
            Stage::Judge => json!({
                "winner": first_winner_id(user),
                "final_answer": "42",
                "justification": "Most rigorous derivation.",
                "confidence": 0.9
            }),
            Stage::AnswerCheck => json!({
                "is_correct": self.accepted.contains(&candidate_answer(user))
            }),
        };
        Ok(format!("```json\n{reply}\n```"))
    }
}

fn local(id: &str) -> AgentConfig {
    AgentConfig::new(id, ProviderKind::Local, "scripted").with_base_url("http://localhost:1/v1")
}

/// Factory wiring each agent id to its scripted backend, with one retry on
/// malformed output.
fn factory(backends: HashMap<&'static str, ScriptedBackend>) -> Arc<dyn CapabilityFactory> {
    let backends: HashMap<String, Arc<ScriptedBackend>> = backends
        .into_iter()
        .map(|(id, b)| (id.to_string(), Arc::new(b)))
        .collect();
    Arc::new(
        move |config: &AgentConfig| -> Result<SharedCapability, DebateError> {
            let backend = backends.get(config.id.as_str()).cloned().ok_or_else(|| {
                DebateError::CapabilityBuild {
                    agent: config.id.clone(),
                    reason: "no scripted backend".into(),
                }
            })?;
            let prompted: SharedCapability =
                Arc::new(PromptedCapability::new(config.id.clone(), backend));
            Ok(Arc::new(RetryingCapability::new(config.id.clone(), prompted, 1)))
        },
    )
}

fn config(output_dir: &Path, with_grader: bool) -> DebateConfig {
    DebateConfig {
        run: RunSettings {
            output_dir: output_dir.to_path_buf(),
            run_id: Some("run-e2e".into()),
            ..RunSettings::default()
        },
        store: StoreSettings::default(),
        agents: ["a", "j", "b", "u", "c"].into_iter().map(local).collect(),
        grader: with_grader.then(|| local("grader")),
    }
}

fn five_backends() -> HashMap<&'static str, ScriptedBackend> {
    HashMap::from([
        ("a", ScriptedBackend::new(0.9, 0.2, "42")),
        ("j", ScriptedBackend::new(0.3, 0.95, "42")),
        ("b", ScriptedBackend::new(0.8, 0.4, "42").garbling_first_solve()),
        ("u", ScriptedBackend::new(0.1, 0.1, "42")),
        ("c", ScriptedBackend::new(0.7, 0.3, "41")),
        ("grader", ScriptedBackend::new(0.0, 0.0, "")),
    ])
}

fn jsonl_len(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}

#[tokio::test]
async fn run_writes_collections_snapshots_and_telemetry() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let out = tempfile::tempdir().unwrap();
    let runner = DebateRunner::new(config(out.path(), true), factory(five_backends()));

    let problems = vec![
        Problem::new("p-1", "math", "What is 6 * 7?").with_ground_truth("42"),
        Problem::new("p-2", "logic", "What is six times seven?").with_ground_truth("42"),
    ];
    let output = runner.run(problems, true).await.unwrap();

    assert!(output.report.all_completed());
    assert_eq!(output.report.run_id, "run-e2e");
    for result in &output.report.results {
        assert_eq!(result.final_phase(), SessionPhase::Completed);
        let roles = result.trail.roles.as_ref().unwrap();
        assert_eq!(roles.judge.as_str(), "j");
        let judgement = result.final_judgement().unwrap();
        assert_eq!(judgement.winner.as_str(), "a");
    }

    let store = out.path().join("store");
    assert_eq!(jsonl_len(&store.join("Runs.jsonl")), 2);
    assert_eq!(jsonl_len(&store.join("RoleAssessments.jsonl")), 10);
    assert_eq!(jsonl_len(&store.join("Solutions.jsonl")), 6);
    assert_eq!(jsonl_len(&store.join("SolutionReviews.jsonl")), 12);
    assert_eq!(jsonl_len(&store.join("RefinedSolutions.jsonl")), 6);
    assert_eq!(jsonl_len(&store.join("FinalJudgements.jsonl")), 2);
    // Final answer plus three refinements per problem.
    assert_eq!(jsonl_len(&store.join("AnswerCorrectness.jsonl")), 8);

    assert!(out.path().join("p-1/solutions/b.json").exists());
    assert!(out.path().join("p-1/reviews/a_reviews_c.json").exists());
    assert!(out.path().join("p-2/final_judgement/j.json").exists());

    assert_eq!(jsonl_len(&out.path().join("run-telemetry.jsonl")), 1);
    let summary: Value = serde_json::from_str(
        &std::fs::read_to_string(out.path().join("run-summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["completed"], 2);
    assert_eq!(summary["wins_by_agent"]["a"], 2);
    assert_eq!(summary["judge_turns_by_agent"]["j"], 2);
    assert_eq!(summary["prompt_version"], prompts::PROMPT_VERSION);

    let grading = output.summary.grading.as_ref().unwrap();
    assert_eq!(grading.graded_sessions, 2);
    assert_eq!(grading.final_correct, 2);
    // c answers 41 in both problems.
    assert!((grading.refinement_accuracy - 4.0 / 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn second_run_appends_telemetry_and_keeps_documents() {
    let out = tempfile::tempdir().unwrap();
    let problems = || vec![Problem::new("p-1", "math", "What is 6 * 7?")];

    let first = DebateRunner::new(config(out.path(), false), factory(five_backends()));
    first.run(problems(), false).await.unwrap();
    let mut second_config = config(out.path(), false);
    second_config.run.run_id = Some("run-e2e-2".into());
    let second = DebateRunner::new(second_config, factory(five_backends()));
    let output = second.run(problems(), false).await.unwrap();

    assert!(output.grades.is_empty());
    assert!(output.summary.grading.is_none());
    assert_eq!(jsonl_len(&out.path().join("run-telemetry.jsonl")), 2);
    // New artifact ids each run, so documents accumulate.
    assert_eq!(jsonl_len(&out.path().join("store/Solutions.jsonl")), 6);
}

#[tokio::test]
async fn grading_without_grader_is_rejected_before_running() {
    let out = tempfile::tempdir().unwrap();
    let runner = DebateRunner::new(config(out.path(), false), factory(five_backends()));
    let err = runner
        .run(vec![Problem::new("p", "math", "?")], true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("grader"));
    assert!(!out.path().join("store").exists());
}

#[tokio::test]
async fn small_pool_fails_the_run() {
    let out = tempfile::tempdir().unwrap();
    let mut cfg = config(out.path(), false);
    cfg.agents.truncate(3);
    let runner = DebateRunner::new(cfg, factory(five_backends()));

    let err = runner
        .run(vec![Problem::new("p", "math", "?")], false)
        .await
        .unwrap_err();
    let root = err.root_cause().to_string();
    assert!(root.contains("need at least 4"), "unexpected error: {root}");
    assert_eq!(jsonl_len(&out.path().join("store/Runs.jsonl")), 0);
}

#[tokio::test]
async fn cancelled_runner_reports_every_problem_failed() {
    let out = tempfile::tempdir().unwrap();
    let runner = DebateRunner::new(config(out.path(), false), factory(five_backends()));
    runner.cancellation_token().cancel();

    let output = runner
        .run(
            vec![
                Problem::new("p-1", "math", "?"),
                Problem::new("p-2", "math", "?"),
            ],
            false,
        )
        .await
        .unwrap();
    assert_eq!(output.report.failed_problem_ids(), vec!["p-1", "p-2"]);
    assert_eq!(output.summary.failed, 2);
}
