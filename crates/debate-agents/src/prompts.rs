//! System prompts and user-prompt rendering for every debate stage.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever a preamble or the user
//! prompt layout changes. The version is written into run telemetry so a
//! regression can be traced back to the prompt set that produced it.

use std::fmt::Write;

use coordination::debate::{
    AgentRole, ProblemSolution, ProblemSolutionReview, PromptProfile, RefinedProblemSolution,
    StageRequest,
};

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Shared tail for every preamble: the reply must be a single JSON object.
const JSON_ONLY: &str = "\
Respond with a single JSON object that matches the requested schema. \
Do not wrap it in markdown and do not add commentary before or after it.";

pub const ROLE_ASSESSMENT_PREAMBLE: &str = "\
You are one member of a panel of independent problem solvers. Before the panel \
starts, every member rates how well suited they are to two roles for the problem \
shown:

- **solver**: works the problem end to end, then reviews and refines.
- **judge**: reads every solution, review and refinement, then picks a winner.

Give `solver_score` and `judge_score` as numbers in [0, 1]. Be honest: a member \
who is good at checking other people's work but unsure about the domain should \
rate judge above solver. Keep `reasoning` to two or three sentences.";

pub const MATH_SOLVER_PREAMBLE: &str = "\
You are a careful mathematician. Solve the problem rigorously.

## Method
1. Restate what is asked and list the given quantities.
2. Work step by step. Each entry of `reasoning` is one step.
3. Check edge cases and verify the result by substitution or an independent method.
4. Put only the final result in `answer` (a number, expression or short phrase).

Set `confidence` in [0, 1] to reflect how sure you are after verification.";

pub const LOGIC_SOLVER_PREAMBLE: &str = "\
You are an expert at logic puzzles and lateral thinking. Solve the problem.

## Method
1. Identify every constraint, including ones implied by wording.
2. Enumerate cases systematically. Each entry of `reasoning` is one deduction.
3. Challenge the obvious reading of the question before committing.
4. Put only the final conclusion in `answer`.

Set `confidence` in [0, 1].";

pub const PHYSICS_SOLVER_PREAMBLE: &str = "\
You are a physicist. Solve the problem from first principles.

## Method
1. Name the governing laws and state assumptions explicitly.
2. Derive symbolically before substituting numbers. Each entry of `reasoning` is one step.
3. Check units and limiting cases.
4. Put the final value with units in `answer`.

Set `confidence` in [0, 1].";

pub const CODE_SOLVER_PREAMBLE: &str = "\
You are a senior software engineer. Solve the programming problem.

## Method
1. Clarify inputs, outputs and constraints.
2. Describe the algorithm and its complexity. Each entry of `reasoning` is one step.
3. Trace the algorithm on the examples given, and on one edge case.
4. Put the final result (output value, or the code if code is asked for) in `answer`.

Set `confidence` in [0, 1].";

pub const GENERAL_SOLVER_PREAMBLE: &str = "\
You are a rigorous analytical problem solver. Solve the problem.

## Method
1. Restate the question precisely.
2. Reason step by step. Each entry of `reasoning` is one step.
3. Look for a reason your answer could be wrong and address it.
4. Put only the final answer in `answer`.

Set `confidence` in [0, 1].";

pub const PEER_REVIEW_PREAMBLE: &str = "\
You are reviewing a peer's solution to a problem you have also solved. Your job is \
to find real errors, not to restate the solution.

## Review rules
- Check every step. Record concrete problems in `evaluation.issues` with the step \
  they occur in, a `kind`, and a `severity` (minor, major, critical).
- List genuine strengths and weaknesses; keep each entry to one sentence.
- `suggested_changes` must be actionable.
- `overall_assessment` is one of: correct, mostly_correct, promising_but_flawed, incorrect.
- `recommendation` is `accept` only when the final answer is right and the reasoning holds.

Set `confidence` in [0, 1] for how sure you are of your review.";

pub const REFINEMENT_PREAMBLE: &str = "\
You previously solved a problem and your peers have reviewed your solution. \
Produce an improved solution.

## Rules
- Address every issue raised. If you disagree with a reviewer, say why in `change_rationale`.
- Change the final answer only if the reviews convinced you it was wrong.
- `reasoning` is the complete corrected derivation, not a diff.
- `change_rationale` summarises what changed and why (or why nothing changed).

Set `confidence` in [0, 1].";

pub const JUDGE_PREAMBLE: &str = "\
You are the judge of a problem-solving debate. You did not solve the problem \
yourself. You receive each solver's original solution, the peer reviews, and each \
solver's refined solution.

## Judging rules
- Verify the refined solutions independently; do not count votes.
- Weigh reviewer criticism by whether it is correct, not by how confident it sounds.
- `winner` must be exactly one of the solver ids listed in the prompt.
- `final_answer` is the answer you endorse, normally the winner's refined answer.
- `justification` explains the decision in a short paragraph.

Set `confidence` in [0, 1].";

pub const ANSWER_CHECK_PREAMBLE: &str = "\
You grade answers against a reference. Decide whether the candidate answer is \
equivalent to the reference answer for the problem shown. Accept different but \
equivalent forms (2/4 vs 0.5, reordered lists, units spelled out). Reject answers \
that are only partially correct. Reply with `is_correct` as true or false.";

/// Solver preamble for a problem category.
pub fn solver_preamble(profile: PromptProfile) -> &'static str {
    match profile {
        PromptProfile::Math => MATH_SOLVER_PREAMBLE,
        PromptProfile::Logic => LOGIC_SOLVER_PREAMBLE,
        PromptProfile::Physics => PHYSICS_SOLVER_PREAMBLE,
        PromptProfile::Code => CODE_SOLVER_PREAMBLE,
        PromptProfile::General => GENERAL_SOLVER_PREAMBLE,
    }
}

/// Full system prompt for one call.
pub fn preamble_for(role: AgentRole, request: &StageRequest) -> String {
    let body = match request {
        StageRequest::RoleAssessment { .. } => ROLE_ASSESSMENT_PREAMBLE,
        StageRequest::Solve { profile, .. } => solver_preamble(*profile),
        StageRequest::Review { .. } => PEER_REVIEW_PREAMBLE,
        StageRequest::Refine { .. } => REFINEMENT_PREAMBLE,
        StageRequest::Judge { .. } => JUDGE_PREAMBLE,
        StageRequest::AnswerCheck { .. } => ANSWER_CHECK_PREAMBLE,
    };
    format!("{body}\n\nYour role in this call: {role}.\n\n{JSON_ONLY}")
}

fn push_problem(out: &mut String, request: &StageRequest) {
    let problem = request.problem();
    let _ = writeln!(out, "## Problem `{}` ({})", problem.id, problem.category);
    out.push_str(problem.statement.trim());
    out.push_str("\n\n");
}

fn push_solution(out: &mut String, heading: &str, solution: &ProblemSolution) {
    let _ = writeln!(out, "### {heading}");
    let _ = writeln!(out, "Confidence: {:.2}", solution.confidence);
    for (i, step) in solution.reasoning.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, step);
    }
    let _ = writeln!(out, "**Answer:** {}\n", solution.answer.trim());
}

fn push_review(out: &mut String, review: &ProblemSolutionReview) {
    let _ = writeln!(
        out,
        "### Review by {} ({:?}, recommends {}, confidence {:.2})",
        review.reviewer_id, review.overall_assessment, review.recommendation, review.confidence
    );
    let _ = writeln!(out, "{}", review.critique.trim());
    for issue in &review.evaluation.issues {
        let _ = writeln!(
            out,
            "- [{:?}/{:?}] {}: {}",
            issue.severity, issue.kind, issue.location, issue.description
        );
    }
    for change in &review.evaluation.suggested_changes {
        let _ = writeln!(out, "- Suggested: {change}");
    }
    out.push('\n');
}

fn push_refinement(out: &mut String, refinement: &RefinedProblemSolution) {
    let _ = writeln!(out, "### Refined solution from {}", refinement.solver_id);
    let _ = writeln!(
        out,
        "Confidence: {:.2} | answer changed: {}",
        refinement.confidence, refinement.answer_changed
    );
    for (i, step) in refinement.reasoning.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, step);
    }
    let _ = writeln!(out, "Change rationale: {}", refinement.change_rationale.trim());
    let _ = writeln!(out, "**Answer:** {}\n", refinement.answer.trim());
}

/// Render the user prompt for `request`.
pub fn user_prompt(request: &StageRequest) -> String {
    let mut out = String::new();
    push_problem(&mut out, request);

    match request {
        StageRequest::RoleAssessment { .. } => {
            out.push_str("Rate your suitability for the solver and judge roles.\n");
        }
        StageRequest::Solve { .. } => {
            out.push_str("Solve the problem.\n");
        }
        StageRequest::Review { subject, .. } => {
            push_solution(&mut out, &format!("Solution by {}", subject.solver_id), subject);
            out.push_str("Review this solution.\n");
        }
        StageRequest::Refine {
            original, reviews, ..
        } => {
            push_solution(&mut out, "Your original solution", original);
            out.push_str("## Reviews of your solution\n\n");
            for review in reviews {
                push_review(&mut out, review);
            }
            out.push_str("Produce your refined solution.\n");
        }
        StageRequest::Judge {
            solutions,
            reviews,
            refinements,
            ..
        } => {
            out.push_str("## Original solutions\n\n");
            for solution in solutions {
                push_solution(&mut out, &format!("Solution by {}", solution.solver_id), solution);
            }
            out.push_str("## Peer reviews\n\n");
            for review in reviews {
                let _ = writeln!(out, "(review of {})", review.subject_id);
                push_review(&mut out, review);
            }
            out.push_str("## Refined solutions\n\n");
            for refinement in refinements {
                push_refinement(&mut out, refinement);
            }
            let ids: Vec<&str> = solutions.iter().map(|s| s.solver_id.as_str()).collect();
            let _ = writeln!(out, "Valid winner ids: {}", ids.join(", "));
            out.push_str("Pick the winner.\n");
        }
        StageRequest::AnswerCheck {
            problem,
            candidate_answer,
        } => {
            let reference = problem.ground_truth.as_deref().unwrap_or("");
            let _ = writeln!(out, "Reference answer: {}", reference.trim());
            let _ = writeln!(out, "Candidate answer: {}", candidate_answer.trim());
        }
    }
    out
}
