//! Extract the JSON document from a model reply and decode it into a stage output.
//!
//! Models that are asked for bare JSON still wrap it in code fences, prefix it
//! with a sentence, or emit a `<think>` block first. After reasoning blocks
//! are stripped, the first candidate that parses as a JSON object wins:
//! 1. the whole remaining reply
//! 2. its outermost `{ ... }` span
//! 3. each fenced block's outermost span
//!
//! Fences are tried last because a valid object may carry fenced code inside
//! its string fields.

use std::sync::LazyLock;

use coordination::debate::{CapabilityError, Stage, StageOutput};
use regex::Regex;

static THINK_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>.*?</think>").expect("THINK_BLOCK_RE regex should compile")
});

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").expect("FENCE_RE regex should compile")
});

fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn is_json_object(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text).is_ok_and(|v| v.is_object())
}

/// Best-effort JSON object text inside `reply`. `None` when no object is present.
///
/// When no candidate parses, the first fenced span (else the outermost span)
/// is returned so the decode error shows what the model sent.
pub fn extract_json(reply: &str) -> Option<&str> {
    let stripped_start = THINK_BLOCK_RE
        .find_iter(reply)
        .last()
        .map(|m| m.end())
        .unwrap_or(0);
    let reply = reply[stripped_start..].trim();
    if is_json_object(reply) {
        return Some(reply);
    }

    let outer = object_span(reply);
    let fenced: Vec<&str> = FENCE_RE
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .filter_map(|m| object_span(m.as_str()))
        .collect();

    outer
        .into_iter()
        .chain(fenced.iter().copied())
        .find(|candidate| is_json_object(candidate))
        .or_else(|| fenced.first().copied())
        .or(outer)
}

/// Decode a raw model reply into the validated output for `stage`.
pub fn decode(stage: Stage, reply: &str) -> Result<StageOutput, CapabilityError> {
    let json = extract_json(reply).ok_or_else(|| {
        let preview: String = reply.chars().take(120).collect();
        CapabilityError::malformed(format!("{stage} output: no JSON object in reply: {preview:?}"))
    })?;
    StageOutput::from_json(stage, json)
}
