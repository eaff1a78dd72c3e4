//! Providers, sinks, and the command-line runner for the debate pipeline.
//!
//! The pipeline itself lives in `coordination::debate`. This crate supplies
//! the concrete pieces a real run needs:
//!
//! - [`providers`]: rig-core (OpenAI-compatible) and Gemini REST capabilities
//! - [`prompts`] and [`structured`]: prompt rendering and reply decoding
//! - [`dataset`]: problem loading
//! - [`sinks`]: JSONL, Postgres and snapshot persistence
//! - [`config`], [`cli`], [`runner`], [`telemetry`]

pub mod cli;
pub mod config;
pub mod dataset;
pub mod prompts;
pub mod providers;
pub mod runner;
pub mod sinks;
pub mod structured;
pub mod telemetry;
