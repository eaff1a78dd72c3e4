//! Command-line interface. Flags override config file and environment values.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DebateConfig, StoreBackend};

#[derive(Parser, Debug)]
#[command(author, version, about = "Staged multi-agent debate runner", long_about = None)]
pub struct Cli {
    /// TOML config file.
    #[arg(long, global = true, env = "DEBATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the debate over a dataset (default).
    Run(RunArgs),
    /// Print the resolved agent pool and exit.
    Agents,
    /// Probe every OpenAI-compatible endpoint in the pool.
    CheckEndpoints,
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Problem dataset (JSON array or .jsonl).
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Sessions to run at once.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Problems to skip from the start of the dataset.
    #[arg(long)]
    pub skip: Option<usize>,

    /// Problems to run after skipping.
    #[arg(long)]
    pub take: Option<usize>,

    /// Keep documents in memory only (snapshots are still written).
    #[arg(long, default_value_t = false)]
    pub dry_store: bool,

    /// Grade answers with the configured grader after the run.
    #[arg(long, default_value_t = false)]
    pub grade: bool,

    #[arg(long)]
    pub run_id: Option<String>,
}

impl RunArgs {
    /// Apply flag overrides onto a loaded config.
    pub fn apply_to(&self, config: &mut DebateConfig) {
        if let Some(dataset) = &self.dataset {
            config.run.dataset = Some(dataset.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.run.output_dir = dir.clone();
        }
        if let Some(n) = self.max_concurrent {
            config.run.max_concurrent = n;
        }
        if let Some(skip) = self.skip {
            config.run.skip = skip;
        }
        if self.take.is_some() {
            config.run.take = self.take;
        }
        if self.dry_store {
            config.store.backend = StoreBackend::Memory;
        }
        if let Some(run_id) = &self.run_id {
            config.run.run_id = Some(run_id.clone());
        }
    }
}

impl Cli {
    /// The subcommand to run, defaulting to `run` with no overrides.
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Run(RunArgs::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_local_pool, RunSettings, StoreSettings};

    fn config() -> DebateConfig {
        DebateConfig {
            run: RunSettings::default(),
            store: StoreSettings::default(),
            agents: default_local_pool(|_: &str| None),
            grader: None,
        }
    }

    #[test]
    fn run_flags_override_config() {
        let cli = Cli::parse_from([
            "debate-agents",
            "run",
            "--dataset",
            "d.json",
            "--max-concurrent",
            "2",
            "--take",
            "5",
            "--dry-store",
            "--grade",
        ]);
        let Command::Run(args) = cli.command() else {
            panic!("expected run");
        };
        assert!(args.grade);

        let mut config = config();
        args.apply_to(&mut config);
        assert_eq!(config.run.dataset, Some(PathBuf::from("d.json")));
        assert_eq!(config.run.max_concurrent, 2);
        assert_eq!(config.run.take, Some(5));
        assert_eq!(config.run.skip, 0);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn bare_invocation_defaults_to_run() {
        let cli = Cli::parse_from(["debate-agents", "--json-logs"]);
        assert!(cli.json_logs);
        assert!(matches!(cli.command(), Command::Run(_)));
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::parse_from(["debate-agents", "agents", "--config", "debate.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("debate.toml")));
        assert!(matches!(cli.command(), Command::Agents));
    }
}
