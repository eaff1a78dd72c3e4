use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use debate_agents::cli::{Cli, Command, RunArgs};
use debate_agents::config::{check_endpoint, DebateConfig};
use debate_agents::dataset::{JsonProblemSource, ProblemSource};
use debate_agents::providers::ProviderFactory;
use debate_agents::runner::DebateRunner;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let mut config = DebateConfig::load(cli.config.as_deref())?;
    let command = cli.command();
    if let Command::Run(args) = &command {
        args.apply_to(&mut config);
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    match command {
        Command::Agents => {
            for agent in &config.agents {
                println!(
                    "{:<16} {:<7} {:<32} t={:.2} top_p={:.2} {}",
                    agent.id.as_str(),
                    agent.provider.to_string(),
                    agent.model,
                    agent.temperature,
                    agent.top_p,
                    agent.base_url.as_deref().unwrap_or("-"),
                );
            }
            if let Some(grader) = &config.grader {
                println!("grader: {} ({}, {})", grader.id, grader.provider, grader.model);
            }
            Ok(())
        }
        Command::CheckEndpoints => {
            let mut down = 0;
            for url in config.openai_endpoints() {
                let up = check_endpoint(&url).await;
                println!("{} {url}", if up { "UP  " } else { "DOWN" });
                down += usize::from(!up);
            }
            anyhow::ensure!(down == 0, "{down} endpoint(s) unreachable");
            Ok(())
        }
        Command::Run(args) => run(config, args).await,
    }
}

async fn run(config: DebateConfig, args: RunArgs) -> Result<()> {
    let dataset = config
        .run
        .dataset
        .clone()
        .context("No dataset: set run.dataset, DEBATE_DATASET or --dataset")?;
    let problems = JsonProblemSource::new(dataset)
        .window(config.run.skip, config.run.take)
        .load_problems()?;

    info!(
        problems = problems.len(),
        agents = config.agents.len(),
        max_concurrent = config.run.max_concurrent,
        "Debate runner starting"
    );

    let factory = Arc::new(ProviderFactory::new(config.run.malformed_retries));
    let runner = DebateRunner::new(config, factory);

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let output = runner.run(problems, args.grade).await?;
    println!("{}", output.report.summary_line());
    if let Some(grading) = &output.summary.grading {
        println!(
            "graded {} | final accuracy {:.1}% | refinement accuracy {:.1}%",
            grading.graded_sessions,
            grading.final_accuracy * 100.0,
            grading.refinement_accuracy * 100.0,
        );
    }

    let failed = output.report.failed_problem_ids();
    if !failed.is_empty() {
        eprintln!("failed problems: {}", failed.join(","));
        anyhow::bail!("{} of {} sessions failed", failed.len(), output.report.results.len());
    }
    Ok(())
}
