use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use colored::Colorize;
use futures_util::future::join_all;
use scenario::{providers::openai::OpenAI, LLMProvider, RunError, ScenarioDefinition, ScenarioResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scenario-run")]
#[command(about = "Run scenario tests against an LLM-backed agent")]
struct Args {
    /// Path to a scenario file or a directory of scenario files
    #[arg(short, long)]
    scenarios: PathBuf,

    /// Model used by the testing agent and by agents that don't name one
    #[arg(short, long, default_value = "gpt-4o-mini")]
    model: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let definitions = ScenarioDefinition::load(&args.scenarios)?;
    let provider: Arc<dyn LLMProvider> = Arc::new(OpenAI::from_env()?);

    let runs = definitions.iter().map(|definition| {
        let mut scenario = definition.build(provider.clone(), &args.model);
        async move { (definition.name.as_str(), scenario.run().await) }
    });
    let outcomes: Vec<(&str, Result<ScenarioResult, RunError>)> = join_all(runs).await;

    let total = outcomes.len();
    let mut passed = 0;
    for (name, outcome) in &outcomes {
        match outcome {
            Ok(result) if result.success => {
                passed += 1;
                println!("{} {} ({:.1?})", "PASS".green().bold(), name, result.total_duration);
            }
            Ok(result) => {
                println!("{} {}", "FAIL".red().bold(), name);
                println!("  {}", result.reasoning);
                for criterion in &result.unmet_criteria {
                    println!("  - unmet: {criterion}");
                }
                for failure in &result.triggered_failures {
                    println!("  - triggered: {failure}");
                }
                result.log_details();
            }
            Err(error) => {
                println!("{} {}: {}", "ERROR".red().bold(), name, error);
                error.partial().log_details();
            }
        }
    }

    println!("Total: {}, Passed: {}", total, passed);

    if passed == total {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
