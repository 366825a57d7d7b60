// src/main.rs — Crucible entry point

use clap::{Parser, Subcommand};
use std::sync::Arc;

use crucible::core::agent::{Agent, AgentResponse, CoreServices};
use crucible::infra::config::Config;
use crucible::infra::logger;
use crucible::provider::ollama::OllamaBackend;
use crucible::router::neural::NeuralRouter;

// Exit codes: 0 success, 1 tool failure, 2 validation failure (no passing
// candidate), 3 unrecoverable error.
const EXIT_TOOL_FAILURE: i32 = 1;
const EXIT_VALIDATION_FAILURE: i32 = 2;
const EXIT_UNRECOVERABLE: i32 = 3;

#[derive(Parser)]
#[command(name = "crucible", version, about = "Local code-generation agent with tiered routing, multi-candidate validation, and self-correction")]
struct Cli {
    /// Path to a config.toml (defaults to ~/.crucible/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a query and either print the tool intent or generate code
    Process {
        /// The natural-language request
        query: String,
        /// Print the full outcome record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show learning analytics from recorded outcomes
    Stats,
    /// Retrain the neural router from recorded corrections
    Learn,
    /// Delete outcome records older than the configured TTL
    Cleanup,
}

#[tokio::main]
async fn main() {
    logger::init_logging("info");

    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_UNRECOVERABLE);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        let mut c = Config::load_from(std::path::Path::new(path))?;
        c.clamp();
        c
    } else {
        Config::load()?
    };

    let backend = Arc::new(OllamaBackend::new(
        Some(config.models.base_url.clone()),
        Some(config.models.embedder.clone()),
    ));
    let services = Arc::new(CoreServices::bootstrap(config, backend.clone())?);

    match cli.command {
        Commands::Process { query, json } => {
            let agent = Agent::new(services).await;
            match agent.process(&query).await {
                Ok(AgentResponse::ToolCall(routed)) => {
                    println!("tool: {} (via {}, confidence {:.2})", routed.tool, routed.method.as_str(), routed.confidence);
                    let mut keys: Vec<&String> = routed.params.keys().collect();
                    keys.sort();
                    for key in keys {
                        println!("  {} = {}", key, routed.params[key]);
                    }
                    Ok(0)
                }
                Ok(AgentResponse::Generated {
                    code,
                    context,
                    correction,
                    record,
                }) => {
                    if json {
                        println!(
                            "{}",
                            serde_json::json!({
                                "code": code,
                                "context": context.summary(),
                                "correction": correction.summary(),
                                "record": record,
                            })
                        );
                    } else {
                        println!("{}", code);
                        eprintln!(
                            "-- {} | {} | score {:.2} | {} iteration(s) | all passed: {}",
                            context.task_type,
                            context.validation_profile,
                            correction.best_score,
                            correction.total_iterations,
                            correction.all_passed,
                        );
                    }
                    if correction.all_passed {
                        Ok(0)
                    } else {
                        Ok(EXIT_VALIDATION_FAILURE)
                    }
                }
                Ok(AgentResponse::NoCandidate { record }) => {
                    eprintln!("no candidate survived generation (recorded {})", record.query_hash);
                    Ok(EXIT_VALIDATION_FAILURE)
                }
                Err(e) if e.is_candidate_local() => {
                    eprintln!("tool failure: {e}");
                    Ok(EXIT_TOOL_FAILURE)
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    Ok(EXIT_UNRECOVERABLE)
                }
            }
        }
        Commands::Stats => {
            let summary = services.tracker.get_learning_summary()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            let strategy_stats = services.strategy.lock().expect("strategy lock").get_stats();
            println!("{}", serde_json::to_string_pretty(&strategy_stats)?);
            Ok(0)
        }
        Commands::Learn => {
            let neural = NeuralRouter::build(
                backend,
                Some(&crucible::infra::paths::neural_learning_db_path()),
                services.config.neural.top_k,
            )
            .await?;
            let added = neural.retrain_from_history().await?;
            println!("retrained with {added} new example(s)");
            Ok(0)
        }
        Commands::Cleanup => {
            let deleted = services.tracker.cleanup_old(None)?;
            println!("deleted {deleted} outcome record(s)");
            Ok(0)
        }
    }
}
