//! CLI entrypoint for Conclave.
//!
//! Runs consensus sessions from the terminal and validates configuration
//! files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conclave_core::{ProviderId, Session};
use conclave_runtime::providers::ApiCredential;
use conclave_runtime::{Orchestrator, ProviderSettings, ProvidersConfig, RuntimeConfig};

/// Hosted providers enabled from their default key variables when the
/// configuration names none.
const ENV_PROVIDERS: [ProviderId; 2] = [ProviderId::Anthropic, ProviderId::OpenAi];

#[derive(Parser, Debug)]
#[command(
    name = "conclave",
    author,
    version,
    about = "Multi-role consensus sessions over LLM providers",
    long_about = "Conclave asks an Architect, a Catalyst, a Synthesizer and an Evaluator to \
                  work on a problem in rounds, until their answers converge or the iteration \
                  budget runs out.\n\n\
                  Without --config, providers are enabled from ANTHROPIC_API_KEY and \
                  OPENAI_API_KEY."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a consensus session on a problem
    Solve {
        /// The problem statement
        problem: String,

        /// Path to a YAML configuration file
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Override the iteration budget
        #[arg(long, value_name = "N")]
        max_iterations: Option<u32>,

        /// Print the full session as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a configuration file
    Check {
        /// Path to the YAML file
        file: PathBuf,
    },

    /// Print the default configuration as YAML
    Defaults,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Solve {
            problem,
            config,
            max_iterations,
            json,
        } => solve(&problem, config.as_deref(), max_iterations, json).await,
        Command::Config { command } => match command {
            ConfigCommand::Check { file } => check_config(&file),
            ConfigCommand::Defaults => {
                let yaml = RuntimeConfig::default()
                    .to_yaml()
                    .context("Failed to render default configuration")?;
                print!("{yaml}");
                Ok(())
            }
        },
    }
}

async fn solve(
    problem: &str,
    config_path: Option<&Path>,
    max_iterations: Option<u32>,
    json: bool,
) -> Result<()> {
    if problem.trim().is_empty() {
        anyhow::bail!("Problem statement is empty");
    }

    let mut config = match config_path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(n) = max_iterations {
        config.consensus.max_iterations = n;
    }
    if config.providers.configured().is_empty() {
        enable_env_providers(&mut config.providers);
    }

    let orchestrator = Orchestrator::builder()
        .config(config)
        .build()
        .context("Failed to start session")?;
    info!(providers = ?orchestrator.providers().ids(), "session starting");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current round");
            on_signal.cancel();
        }
    });

    let session = orchestrator
        .solve_problem(problem, &cancel)
        .await
        .context("Session failed")?;

    if json {
        let output = serde_json::to_string_pretty(&session).context("Failed to encode session")?;
        println!("{output}");
    } else {
        print_summary(&session);
    }
    Ok(())
}

fn enable_env_providers(providers: &mut ProvidersConfig) {
    let settings = ProviderSettings::default();
    for id in ENV_PROVIDERS {
        if !ApiCredential::is_configured(id, &settings) {
            continue;
        }
        let slot = match id {
            ProviderId::Anthropic => &mut providers.anthropic,
            _ => &mut providers.openai,
        };
        *slot = Some(settings.clone());
        info!(provider = %id, "enabled from environment");
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = RuntimeConfig::from_yaml_file(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    println!("{}: ok", path.display());
    println!("  max iterations: {}", config.consensus.max_iterations);
    println!("  roles:          {}", config.consensus.roles.len());
    let providers = config.providers.configured();
    if providers.is_empty() {
        println!("  providers:      none (environment keys will be used)");
    } else {
        let names: Vec<String> = providers.iter().map(ToString::to_string).collect();
        println!("  providers:      {}", names.join(", "));
    }
    Ok(())
}

fn print_summary(session: &Session) {
    println!("Status:     {:?}", session.status);
    println!("Iterations: {}", session.iterations.len());

    for iteration in &session.iterations {
        let marker = if iteration.breakthrough { " (breakthrough)" } else { "" };
        println!(
            "  #{:<2} quality {:>4.1}  consensus {:.2}  novelty {:.2}  fallbacks {}{}",
            iteration.number,
            iteration.metrics.quality,
            iteration.metrics.consensus,
            iteration.metrics.novelty,
            iteration.fallback_count(),
            marker
        );
    }

    if let Some(solution) = &session.solution {
        println!();
        println!(
            "Solution (iteration {}, quality {:.1}, consensus {:.2}, confidence {:.2}):",
            solution.iteration, solution.quality, solution.consensus, solution.confidence
        );
        println!();
        println!("{}", solution.content.trim());
    }

    let metrics = &session.metrics;
    println!();
    println!(
        "Time {:.1}s | breakthroughs {} | efficiency {:.2} | fallbacks {} | cached {}",
        metrics.total_time_ms as f64 / 1000.0,
        metrics.breakthroughs,
        metrics.efficiency,
        metrics.fallback_contributions,
        metrics.cached_contributions
    );
    println!(
        "Tokens {} in / {} out | est. cost ${:.4}",
        metrics.prompt_tokens, metrics.completion_tokens, metrics.estimated_cost
    );
}
