//! GemMunch CLI
//!
//! Drives the on-device inference runtime from the command line: hardware
//! probing, warm-up with a metrics report, model switching and one-shot
//! generation.

#![allow(clippy::print_stdout)]

mod runtime;

use std::path::PathBuf;
use std::time::Duration;

use ai_runtime::{InferenceSession, SessionInput};
use anyhow::Context;
use clap::{Parser, Subcommand};
use domain::ModelKey;
use tracing::warn;

use crate::runtime::{Runtime, build_selector, load_config};

/// GemMunch CLI
#[derive(Debug, Parser)]
#[command(name = "gemmunch")]
#[command(author, version, about = "GemMunch on-device inference runtime", long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (defaults to ./gemmunch.toml when present)
    #[arg(short, long, env = "GEMMUNCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the hardware profile and the backend chosen for a model
    Probe {
        /// Model key (defaults to the persisted selection)
        model: Option<ModelKey>,

        /// Skip the hardware validator
        #[arg(long)]
        heuristic: bool,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize the engine, wait for the session pool and print the metrics report
    Warmup {
        /// Seconds to wait for the pool to fill
        #[arg(long, default_value = "120")]
        timeout_secs: u64,
    },

    /// Switch to another model and persist the selection
    Switch {
        /// Model key, e.g. E2B or E4B
        model: ModelKey,
    },

    /// Run one inference on the selected model
    Generate {
        /// Prompt text
        prompt: String,

        /// Image to attach (repeatable)
        #[arg(short, long)]
        image: Vec<PathBuf>,
    },

    /// Check the inference daemon and list its models
    Daemon,

    /// Print the effective configuration as TOML
    Config,
}

/// Determine log filter level from verbosity count
const fn log_filter_from_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    // -v flags replace the configured filter; RUST_LOG beats both
    let telemetry = if cli.verbose > 0 {
        config
            .telemetry
            .clone()
            .with_filter(log_filter_from_verbosity(cli.verbose))
    } else {
        config.telemetry.clone()
    };
    infrastructure::init_tracing(&telemetry)?;

    match cli.command {
        Commands::Probe {
            model,
            heuristic,
            json,
        } => {
            let runtime = Runtime::build(&config)?;
            let key = model.unwrap_or_else(|| runtime.selected_model());
            let file = runtime.model_file(&key)?;

            let selector = build_selector(&config)?;
            let decision = if heuristic {
                selector.heuristic(file.path()).await
            } else {
                selector.select(file.path()).await
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&decision)?);
            } else {
                println!("🔍 Model: {key} ({})", file.path().display());
                println!("   Device: {}", decision.hardware_profile());
                println!(
                    "   NPU class: {}",
                    selector.is_npu_class(decision.hardware_profile())
                );
                println!("   Backend: {decision}");
            }
            runtime.manager.destroy().await;
        },

        Commands::Warmup { timeout_secs } => {
            let runtime = Runtime::build(&config)?;
            let decision = runtime.manager.initialize(&runtime.files).await?;
            println!("🚀 Engine ready on {decision}");

            let timeout = Duration::from_secs(timeout_secs);
            if !runtime.manager.wait_until_prewarmed(timeout).await {
                warn!(timeout_secs, "Session pool did not fill in time");
                println!("⚠️  Pool not full after {timeout_secs}s");
            }

            println!("\n{}", runtime.manager.metrics().report());
            if let Some(stats) = runtime.manager.pool_stats() {
                println!(
                    "📦 Pool: {} ready, {} failed constructions",
                    runtime.manager.pool_len(),
                    stats.construction_failures
                );
            }
            runtime.manager.destroy().await;
        },

        Commands::Switch { model } => {
            let runtime = Runtime::build(&config)?;
            runtime.manager.initialize(&runtime.files).await?;
            let decision = runtime.manager.switch_model(model.clone(), &runtime.files).await?;

            println!("🔁 Switched to {model} on {decision}");
            println!("\n{}", runtime.manager.metrics().report());
            runtime.manager.destroy().await;
        },

        Commands::Generate { prompt, image } => {
            let mut input = SessionInput::text(prompt);
            for path in &image {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read image {}", path.display()))?;
                input = input.with_image(bytes);
            }

            let runtime = Runtime::build(&config)?;
            runtime.manager.initialize(&runtime.files).await?;

            let mut session = runtime.manager.take().await?;
            let result = session.generate(&input).await;
            session.close();
            runtime.manager.destroy().await;

            println!("{}", result?);
        },

        Commands::Daemon => {
            let runtime = Runtime::build(&config)?;
            let healthy = runtime.loader.health_check().await.unwrap_or(false);
            if healthy {
                println!("✅ Daemon reachable at {}", config.ollama.base_url);
                for name in runtime.loader.list_models().await? {
                    println!("   📦 {name}");
                }
            } else {
                println!("❌ Daemon not reachable at {}", config.ollama.base_url);
            }
            runtime.manager.destroy().await;
            if !healthy {
                std::process::exit(1);
            }
        },

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        },
    }

    Ok(())
}
