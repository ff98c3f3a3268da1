//! rstchart - Statechart interpreter
//!
//! Loads a chart document and drives it from the command line, either with a
//! fixed list of events or interactively.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rstchart_core::ExecutorConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rstchart")]
#[command(about = "Run statechart documents")]
#[command(version)]
struct Cli {
    /// Executor configuration file (YAML)
    #[arg(short, long, global = true, env = "RSTCHART_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a chart document
    Check {
        /// Chart document (.json, .yaml or .yml)
        document: PathBuf,
    },

    /// Start a chart and submit events in order
    Run {
        /// Chart document (.json, .yaml or .yml)
        document: PathBuf,

        /// Event to submit, as `name` or `name=<json payload>` (repeatable)
        #[arg(short, long = "event")]
        events: Vec<String>,
    },

    /// Start a chart and drive it interactively
    Repl {
        /// Chart document (.json, .yaml or .yml)
        document: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ExecutorConfig::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Config error".red(), e);
        e
    })?;

    match cli.command {
        Commands::Repl { document } => repl::run(&document, config)?,
        command => match commands::execute(command, config) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
