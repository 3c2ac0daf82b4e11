//! # widgetbench CLI
//!
//! Command-line interface for driving widget preview sessions without a
//! live backend.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "widgetbench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults to widgetbench.yml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the globals snapshot the widget would receive
    Globals {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run one simulated tool call through a preview session
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run a scripted list of widget interactions
    Scenario {
        /// Scenario file (YAML)
        file: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::WARN.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Globals { json } => commands::show_globals(&config, json),
        Commands::Call { tool, args, json } => commands::call_tool(&config, &tool, &args, json).await,
        Commands::Scenario { file, json } => commands::run_scenario(&config, &file, json).await,
    }
}
