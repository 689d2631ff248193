mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "minidp", version, about = "Recipe-driven JSONL record pipeline engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recipe
    Run {
        /// Path to recipe JSON file
        recipe: PathBuf,
        /// Override the recipe's workspace directory
        #[arg(short = 'w', long)]
        workspace: Option<PathBuf>,
        /// Keep temporary inter-step manifests
        #[arg(long)]
        keep_temps: bool,
    },
    /// Run a recipe and show the first records of its output
    Preview {
        /// Path to recipe JSON file
        recipe: PathBuf,
        /// Number of records to show
        #[arg(short, default_value_t = 5)]
        n: usize,
        /// Override the recipe's workspace directory
        #[arg(short = 'w', long)]
        workspace: Option<PathBuf>,
    },
    /// Validate a recipe file
    Validate {
        /// Path to recipe JSON file
        recipe: PathBuf,
    },
    /// List available processors
    ListProcessors,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            recipe,
            workspace,
            keep_temps,
        } => commands::run::execute(&recipe, workspace, keep_temps),
        Commands::Preview {
            recipe,
            n,
            workspace,
        } => commands::preview::execute(&recipe, n, workspace),
        Commands::Validate { recipe } => commands::validate::execute(&recipe),
        Commands::ListProcessors => commands::processors::execute(),
    }
}
