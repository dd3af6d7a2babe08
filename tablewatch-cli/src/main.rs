use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "tablewatch", about = "Self-monitoring for multiplayer card-game servers")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor over a JSON-lines event feed
    Run(commands::run::RunArgs),
    /// Show learning confidence from persisted state
    Confidence(commands::confidence::ConfidenceArgs),
    /// Check two versions of a test file for masking
    Masking(commands::masking::MaskingArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Confidence(args) => commands::confidence::run(args).await,
        Commands::Masking(args) => commands::masking::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
