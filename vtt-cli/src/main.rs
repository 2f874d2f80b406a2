use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "vtt", about = "Visual Turing test study tools")]
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
    /// Compare two raters' rating logs
    Agreement(commands::agreement::AgreementArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Summarise a result log
    Report(commands::report::ReportArgs),
    /// Draw an evaluation sequence without starting a session
    Sample(commands::sample::SampleArgs),
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
        Commands::Agreement(args) => commands::agreement::run(args).await,
        Commands::Config(args) => commands::config::run(args),
        Commands::Report(args) => commands::report::run(args).await,
        Commands::Sample(args) => commands::sample::run(args).await,
    }
}
