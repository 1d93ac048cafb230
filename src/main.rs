use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rulegate_cli::cli::{
    cmd_check, cmd_rules, cmd_simulate, init_logging, load_rules, CheckArgs, OutputFormat,
    SimulateArgs,
};

#[derive(Parser)]
#[command(name = "rulegate")]
#[command(about = "Query rule actions with per-rule concurrency control")]
#[command(version)]
struct Cli {
    /// Rules file (falls back to $RULEGATE_RULES, then config/rules.yaml)
    #[arg(short, long, global = true)]
    rules: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate params for an action kind
    Check(CheckArgs),

    /// List the loaded rules and their limits
    Rules,

    /// Drive concurrent callers through a rule's action
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug)?;

    match cli.command {
        Commands::Check(args) => cmd_check(args, cli.output).await,
        Commands::Rules => {
            let loaded = load_rules(cli.rules.as_ref())?;
            cmd_rules(loaded, cli.output).await
        }
        Commands::Simulate(args) => {
            let loaded = load_rules(cli.rules.as_ref())?;
            cmd_simulate(args, loaded, cli.output).await
        }
    }
}
