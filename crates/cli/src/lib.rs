pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "globaliq",
    about = "GlobalIQ operator CLI",
    long_about = "Inspect GlobalIQ configuration, check downstream readiness, and dry-run routing.",
    after_help = "Examples:\n  globaliq doctor --json\n  globaliq config\n  globaliq route what are the visa rules for Germany"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, endpoint allow-list, LLM client, and service liveness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show which route the keyword fast path picks for an utterance")]
    Route {
        #[arg(required = true, num_args = 1.., help = "Utterance to route")]
        text: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            let (exit_code, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code, output }
        }
        Command::Route { text } => commands::route::run(&text.join(" ")),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
