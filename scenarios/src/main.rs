mod case;
mod cli;
mod config;
mod judge;
mod outcome;
mod report;
mod run;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::outcome::Outcome;

#[derive(Parser)]
#[command(name = "scenarios", version, about = "Scripted dispatch scenarios for the rule engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    /// Run one case, or all of them when no id is given.
    Run {
        case_id: Option<String>,
    },
    Report,
}

fn main() -> Result<ExitCode> {
    actions::logging::init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::List => cli::list_cases(&repo_root)?,
        Command::Run { case_id } => {
            let outcome = cli::run_cases(&repo_root, case_id.as_deref())?;
            if outcome != Outcome::Success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Report => cli::report_cases(&repo_root)?,
    }
    Ok(ExitCode::SUCCESS)
}
