//! CLI module for Pacer
//!
//! Provides commands:
//! - `run`: Run a full session from configuration
//! - `schedule`: Parse and print a custom event schedule

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod run;
pub mod schedule;

/// Pacer CLI
#[derive(Parser, Debug)]
#[command(name = "pacer")]
#[command(about = "Participant lifecycle orchestration for load-test runs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a test session
    Run {
        /// Configuration file, on top of the embedded defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Custom event schedule file, replaces the configured schedule
        #[arg(short, long)]
        schedule: Option<PathBuf>,
    },
    /// Parse a custom event schedule file and print its entries
    Schedule {
        /// Schedule file
        file: PathBuf,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Run { config, schedule }) => {
            run::run(config.as_deref(), schedule.as_deref()).await
        }
        Some(Commands::Schedule { file }) => schedule::run(&file),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
