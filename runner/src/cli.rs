//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "runner", about = "Multi-project task runner and dependency scheduler")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Fallback positional: `runner <project>` is shorthand for `runner start <project>`.
    pub project: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the supervisor for a project, or "all" projects.
    Start {
        project: String,
        #[arg(long)]
        tui: bool,
        #[arg(long)]
        background: bool,
    },
    /// Start a project's supervisor detached in the background.
    StartBg { project: String },
    /// Stop a project's supervisor, or every supervisor if omitted.
    Stop { project: Option<String> },
    /// Print a project's runner state, or a fleet-wide summary if omitted.
    Status { project: Option<String> },
    /// List a project's classified tasks, or every project if omitted.
    List { project: Option<String> },
    /// List a project's ready tasks.
    Ready { project: String },
    /// List a project's waiting (and waiting-on-parent) tasks.
    Waiting { project: String },
    /// List a project's blocked (and blocked-by-parent) tasks.
    Blocked { project: String },
    /// Run a single ready task to completion, synchronously, without the poll loop.
    RunOne { project: String },
    /// Tail the runner's log file.
    Logs {
        #[arg(short, long)]
        follow: bool,
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
    /// Print the effective configuration.
    Config,
    /// Internal: re-exec target for a detached supervisor process.
    #[command(hide = true)]
    RunSupervisor { project: String },
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Resolve the effective command, treating a bare non-flag first token as
/// `start <project>` per the CLI's documented shorthand.
pub fn effective_command(cli: &Cli) -> Option<Command> {
    cli.command.clone().or_else(|| {
        cli.project.clone().map(|project| Command::Start {
            project,
            tui: false,
            background: false,
        })
    })
}

pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runner")
        .join("logs")
        .join("runner.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_project_token_becomes_start_command() {
        let cli = Cli {
            config: None,
            log_level: None,
            command: None,
            project: Some("demo".to_string()),
        };
        match effective_command(&cli) {
            Some(Command::Start { project, .. }) => assert_eq!(project, "demo"),
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn explicit_command_wins_over_positional() {
        let cli = Cli {
            config: None,
            log_level: None,
            command: Some(Command::Stop { project: None }),
            project: Some("demo".to_string()),
        };
        assert!(matches!(effective_command(&cli), Some(Command::Stop { project: None })));
    }
}
