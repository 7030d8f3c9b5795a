// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use wren_config::ApprovalMode;

#[derive(Parser, Debug)]
#[command(
    name = "wren",
    about = "A tool-calling agent runtime with an approval gate",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file, applied after the discovered layers
    #[arg(long, short = 'c', global = true, env = "WREN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the approval mode from the config
    #[arg(long, short = 'm', value_enum, global = true)]
    pub mode: Option<ApprovalMode>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one task headless: tokens go to stdout, tool activity to stderr
    Run {
        /// The task for the agent
        #[arg(value_name = "PROMPT", required = true, num_args = 1..)]
        prompt: Vec<String>,

        /// Follow-up messages queued behind the first task
        #[arg(long = "then", value_name = "MESSAGE")]
        then: Vec<String>,

        /// Maximum tool rounds per turn (0 = unlimited); overrides config
        #[arg(long, value_name = "N")]
        max_rounds: Option<u32>,

        /// Skip connecting to external tool servers
        #[arg(long)]
        no_mcp: bool,
    },
    /// Connect to every configured tool server and print its status
    Servers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Preview how the approval gate treats a call, without running it
    Check {
        /// Tool name, e.g. "bash"
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
}

impl Cli {
    /// Where "always" approvals are written: the explicit config file if
    /// one was given, else the project-local layer.
    pub fn persist_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(".wren/config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_joins_prompt_words_and_global_flags() {
        let cli = Cli::parse_from([
            "wren", "run", "list", "files", "--mode", "auto", "--then", "and more",
        ]);
        match cli.command {
            Commands::Run { prompt, then, .. } => {
                assert_eq!(prompt.join(" "), "list files");
                assert_eq!(then, vec!["and more".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.mode, Some(ApprovalMode::Auto));
    }

    #[test]
    fn check_defaults_to_empty_args() {
        let cli = Cli::parse_from(["wren", "check", "bash"]);
        match &cli.command {
            Commands::Check { tool, args } => {
                assert_eq!(tool, "bash");
                assert_eq!(args, "{}");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.persist_path(), PathBuf::from(".wren/config.toml"));
    }
}
