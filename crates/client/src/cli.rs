// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const QUICKSTART_HELP: &str = "\
Get started:
  chatsync watch conv-1           Print messages as they arrive
  chatsync send conv-1 \"Hello\"    Send a message and wait for it to sync";

#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "Local-first message sync client for chat conversations")]
#[command(version)]
#[command(after_help = QUICKSTART_HELP)]
pub struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server URL, overriding the config file
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Subscribe to conversations and print messages as they reconcile
    #[command(arg_required_else_help = true)]
    Watch {
        /// Conversation ID(s)
        #[arg(required = true)]
        conversations: Vec<String>,
    },

    /// Send a message and wait until the server has acknowledged it
    #[command(arg_required_else_help = true)]
    Send {
        /// Conversation ID
        conversation: String,

        /// Message text
        text: String,

        /// Seconds to wait for the sync to complete
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
