// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

fn port_in_range(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("{s:?} is not a port number"))?;
    if (1024..=65535).contains(&port) {
        Ok(port)
    } else {
        Err(format!("port {port} is outside 1024-65535"))
    }
}

/// A multi-agent AI coding assistant.
#[derive(Parser, Debug)]
#[command(name = "tern", version, about)]
pub struct Cli {
    /// Serve the web UI front-end.
    #[arg(short = 'w', long, conflicts_with = "terminal")]
    pub web: bool,

    /// Run the terminal front-end (default).
    #[arg(short = 't', long)]
    pub terminal: bool,

    /// Port for the web UI.
    #[arg(long, default_value_t = 5173, value_parser = port_in_range)]
    pub port: u16,

    /// Explicit configuration file (merged last, highest priority).
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr (RUST_LOG still overrides).
    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the merged effective configuration and exit.
    ShowConfig,
    /// Print a rollup report of recent diff operations and exit.
    DiffReport {
        /// Number of most recent records to include.
        #[arg(long, default_value_t = 200)]
        window: usize,
    },
}
