//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::source::Source;

/// Ingest command arguments.
#[derive(Debug, Args)]
pub struct IngestCommand {
    /// Read from a capture file or device node
    #[arg(short, long, value_name = "PATH", conflicts_with = "tcp")]
    pub file: Option<PathBuf>,

    /// Read from a TCP endpoint (host:port)
    #[arg(short, long, value_name = "ADDR")]
    pub tcp: Option<String>,

    /// Print the final statistics as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl IngestCommand {
    /// The source selected by the flags; stdin when none is given.
    #[must_use]
    pub fn source(&self) -> Source {
        match (&self.file, &self.tcp) {
            (Some(path), _) => Source::File(path.clone()),
            (None, Some(addr)) => Source::Tcp(addr.clone()),
            (None, None) => Source::Stdin,
        }
    }
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Dump command arguments.
#[derive(Debug, Args)]
pub struct DumpCommand {
    /// Stop after this many records
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Reset command arguments.
#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
