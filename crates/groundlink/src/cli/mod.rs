//! Command-line interface for groundlink.
//!
//! This module provides the CLI structure for the `gndlink` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, DumpCommand, IngestCommand, ResetCommand, StatusCommand};

/// gndlink - Rocket telemetry ground station
///
/// Ingests the primary and backup radio links, fuses them into one telemetry
/// record per packet and stores every record for post-flight analysis.
#[derive(Debug, Parser)]
#[command(name = "gndlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest telemetry until the source closes or Ctrl-C
    ///
    /// Without --file or --tcp, lines are read from stdin. Ctrl-C stores
    /// pending telemetry and exits without waiting for stdin to deliver
    /// another line.
    Ingest(IngestCommand),

    /// Show stored telemetry statistics
    Status(StatusCommand),

    /// Write stored records to stdout as JSON Lines
    Dump(DumpCommand),

    /// Clear stored records for a new mission
    Reset(ResetCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Verbosity;
    use crate::source::Source;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "gndlink");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["gndlink", "status"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["gndlink", "-q", "status"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["gndlink", "-v", "status"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["gndlink", "-vv", "status"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_ingest_default() {
        let cli = parse(&["gndlink", "ingest"]);
        let Command::Ingest(cmd) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(cmd.source(), Source::Stdin);
    }

    #[test]
    fn test_parse_ingest_tcp() {
        let cli = parse(&["gndlink", "ingest", "--tcp", "127.0.0.1:7000", "--json"]);
        let Command::Ingest(cmd) = cli.command else {
            panic!("expected ingest");
        };
        assert!(cmd.json);
        assert_eq!(cmd.source(), Source::Tcp("127.0.0.1:7000".to_string()));
    }

    #[test]
    fn test_ingest_file_and_tcp_conflict() {
        let result = Cli::try_parse_from(["gndlink", "ingest", "--file", "a.log", "--tcp", "h:1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_dump_limit() {
        let cli = parse(&["gndlink", "dump", "--limit", "10"]);
        assert!(matches!(
            cli.command,
            Command::Dump(DumpCommand { limit: Some(10) })
        ));
    }

    #[test]
    fn test_parse_reset() {
        let cli = parse(&["gndlink", "reset", "--yes"]);
        assert!(matches!(cli.command, Command::Reset(ResetCommand { yes: true })));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = parse(&["gndlink", "config", "validate", "--file", "/tmp/g.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["gndlink", "-c", "/custom/config.toml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }
}
