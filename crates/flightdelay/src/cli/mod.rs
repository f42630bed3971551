//! Command-line interface for flightdelay.
//!
//! This module provides the CLI structure and command handlers for the
//! `fldelay` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CacheCommand, CheckCommand, ConfigCommand, LookupCommand, RegisterCommand, ServeCommand,
    StatusCommand, TierCommand,
};

/// fldelay - How late does this flight usually run?
///
/// Serves and queries recent arrival-delay statistics for airline flights,
/// with per-caller daily quotas and a shared result cache.
#[derive(Debug, Parser)]
#[command(name = "fldelay")]
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
    /// Run the lookup service
    Serve(ServeCommand),

    /// Register a new identity with the service
    Register(RegisterCommand),

    /// Look up delay statistics for one flight
    Lookup(LookupCommand),

    /// Look up several flights at once and report whether any run late
    Check(CheckCommand),

    /// Show database and cache statistics
    Status(StatusCommand),

    /// Change the quota tier of an identity
    Tier(TierCommand),

    /// Maintain the result cache
    #[command(subcommand)]
    Cache(CacheCommand),

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
