//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::fanout::DetectedFlight;
use crate::identity::Tier;

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on, overriding the configuration
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,
}

/// Register command arguments.
#[derive(Debug, Args)]
pub struct RegisterCommand {
    /// Save the new identity for later lookups
    #[arg(short, long)]
    pub save: bool,
}

/// Lookup command arguments.
#[derive(Debug, Args)]
pub struct LookupCommand {
    /// Flight number, e.g. "DL1234" or "dl 1234"
    pub flight: String,

    /// Departure airport
    #[arg(long)]
    pub origin: Option<String>,

    /// Arrival airport
    #[arg(long)]
    pub destination: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Check command arguments.
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Flight numbers to check together
    #[arg(required = true, num_args = 1..)]
    pub flights: Vec<DetectedFlight>,

    /// Departure airport shared by all flights
    #[arg(long)]
    pub origin: Option<String>,

    /// Arrival airport shared by all flights
    #[arg(long)]
    pub destination: Option<String>,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Tier command arguments.
#[derive(Debug, Args)]
pub struct TierCommand {
    /// Identity to change
    pub identity_id: String,

    /// New tier: "free" or "unlimited"
    pub tier: Tier,
}

/// Cache maintenance commands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Delete entries older than the cache TTL
    Prune,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_command_debug() {
        let cmd = StatusCommand { json: true };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("json"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_check_command_holds_parsed_flights() {
        let cmd = CheckCommand {
            flights: vec!["DL1".parse().unwrap(), "ua 55".parse().unwrap()],
            origin: None,
            destination: None,
        };
        assert_eq!(cmd.flights[1].flight_number(), "UA55");
    }
}
