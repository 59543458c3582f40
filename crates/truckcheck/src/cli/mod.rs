//! Command-line interface for truckcheck.
//!
//! The binary is a thin host over the save pipeline: forms arrive as JSON
//! snapshots, sweeps are triggered by hand or by the daemon's timer.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{
    ConfigCommand, ListCommand, SaveCommand, StatusCommand, SweepCommand, TriggerArg,
};

/// truckcheck - Vehicle inspection checklists that survive bad signal
///
/// Saves checklists locally, renders the report and delivers it by email and
/// to the dashboard, retrying in the background whatever did not go out.
#[derive(Debug, Parser)]
#[command(name = "truckcheck")]
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
    /// Print a blank checklist form as JSON
    New,

    /// Save a filled-in checklist form
    Save(SaveCommand),

    /// Run one pending-work sweep
    Sweep(SweepCommand),

    /// Run the sweep scheduler until interrupted
    Daemon,

    /// Show store statistics
    Status(StatusCommand),

    /// List recent submissions with their delivery status
    List(ListCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
