//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::sweep::SweepTrigger;

/// Save command arguments.
#[derive(Debug, Args)]
pub struct SaveCommand {
    /// JSON form snapshot to save (`-` reads stdin)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Sweep command arguments.
#[derive(Debug, Args)]
pub struct SweepCommand {
    /// What the sweep stands in for
    #[arg(short, long, value_enum, default_value = "resume")]
    pub trigger: TriggerArg,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Maximum number of submissions
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Only submissions whose email is still owed
    #[arg(short, long)]
    pub pending: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
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

/// Sweep trigger argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerArg {
    /// Application resumed
    Resume,
    /// Network connectivity restored
    Connectivity,
    /// Periodic timer
    Periodic,
}

impl From<TriggerArg> for SweepTrigger {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Resume => Self::Resume,
            TriggerArg::Connectivity => Self::ConnectivityRestored,
            TriggerArg::Periodic => Self::Periodic,
        }
    }
}
