//! CLI command definitions for the `rivulet` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod call;
pub mod describe;
pub mod output;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use rivulet_types::config::LogFormat;

use crate::demos::Demo;

/// Run reactive dataflow workflows.
#[derive(Parser)]
#[command(name = "rivulet", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file.
    #[arg(long, global = true, env = "RIVULET_CONFIG", default_value = "rivulet.toml")]
    pub config: PathBuf,

    /// Log line format (overrides the config file).
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow and stream every step transition.
    Run(run::RunArgs),

    /// Invoke a single step with JSON arguments and print its value.
    Call {
        /// Workflow to load the step from.
        demo: Demo,

        /// Step to invoke.
        step: String,

        /// JSON object mapping parameter names to values.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Show the steps of a workflow.
    Describe {
        /// Workflow to describe.
        demo: Demo,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
