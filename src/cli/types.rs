//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "subject-flow")]
#[command(about = "Subject Flow - event-driven dependency resolver", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of subject-flow.yaml and subject-flow.local.yaml
    #[arg(short, long, global = true, env = "SUBJECT_FLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume subject-ready events and run the sweeper until Ctrl-C
    Run,

    /// Show the task instances a subject would contribute to
    Match {
        /// Concrete subject URI
        subject: String,

        /// Also match every computed product, transitively
        #[arg(short, long)]
        recurse: bool,
    },

    /// List task templates, or show the task graph around a subject
    Graph {
        /// Concrete subject whose task graph to show
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// Run one delay/timeout sweep and report what was dispatched
    Sweep,

    /// Announce that a subject is available
    Publish {
        /// Concrete subject URI
        subject: String,
    },

    /// List pending task instances
    Pending,
}
