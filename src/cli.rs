//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// datamap - declarative field mapping for data migration
#[derive(Parser)]
#[command(
    name = "dm",
    version,
    about = "Map records between local and remote schemas using declarative mappings",
    after_help = "Logs are written to: ~/.local/share/datamap/logs/datamap.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// List loaded mapping definitions
    List,

    /// Validate child table references across all definitions
    Check,

    /// Show the source fields a mapping needs
    Fields {
        /// Mapping name
        #[arg(value_name = "MAPPING")]
        mapping: String,
    },

    /// Map JSON records (one object or an array of objects)
    Map {
        /// Mapping name
        #[arg(value_name = "MAPPING")]
        mapping: String,

        /// Input file (reads stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Pretty-print output
        #[arg(short, long)]
        pretty: bool,
    },
}
