//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "civic-ledger",
    version,
    about = "Civic complaint intake with a tamper-evident audit ledger",
    long_about = "civic-ledger runs a background daemon that files citizen complaints, routes them to \
                  departments with an optional AI classifier, and records every administrative action \
                  in a hash-chained ledger that can be verified at any time."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/civic-ledger/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ledger daemon
    Start {
        /// Stay attached to the terminal instead of forking
        #[arg(short, long)]
        foreground: bool,

        /// Profile to use (e.g., "offline")
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Stop the ledger daemon
    Stop,

    /// Show daemon status
    Status,

    /// File a new complaint
    Submit {
        /// Complaint category (e.g., "Pothole", "Others")
        #[arg(short = 'k', long)]
        category: String,

        /// Free-text description
        description: String,

        /// Latitude in decimal degrees
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude in decimal degrees
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,

        /// Submitting user id
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Role of the submitting user
        #[arg(short, long)]
        role: Option<String>,

        /// Comma-separated user tags
        #[arg(short, long)]
        tags: Option<String>,
    },

    /// Change a complaint's status
    SetStatus {
        /// Complaint id
        id: i64,

        /// New status (pending, in_progress, reviewed, rejected, completed)
        status: String,

        /// Acting user id
        #[arg(short, long, default_value = "admin")]
        user: String,
    },

    /// Route a complaint to a department
    Assign {
        /// Complaint id
        id: i64,

        /// Department label (e.g., "PWD", "Water Authority")
        department: String,

        /// Acting user id
        #[arg(short, long, default_value = "admin")]
        user: String,
    },

    /// Delete one or more complaints (the ledger keeps their history)
    Delete {
        /// Complaint ids
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,

        /// Acting user id
        #[arg(short, long, default_value = "admin")]
        user: String,
    },

    /// List complaints
    Complaints {
        /// Only complaints assigned to this department
        #[arg(short, long)]
        department: Option<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Group located complaints into hotspots
    Hotspots {
        /// Grouping distance in degrees
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Read ledger blocks
    Ledger {
        /// Only blocks filed under this department
        #[arg(short, long)]
        department: Option<String>,

        /// Only blocks about this complaint
        #[arg(short = 'i', long)]
        complaint: Option<i64>,

        /// Maximum number of blocks
        #[arg(short, long)]
        limit: Option<usize>,

        /// Oldest first
        #[arg(long)]
        ascending: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Verify the ledger hash chain
    Verify,

    /// Add blocks for complaints the ledger does not cover
    Repair,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
