//! Subcommand surface for the one-shot sync/export/import/push CLI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file; falls back to built-in defaults
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run plan -> fetch -> reconcile for one configured provider
    Sync {
        provider: String,
        /// Compute the plan and report it without downloading anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Run Sync for every enabled provider, continuing past per-provider errors
    SyncAll,
    /// Reconcile the on-disk store for one provider against its file records
    Scan { provider: String },
    /// Report per-provider status (file counts, last sync outcome)
    Status,
    /// Package one or more providers' content into a transfer directory
    Export {
        output_dir: PathBuf,
        /// Provider names to include; all enabled providers if omitted
        #[arg(long = "provider")]
        providers: Vec<String>,
    },
    /// Validate and extract a transfer directory produced by `export`
    Import {
        source_dir: PathBuf,
        /// Validate archive checksums without extracting anything
        #[arg(long)]
        verify_only: bool,
        /// Re-validate and re-extract even archives already recorded as validated
        #[arg(long)]
        force: bool,
        /// Path to an external tool for rpm-repo metadata regeneration
        #[arg(long)]
        rpm_metadata_tool: Option<PathBuf>,
    },
    /// Push a locally cached OCI image to a registry via an external `copy` tool
    Push {
        /// Provider that owns the cached image under the data directory
        source_provider: String,
        image_name: String,
        endpoint: String,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        repo_prefix: Option<String>,
        #[arg(long)]
        insecure: bool,
        #[arg(long)]
        dest_user: Option<String>,
        #[arg(long)]
        dest_password: Option<String>,
        #[arg(long, default_value = "skopeo")]
        copy_tool: PathBuf,
    },
}
