//! Command-line surface. Argument structs only; handlers live in `main.rs`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::record::FunctionStatus;

#[derive(Debug, Parser)]
#[command(
    name = "fnstore",
    version,
    about = "Local function catalog with remote enrichment",
    after_help = "The catalog lives in the platform data directory by default; \
                  override with --data-dir or FNSTORE_DATA_DIR. Set FNSTORE_LM_COMMAND \
                  to run verification in two-phase mode with a local model."
)]
pub struct RootArgs {
    /// Data directory holding the catalog and its config.json
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the intelligence hub
    #[arg(long, value_name = "URL", global = true)]
    pub hub_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save a function locally and request remote verification
    Save(SaveArgs),
    /// Search the catalog by substring over name and description
    Search(SearchArgs),
    /// List catalog functions with optional filters
    List(ListArgs),
    /// Show the full record for one function
    Get(GetArgs),
    /// Pick the best local match for a task and inject its code
    SmartGet(SmartGetArgs),
    /// Print the tool specifications as JSON
    Tools,
}

#[derive(Debug, Args)]
#[command(after_help = "Exactly one of --code or --code-file is required. \
                        A save succeeds even when the hub is unreachable; the record \
                        then stays pending and the output carries a warning.")]
pub struct SaveArgs {
    /// Unique function name
    #[arg(long)]
    pub name: String,

    /// Source code passed inline
    #[arg(long, conflicts_with = "code_file")]
    pub code: Option<String>,

    /// Read the source code from a file
    #[arg(long, value_name = "FILE")]
    pub code_file: Option<PathBuf>,

    /// Human-readable description
    #[arg(long)]
    pub description: Option<String>,

    /// Tag; repeat for multiple
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Dependency; repeat for multiple
    #[arg(long = "dep", value_name = "NAME")]
    pub dependencies: Vec<String>,

    /// JSON file holding an array of test case objects
    #[arg(long, value_name = "FILE")]
    pub test_cases_file: Option<PathBuf>,

    /// Manual status override (pending, verified, rejected, archived)
    #[arg(long, value_parser = parse_status)]
    pub status: Option<FunctionStatus>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Substring matched against names and descriptions
    #[arg(long)]
    pub query: String,

    /// Maximum number of results
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Substring matched against names and descriptions
    #[arg(long)]
    pub query: Option<String>,

    /// Exact tag to filter by
    #[arg(long)]
    pub tag: Option<String>,

    /// Maximum number of results
    #[arg(long)]
    pub limit: Option<usize>,

    /// Include archived records
    #[arg(long)]
    pub include_archived: bool,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Exact function name
    #[arg(long)]
    pub name: String,
}

#[derive(Debug, Args)]
#[command(after_help = "Runs the full retrieval flow: local shortlist, hub rerank, \
                        then code injection under <target-dir>/local_pkg/. \
                        Fails outright when the hub cannot rerank.")]
pub struct SmartGetArgs {
    /// Task description the hub ranks candidates against
    #[arg(long)]
    pub query: String,

    /// Project directory receiving the injected code
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub target_dir: PathBuf,
}

fn parse_status(raw: &str) -> Result<FunctionStatus, String> {
    match raw {
        "pending" => Ok(FunctionStatus::Pending),
        "verified" => Ok(FunctionStatus::Verified),
        "rejected" => Ok(FunctionStatus::Rejected),
        "archived" => Ok(FunctionStatus::Archived),
        other => Err(format!(
            "unknown status '{other}' (expected pending, verified, rejected, or archived)"
        )),
    }
}
