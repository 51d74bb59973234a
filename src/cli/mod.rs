//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// sheetsync - offline-first cache for spreadsheet-backed forms
#[derive(Parser, Debug)]
#[command(name = "sheetsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.sheetsync/data/cache.db)
    #[arg(long, global = true, env = "SHEETSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Directory of `<form>.jsonl` snapshots used as the remote source
    #[arg(long, global = true, env = "SHEETSYNC_SOURCE")]
    pub source: Option<PathBuf>,

    /// Actor recorded on local writes
    #[arg(long, global = true, env = "SHEETSYNC_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read a form from the source into the cache
    Sync {
        /// Form id
        form: String,

        /// Ignore the watermark and read every row
        #[arg(long)]
        full: bool,
    },

    /// List cached entries of a form
    List {
        /// Form id
        form: String,

        /// Refresh from the source first if the cache is stale
        #[arg(long)]
        refresh: bool,

        /// Always refresh from the source first
        #[arg(long)]
        force: bool,
    },

    /// Show one entry, fetching it if the cache cannot answer
    Get {
        /// Form id
        form: String,

        /// Entry id
        entry: String,

        /// Fetch from the source unless the form synced moments ago
        #[arg(long)]
        force: bool,

        /// Row position hint in the source
        #[arg(long)]
        row: Option<u32>,
    },

    /// Create or edit an entry locally
    Put(PutArgs),

    /// Delete a cached entry locally
    Delete {
        /// Form id
        form: String,

        /// Entry id
        entry: String,
    },

    /// Show cache status for all forms or one form
    Status {
        /// Form id
        form: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Form id
    pub form: String,

    /// Entry id (generated when omitted)
    #[arg(long)]
    pub entry: Option<String>,

    /// Field values as a JSON object, e.g. '{"Name":"Ada"}'
    #[arg(long)]
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get_with_hint() {
        let cli = Cli::parse_from(["sheetsync", "--json", "get", "orders", "entry_1", "--row", "4"]);
        assert!(cli.json);
        match cli.command {
            Commands::Get { form, entry, force, row } => {
                assert_eq!(form, "orders");
                assert_eq!(entry, "entry_1");
                assert!(!force);
                assert_eq!(row, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
