//! # CLI Interface
//!
//! Defines the command-line argument structure for `nova-storectl` using
//! `clap` derive. Every subcommand opens the store named by the global
//! options, runs inside a single transaction and exits.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and edit a NOVA store data directory.
///
/// Keys and values are read and printed as UTF-8 text unless `--hex` is
/// given, in which case both are hex strings. `--json` wraps the printed
/// results in JSON without changing how keys and values are encoded.
#[derive(Parser, Debug)]
#[command(
    name = "nova-storectl",
    about = "Inspect and edit NOVA store data directories",
    version,
    propagate_version = true
)]
pub struct StoreCtlCli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Store config file (JSON). Flags below override its fields.
    #[arg(long, short = 'c', global = true, env = "NOVA_STORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Engine backing the store: memory, sled or rocksdb.
    #[arg(long, short = 'b', global = true, env = "NOVA_STORE_BACKEND")]
    pub backend: Option<String>,

    /// Data directory of the store.
    #[arg(long, short = 'd', global = true, env = "NOVA_STORE_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Treat keys and values as hex strings.
    #[arg(long, global = true)]
    pub hex: bool,

    /// Print results as JSON: one object per row for `scan`, a single
    /// document for everything else.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log format: pretty or json.
    #[arg(long, global = true, env = "NOVA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every table with its prefix byte.
    Tables,
    /// Print the value stored under a key.
    Get(KeyArgs),
    /// Store a value under a key.
    Put(PutArgs),
    /// Delete a key.
    Delete(KeyArgs),
    /// Print the rows of a table within a key range.
    Scan(ScanArgs),
    /// Print the number of rows in a table.
    Count(TableArgs),
    /// Delete every row of a table.
    Clear(TableArgs),
    /// Print the store's Prometheus metrics.
    Metrics,
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct TableArgs {
    /// Table name.
    pub table: String,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Table name.
    pub table: String,
    /// Row key.
    pub key: String,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Table name.
    pub table: String,
    /// Row key.
    pub key: String,
    /// Value to store.
    pub value: String,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Table name.
    pub table: String,

    /// First key of the range. Unbounded when omitted.
    #[arg(long)]
    pub from: Option<String>,

    /// Last key of the range. Unbounded when omitted.
    #[arg(long)]
    pub to: Option<String>,

    /// Leave the `--from` key itself out of the range.
    #[arg(long, requires = "from")]
    pub exclusive_from: bool,

    /// Leave the `--to` key itself out of the range.
    #[arg(long, requires = "to")]
    pub exclusive_to: bool,

    /// Scan from the last key to the first.
    #[arg(long, short = 'r')]
    pub reverse: bool,

    /// Print keys only.
    #[arg(long)]
    pub keys_only: bool,

    /// Stop after this many rows.
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        StoreCtlCli::command().debug_assert();
    }

    #[test]
    fn scan_flags_parse() {
        let cli = StoreCtlCli::parse_from([
            "nova-storectl",
            "--backend",
            "memory",
            "scan",
            "headers",
            "--from",
            "a",
            "--exclusive-from",
            "--reverse",
            "-n",
            "5",
            "--hex",
            "--json",
        ]);
        assert_eq!(cli.store.backend.as_deref(), Some("memory"));
        assert!(cli.store.hex);
        assert!(cli.store.json);
        match cli.command {
            Commands::Scan(args) => {
                assert_eq!(args.table, "headers");
                assert_eq!(args.from.as_deref(), Some("a"));
                assert!(args.exclusive_from);
                assert!(args.reverse);
                assert_eq!(args.limit, Some(5));
                assert!(args.to.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn exclusive_bound_needs_its_key() {
        assert!(StoreCtlCli::try_parse_from(["nova-storectl", "scan", "t", "--exclusive-to"]).is_err());
    }
}
