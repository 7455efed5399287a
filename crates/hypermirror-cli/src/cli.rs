//! CLI argument definitions for hypermirror.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Poll every enabled source and log update events |
//! | `fetch` | Force one cycle for a source and print its dataset |
//! | `sources` | List configured sources |
//! | `config` | Print or check the effective configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | TOML configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Mirror of third-party market state with caching and fan-out.
#[derive(Debug, Parser)]
#[command(name = "hypermirror", author, version, about)]
pub struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start every enabled poller and log update events until Ctrl-C.
    ///
    /// # Examples
    ///
    ///   hypermirror run
    ///   hypermirror run --duration-secs 120 --config mirror.toml
    Run(RunArgs),

    /// Force one cycle for a source and print the resulting dataset.
    ///
    /// # Examples
    ///
    ///   hypermirror fetch vaults --pretty
    ///   hypermirror fetch perp_markets --key perp:raw_data
    Fetch(FetchArgs),

    /// List configured sources with interval, keys and topic.
    Sources(SourcesArgs),

    /// Print the effective configuration as TOML.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Source name, e.g. `vaults` or `perp_markets`.
    pub source: String,

    /// Key to print instead of the source's primary dataset.
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Include disabled sources.
    #[arg(long, default_value_t = false)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Only validate; print nothing on success.
    #[arg(long, default_value_t = false)]
    pub check: bool,
}
