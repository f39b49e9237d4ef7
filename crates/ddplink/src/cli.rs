//! Clap derive structures for the `ddplink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ddplink -- talk to a DDP server from the command line
#[derive(Debug, Parser)]
#[command(
    name = "ddplink",
    version,
    about = "Call methods on, watch and export publications of a DDP server",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "DDPLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server profile to use
    #[arg(long, short = 'p', env = "DDPLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Websocket endpoint (overrides profile)
    #[arg(long, short = 'e', env = "DDPLINK_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Bound for connecting and method calls, in milliseconds
    #[arg(long, env = "DDPLINK_TIMEOUT_MS", global = true)]
    pub timeout_ms: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Call a method and print its result as JSON
    Call(CallArgs),

    /// Subscribe and print every change of a collection as a JSON line
    Watch(WatchArgs),

    /// Subscribe, wait until ready and print a snapshot of all collections
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Method name
    pub method: String,

    /// Method arguments, each a JSON value
    #[arg(value_parser = parse_json)]
    pub args: Vec<Value>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Publication name
    pub publication: String,

    /// Collection to print changes of
    #[arg(long, short = 'c')]
    pub collection: String,

    /// Publication arguments, each a JSON value
    #[arg(value_parser = parse_json)]
    pub args: Vec<Value>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Publication name
    pub publication: String,

    /// Publication arguments, each a JSON value
    #[arg(value_parser = parse_json)]
    pub args: Vec<Value>,

    /// Pretty-print the snapshot instead of emitting the codec's string form
    #[arg(long)]
    pub raw: bool,
}

/// Parse one positional argument as JSON; bare words become strings.
fn parse_json(raw: &str) -> Result<Value, String> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(_) if raw.chars().all(|c| c.is_alphanumeric() || "-_.:/@".contains(c)) => {
            Ok(Value::String(raw.to_owned()))
        }
        Err(err) => Err(format!("not valid JSON: {err}")),
    }
}
