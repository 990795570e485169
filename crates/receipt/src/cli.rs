use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use receipt_ledger::{ResultStatus, RiskTier};

#[derive(Parser, Debug)]
#[command(
    name = "receipt",
    version,
    about = "Signed, hash-chained certificates for privileged actions"
)]
pub struct Cli {
    /// Data directory (keystore, ledger, logs)
    #[arg(long, env = "RECEIPT_DATA_DIR", global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "RECEIPT_LOG", default_value = "warn", global = true)]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "RECEIPT_LOG_FILE", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data directory and device signing key
    Init,
    /// Certify a completed action and append it to the ledger
    Issue(IssueArgs),
    /// List recent certificates, newest first
    #[command(name = "ls", alias = "list")]
    List {
        /// Maximum number of certificates to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show a certificate by ID
    Show {
        /// Certificate ID
        id: String,
    },
    /// Verify the hash chain
    Verify {
        /// Also report per-certificate hash/signature/link results
        #[arg(long)]
        signatures: bool,
    },
    /// Print the hash-chain proof for a certificate
    Proof {
        /// Certificate ID
        id: String,
    },
    /// Produce a signed audit export bundle for a certificate
    Export {
        /// Certificate ID
        id: String,
        /// Write the bundle to PATH instead of stdout
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Ledger and device key status
    Status,
}

#[derive(Args, Debug)]
pub struct IssueArgs {
    /// Action verb (e.g. "send_email")
    #[arg(long)]
    pub action: String,
    /// Action target (e.g. a recipient or resource)
    #[arg(long)]
    pub target: String,
    /// Human summary of the approved proposal
    #[arg(long)]
    pub proposal: String,
    /// Number of steps in the proposal
    #[arg(long, default_value = "1")]
    pub steps: u32,
    /// Authorization token ID
    #[arg(long)]
    pub token_id: String,
    /// Proposal ID the token was issued for
    #[arg(long)]
    pub token_proposal: String,
    /// Token signature (opaque)
    #[arg(long)]
    pub token_signature: String,
    /// Approver identity
    #[arg(long)]
    pub approver: String,
    /// Risk tier (low, medium, high, critical)
    #[arg(long, default_value = "low")]
    pub risk: RiskTier,
    /// Connector that executed the action
    #[arg(long)]
    pub connector: Option<String>,
    /// Connector version
    #[arg(long, requires = "connector")]
    pub connector_version: Option<String>,
    /// Execution outcome (success, failure, partial, rolled_back)
    #[arg(long, default_value = "success")]
    pub status: ResultStatus,
    /// Execution result summary
    #[arg(long)]
    pub result: String,
    /// Policy version in force
    #[arg(long, default_value = "unversioned")]
    pub policy_version: String,
    /// Policy flag as NAME=BOOL (repeatable)
    #[arg(long = "flag", value_name = "NAME=BOOL", value_parser = parse_flag)]
    pub flags: Vec<(String, bool)>,
}

fn parse_flag(entry: &str) -> Result<(String, bool), String> {
    let (name, value) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=BOOL, got \"{entry}\""))?;
    let value = match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        other => return Err(format!("invalid boolean \"{other}\" for flag {name}")),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("flag name is empty".to_string());
    }
    Ok((name.to_string(), value))
}
