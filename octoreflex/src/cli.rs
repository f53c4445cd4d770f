// CLI surface, shaped after `kratos-core/src/cli/mod.rs`'s `Cli`/`Commands`
// derive layout: a top-level verbosity/log-level pair, a `Run` subcommand
// carrying most of the flags, and small utility subcommands alongside it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "octoreflex")]
#[command(author = "OctoReflex Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Host-level reflexive containment agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "info", env = "OCTOREFLEX_LOG")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent
    Run(RunCmd),
    /// Show running-agent info via the operator socket
    Info(InfoCmd),
    /// Generate a gossip signing keypair
    Key(KeyCmd),
    /// Purge ledger and camouflage state for this node
    Purge(PurgeCmd),
}

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Base directory for ledger, camouflage hints, and config
    #[arg(short = 'd', long, env = "OCTOREFLEX_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    /// Path to a JSON config file; overrides individual flags when set
    #[arg(long, env = "OCTOREFLEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logical node identifier used in gossip and camouflage port derivation
    #[arg(long, env = "OCTOREFLEX_NODE_ID")]
    pub node_id: Option<String>,

    /// Metrics HTTP port
    #[arg(long, default_value = "9898", env = "OCTOREFLEX_METRICS_PORT")]
    pub metrics_port: u16,

    /// Disable the metrics HTTP server
    #[arg(long)]
    pub no_metrics: bool,

    /// Gossip mesh peers to dial at startup (multiaddrs)
    #[arg(long = "peer", value_name = "MULTIADDR")]
    pub peers: Vec<String>,
}

impl RunCmd {
    pub fn get_base_path(&self) -> PathBuf {
        if let Some(ref path) = self.base_path {
            path.clone()
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("octoreflex")
        }
    }
}

#[derive(Parser, Debug)]
pub struct InfoCmd {
    /// Path to the running agent's operator socket
    #[arg(long, default_value = "operator.sock")]
    pub socket: PathBuf,
}

#[derive(Parser, Debug)]
pub struct KeyCmd {
    /// Write the generated key to a file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct PurgeCmd {
    #[arg(short = 'd', long)]
    pub base_path: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

impl PurgeCmd {
    pub fn get_base_path(&self) -> PathBuf {
        if let Some(ref path) = self.base_path {
            path.clone()
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("octoreflex")
        }
    }
}
