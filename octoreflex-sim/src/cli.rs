// CLI surface for the control-law Monte Carlo simulator, shaped after
// `octoreflex`'s own `cli.rs` (flat `clap::Parser` struct, `env` fallbacks
// on the flags spec.md §6 names explicitly).

use crate::dist::DistKind;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "octoreflex-sim")]
#[command(author = "OctoReflex Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Monte Carlo simulator for the OCTOREFLEX control-law parameter loop")]
pub struct Cli {
    /// Number of control-law update steps per run
    #[arg(long, default_value = "10000")]
    pub steps: u64,

    /// Number of independent runs
    #[arg(long, default_value = "10000")]
    pub runs: u64,

    /// lambda1: anomaly-driven growth gain
    #[arg(long, default_value = "0.4")]
    pub lambda1: f64,

    /// lambda2: utilization-driven decay gain
    #[arg(long, default_value = "0.6")]
    pub lambda2: f64,

    /// m0: initial control-law parameter value
    #[arg(long, default_value = "0.2")]
    pub m0: f64,

    /// U: fixed utilization coefficient applied at every step (spec §4.11's
    /// U(state) table, held constant for the duration of a simulated run)
    #[arg(long = "U", default_value = "1.0")]
    pub u: f64,

    /// Seed for the deterministic RNG; each run derives its own stream from
    /// (seed, run_index) so the whole batch is reproducible end to end
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Anomaly-score distribution to draw A_t from
    #[arg(long, value_enum, default_value = "halfnormal")]
    pub dist: DistKind,

    /// Write per-run results to this CSV path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// sigmoid gain k applied to S_t/S_max in the control law
    #[arg(long, default_value = "1.0")]
    pub gain_k: f64,

    /// S_max normalizer for the sigmoid argument
    #[arg(long, default_value = "10.0")]
    pub s_max: f64,

    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}
