// `octoreflex-sim`: standalone Monte Carlo driver for the control-law
// parameter loop (spec §4.11, §6, §8 scenario 6). Structured the way
// `octoreflex`'s own `main.rs` is: parse CLI, init tracing, do the work,
// report a summary. No long-lived state, no signal handling — this is a
// batch tool, not a daemon, so it skips the agent's supervision machinery
// entirely.

mod cli;
mod dist;

use clap::Parser;
use cli::Cli;
use octoreflex_core::severity::control_law::{ControlLaw, ControlLawParams};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct RunResult {
    run: u64,
    m_final: f64,
    m_mean: f64,
    a_mean: f64,
    a_max: f64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("octoreflex-sim: fatal: {e}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if cli.steps == 0 || cli.runs == 0 {
        anyhow::bail!("--steps and --runs must both be >= 1");
    }
    if !(0.0..=1.0).contains(&cli.m0) {
        anyhow::bail!("--m0 must be in [0, 1], got {}", cli.m0);
    }

    let params = ControlLawParams {
        lambda1: cli.lambda1,
        lambda2: cli.lambda2,
        s_max: cli.s_max,
        gain_k: cli.gain_k,
        integral_gain: None,
        integral_max: 1.0,
    };

    info!(
        steps = cli.steps,
        runs = cli.runs,
        lambda1 = cli.lambda1,
        lambda2 = cli.lambda2,
        m0 = cli.m0,
        u = cli.u,
        seed = cli.seed,
        dist = ?cli.dist,
        "starting control-law simulation"
    );

    let mut results = Vec::with_capacity(cli.runs as usize);
    for run_idx in 0..cli.runs {
        let mut rng = ChaCha8Rng::seed_from_u64(cli.seed ^ run_idx.wrapping_mul(0x9E3779B97F4A7C15));
        let mut law = ControlLaw::new(params, cli.m0);

        let mut m_sum = 0.0;
        let mut a_sum = 0.0;
        let mut a_max: f64 = 0.0;
        let mut m_final = cli.m0;

        for _ in 0..cli.steps {
            let a_t = cli.dist.sample(&mut rng);
            a_sum += a_t;
            a_max = a_max.max(a_t);
            m_final = law.step_with_utilization(a_t, cli.u);
            m_sum += m_final;
        }

        results.push(RunResult {
            run: run_idx,
            m_final,
            m_mean: m_sum / cli.steps as f64,
            a_mean: a_sum / cli.steps as f64,
            a_max,
        });
    }

    let below_threshold = results.iter().filter(|r| r.m_final < 0.2).count();
    let fraction_below = below_threshold as f64 / results.len() as f64;

    info!(
        fraction_m_final_below_0_2 = fraction_below,
        runs = results.len(),
        "simulation complete"
    );

    if let Some(path) = &cli.csv {
        let mut writer = csv::Writer::from_path(path)?;
        for result in &results {
            writer.serialize(result)?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = results.len(), "wrote CSV");
    } else {
        warn!("no --csv path given; per-run results were not persisted");
    }

    println!(
        "runs={} steps={} dist={:?} fraction(m_final<0.2)={:.4}",
        results.len(),
        cli.steps,
        cli.dist,
        fraction_below
    );

    Ok(())
}
