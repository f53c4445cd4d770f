// OCTOREFLEX agent entry point. Structure mirrors `kratos-core/src/main.rs`:
// parse CLI, init tracing, print a banner, build the long-lived
// node/engine, then run until a shutdown signal. `tokio::signal::unix`
// handling isn't something the teacher itself demonstrates (its shutdown
// path is a single `ctrl_c` await); that half of this file follows the
// `SignalKind`-based multi-signal `tokio::select!` pattern used in the
// other reference repos' daemon entry points.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, KeySubcommand as _};
use octoreflex_core::camouflage::{run_decoy_supervisor, CamouflageManager, EpochScheduler};
use octoreflex_core::config::Config;
use octoreflex_core::constitution::DEFAULT_MAX_SKEW_NS;
use octoreflex_core::escalation::{EngineConfig, EscalationEngine, EscalationSink};
use octoreflex_core::gossip::{run_gossip_service, PartitionConfig, PartitionTracker, QuorumTracker};
use octoreflex_core::kernel::{FilterContract, RingBuffer};
use octoreflex_core::ledger::LedgerStore;
use octoreflex_core::metrics::{run_metrics_server, Metrics};
use octoreflex_core::operator::{run_operator_processor, run_operator_socket, OperatorRateLimiter, RateLimitConfig};
use octoreflex_core::severity::control_law::{ControlLaw, ControlLawParams};
use octoreflex_core::types::NodeId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.verbose { "debug" } else { &cli.log_level };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter)))
        .init();

    print_banner();

    match cli.command {
        Commands::Run(cmd) => run_agent(cmd).await?,
        Commands::Info(cmd) => {
            info!(socket = %cmd.socket.display(), "query the operator socket directly; no built-in client yet");
            println!("Send a newline-delimited JSON request to {}", cmd.socket.display());
        }
        Commands::Key(cmd) => generate_key(cmd.output.as_ref())?,
        Commands::Purge(cmd) => purge(cmd)?,
    }

    info!("shutting down");
    Ok(())
}

async fn run_agent(cmd: cli::RunCmd) -> anyhow::Result<()> {
    let base_path = cmd.get_base_path();
    std::fs::create_dir_all(&base_path)?;

    let config = match &cmd.config {
        Some(path) => Config::load(path).map_err(|e| anyhow::anyhow!("configuration error: {}", e))?,
        None => {
            let mut config = Config::default();
            config.data_dir = base_path.clone();
            config.ledger.db_path = base_path.join("ledger");
            config.camouflage.hints_dir = base_path.join("camouflage");
            if let Some(node_id) = &cmd.node_id {
                config.node_id = node_id.clone();
            }
            config.metrics.port = cmd.metrics_port;
            config.metrics.enabled = !cmd.no_metrics;
            config.validate().map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;
            config
        }
    };

    let node_id = NodeId::from(config.node_id.clone());
    let metrics = Arc::new(Metrics::new());

    let filter = FilterContract::new(num_cpus_hint());
    filter
        .load_and_verify()
        .map_err(|e| anyhow::anyhow!("fatal: kernel filter contract failed verification: {}", e))?;

    let ledger = Arc::new(LedgerStore::open(&config.ledger.db_path)?);
    metrics.set_chain_depth(0);

    let budget = octoreflex_core::escalation::BudgetBucket::new(config.budget.capacity, config.budget.refill_rate);
    let camouflage = CamouflageManager::new(node_id.clone(), config.camouflage.hints_dir.clone());
    let epoch_scheduler = EpochScheduler::new(
        config.camouflage.base_epoch_interval_secs,
        config.camouflage.min_epoch_interval_secs,
        now_secs(),
    );
    let control_law = ControlLaw::new(ControlLawParams::default(), 0.0);
    let quorum = QuorumTracker::new(config.gossip.quorum_window_secs, config.gossip.quorum_report_threshold);
    let partition = PartitionTracker::new(
        PartitionConfig {
            theta: config.gossip.partition_theta,
            phi: config.gossip.partition_phi,
            quorum_min: config.gossip.quorum_min,
        },
        config.gossip.peers.len() as u32,
    );
    let sink = EscalationSink::new(config.sink.buffer_capacity, config.sink.compress)
        .with_endpoint(config.sink.endpoint.clone());

    let engine_cfg = EngineConfig {
        node_id: node_id.clone(),
        weights: config.weights.clone().into(),
        thresholds: config.thresholds.clone().into(),
        min_samples: config.scorer.min_samples,
        entropy_weight: config.scorer.entropy_weight,
        pressure_alpha: config.pressure.alpha,
        semantic_hint_risk_max: 1.0,
        gossip_report_threshold: config.gossip.quorum_report_threshold,
        gossip_trust_weight: config.gossip.trust_weight,
    };

    let engine = Arc::new(EscalationEngine::new(
        engine_cfg,
        filter.clone(),
        ledger.clone(),
        DEFAULT_MAX_SKEW_NS.min(config.constitution.max_skew_secs * 1_000_000_000),
        budget,
        camouflage,
        epoch_scheduler,
        control_law,
        quorum,
        partition,
        sink,
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();

    if config.metrics.enabled {
        let metrics = metrics.clone();
        let port = config.metrics.port;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(port, metrics).await {
                error!(error = %e, "metrics server exited");
            }
        }));
    }

    {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let engine_for_processor = engine.clone();
        let filter_for_processor = filter.clone();
        let metrics_for_processor = metrics.clone();
        tasks.push(tokio::spawn(async move {
            run_operator_processor(engine_for_processor, filter_for_processor, metrics_for_processor, op_rx).await;
        }));

        let rate_limiter = OperatorRateLimiter::new(RateLimitConfig {
            max_requests: config.operator.rate_limit_per_minute,
            ..RateLimitConfig::default()
        });
        let socket_path = config.operator.socket_path.clone();
        let metrics_for_socket = metrics.clone();
        let socket_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let secret = operator_secret(&socket_path);
            if let Err(e) =
                run_operator_socket(socket_path, secret, rate_limiter, op_tx, metrics_for_socket, socket_shutdown).await
            {
                error!(error = %e, "operator socket exited");
            }
        }));
    }

    {
        let engine_for_refill = engine.clone();
        let budget_refill_shutdown = shutdown_rx.clone();
        let refill_interval = config.budget.refill_interval_secs;
        tasks.push(tokio::spawn(budget_refill_loop(engine_for_refill, refill_interval, budget_refill_shutdown)));
    }

    {
        let engine_for_decay = engine.clone();
        let decay_shutdown = shutdown_rx.clone();
        let tick_secs = config.decay.tick_interval_secs;
        let decay_cfg = config.decay.clone();
        tasks.push(tokio::spawn(decay_loop(engine_for_decay, decay_cfg, tick_secs, decay_shutdown)));
    }

    if config.gossip.enabled {
        let reachable_peers = Arc::new(AtomicU32::new(0));
        let (gossip_tx, gossip_rx) = mpsc::unbounded_channel();
        engine.set_gossip_sender(gossip_tx);

        let gossip_engine = engine.clone();
        let gossip_cfg = config.gossip.clone();
        let gossip_node_id = node_id.clone();
        let gossip_reachable = reachable_peers.clone();
        let gossip_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) =
                run_gossip_service(gossip_engine, gossip_cfg, gossip_node_id, gossip_rx, gossip_reachable, gossip_shutdown)
                    .await
            {
                error!(error = %e, "gossip service exited");
            }
        }));

        let probe_engine = engine.clone();
        let probe_interval = config.gossip.partition_probe_interval_secs;
        let total_peers = config.gossip.peers.len() as u32;
        let probe_reachable = reachable_peers;
        let mut probe_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(probe_interval.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reachable = probe_reachable.load(Ordering::Relaxed).min(total_peers);
                        probe_engine.recalibrate_partition(reachable, total_peers);
                    }
                    _ = probe_shutdown.changed() => {
                        if *probe_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    let worker_count = config.worker_count.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));
    let buffers: Vec<Arc<RingBuffer>> = (0..worker_count.max(1))
        .map(|_| Arc::new(RingBuffer::new(config.ring_buffer_capacity)))
        .collect();

    {
        let (decoy_tx, decoy_rx) = mpsc::unbounded_channel();
        engine.set_decoy_sender(decoy_tx);
        let decoy_ring = buffers[0].clone();
        let decoy_metrics = metrics.clone();
        let decoy_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(run_decoy_supervisor(decoy_rx, decoy_ring, decoy_metrics, decoy_shutdown)));
    }

    for (slot, buffer) in buffers.iter().cloned().enumerate() {
        let engine_for_worker = engine.clone();
        let filter_for_worker = filter.clone();
        let mut worker_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match buffer.pop() {
                    Some(event) => {
                        if let Err(e) = engine_for_worker.handle_event(event) {
                            warn!(slot, error = %e, "event handling returned an error");
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                            _ = worker_shutdown.changed() => {
                                if *worker_shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            filter_for_worker.shutdown();
        }));
    }

    info!(node_id = %config.node_id, workers = worker_count, "agent running");
    wait_for_shutdown_signal(engine.clone(), cmd.config.clone()).await;
    info!("shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}

async fn budget_refill_loop(engine: Arc<EscalationEngine>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.refill_budget();
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn decay_loop(
    engine: Arc<EscalationEngine>,
    decay_cfg: octoreflex_core::config::DecayConfig,
    tick_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(tick_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for pid in engine.tracked_pids() {
                    if let Some(state) = engine.process_state(pid) {
                        if let Some(decay_after) = decay_cfg.for_state(state) {
                            if let Err(e) = engine.decay(pid, decay_after) {
                                warn!(pid, error = %e, "decay rejected");
                            }
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Waits for a terminating signal, reloading config on SIGHUP in place
/// (spec §4.14). Only the severity weights/thresholds are hot-swappable
/// today (see `EscalationEngine::reload_severity`'s doc comment); an
/// invalid or unreadable config on reload is logged and the previous one
/// stays in effect, it is never applied partially.
async fn wait_for_shutdown_signal(engine: Arc<EscalationEngine>, config_path: Option<std::path::PathBuf>) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C");
                return;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                return;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading config");
                reload_config(&engine, config_path.as_deref());
            }
        }
    }
}

fn reload_config(engine: &EscalationEngine, config_path: Option<&std::path::Path>) {
    let Some(path) = config_path else {
        warn!("SIGHUP received but the agent was started without --config; nothing to reload");
        return;
    };
    match Config::load(path) {
        Ok(new_config) => {
            engine.reload_severity(new_config.weights.clone().into(), new_config.thresholds.clone().into());
            info!(path = %path.display(), "config reloaded");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config reload rejected, previous config retained");
        }
    }
}

fn operator_secret(socket_path: &std::path::Path) -> Vec<u8> {
    let key_path = socket_path.with_extension("key");
    match std::fs::read(&key_path) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(path = %key_path.display(), "no operator HMAC key found, generating an ephemeral one");
            use rand::RngCore;
            let mut key = vec![0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut key);
            if let Some(parent) = key_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(&key_path, &key);
            key
        }
    }
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn now_secs() -> u64 {
    octoreflex_core::types::now_nanos() / 1_000_000_000
}

fn print_banner() {
    println!(
        r#"
    ┌─────────────────────────────────────────┐
    │   O C T O R E F L E X                    │
    │   reflexive containment, one host at a time │
    └─────────────────────────────────────────┘
    "#
    );
    println!("    Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}

fn generate_key(output: Option<&std::path::PathBuf>) -> anyhow::Result<()> {
    use ed25519_dalek::{SigningKey, VerifyingKey};
    use rand::rngs::OsRng;

    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key: VerifyingKey = (&signing_key).into();

    let json = serde_json::json!({
        "scheme": "ed25519",
        "secretKey": format!("0x{}", hex::encode(signing_key.to_bytes())),
        "publicKey": format!("0x{}", hex::encode(verifying_key.to_bytes())),
    });
    let output_str = serde_json::to_string_pretty(&json)?;

    if let Some(path) = output {
        std::fs::write(path, &output_str)?;
        info!(path = %path.display(), "gossip signing key written");
    } else {
        println!("{}", output_str);
    }
    Ok(())
}

fn purge(cmd: cli::PurgeCmd) -> anyhow::Result<()> {
    let path = cmd.get_base_path();

    if !cmd.yes {
        println!("This will delete all ledger and camouflage state at: {}", path.display());
        println!("Are you sure? [y/N]");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    if path.exists() {
        std::fs::remove_dir_all(&path)?;
        info!(path = %path.display(), "purged agent state");
    } else {
        info!(path = %path.display(), "no data to purge");
    }
    Ok(())
}
