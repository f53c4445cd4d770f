// Escalation Engine (spec §4.6): the control loop tying every other
// component together. `HandleEvent` is the hot path; `Decay`/`Pin`/`Unpin`
// are the operator- and scheduler-facing entry points.
//
// Composition style — `Arc`-shared components, one exclusive lock per PID
// rather than a single global lock — follows `kratos-core/src/node/service.rs`'s
// `NodeService` (components held behind `Arc<RwLock<_>>`, `tracing` spans
// around state-changing operations).

use crate::actuators::actuators_for_state;
use crate::camouflage::{CamouflageManager, DecoyRotation, EpochScheduler};
use crate::constitution::{ConstitutionalValidator, Violation};
use crate::escalation::budget::{transition_cost, BudgetBucket};
use crate::escalation::feature::FeatureExtractor;
use crate::escalation::sink::{EscalationEvent, EscalationSink};
use crate::gossip::{PartitionTracker, QuorumTracker};
use crate::kernel::FilterContract;
use crate::ledger::{CanonicalInputs, DecisionFlag, DecisionRecord, LedgerStore};
use crate::metrics::Metrics;
use crate::pressure::PressureAccumulator;
use crate::scorer::Scorer;
use crate::severity::control_law::ControlLaw;
use crate::severity::{compose_severity, semantic_hint_boost, SeverityThresholds, SeverityWeights};
use crate::types::{now_nanos, Hash, IsolationState, KernelEvent, NodeId, Pid, ProcessState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("budget exhausted for pid {pid} targeting {target:?}")]
    BudgetExhausted { pid: Pid, target: IsolationState },
    #[error("constitutional violation: {0}")]
    ConstitutionalViolation(Violation),
    #[error(transparent)]
    Storage(#[from] crate::ledger::StorageError),
    #[error("actuator failed: {0}")]
    Actuator(#[from] crate::actuators::ActuatorError),
}

struct PidWorker {
    process: ProcessState,
    scorer: Scorer,
    pressure: PressureAccumulator,
    features: FeatureExtractor,
}

impl PidWorker {
    fn new(pid: Pid, now: u64, min_samples: u64, entropy_weight: f64, pressure_alpha: f64) -> Self {
        Self {
            process: ProcessState::new(pid, now),
            scorer: Scorer::new(min_samples, entropy_weight),
            pressure: PressureAccumulator::new(pressure_alpha),
            features: FeatureExtractor::new(now),
        }
    }
}

pub struct EngineConfig {
    pub node_id: NodeId,
    pub weights: SeverityWeights,
    pub thresholds: SeverityThresholds,
    pub min_samples: u64,
    pub entropy_weight: f64,
    pub pressure_alpha: f64,
    /// Ceiling `semantic_hint_boost` normalizes against. Must stay at 1.0
    /// so `I_t` lands in the `[0,1]` range the constitutional validator
    /// enforces; configurable only in case that validator bound changes.
    pub semantic_hint_risk_max: f64,
    /// `A_t` threshold above which a local observation is broadcast to
    /// gossip peers, mirroring `QuorumTracker`'s own report threshold
    /// (spec §4.9) so a node only gossips what it would itself count as a
    /// corroborating report.
    pub gossip_report_threshold: f64,
    /// Weight cap applied to a remote baseline contribution in
    /// `merge_remote_baseline` (spec §4.9 invariant P3).
    pub gossip_trust_weight: f64,
}

/// The subset of `EngineConfig` a SIGHUP reload (spec §4.14) is allowed to
/// change on a running engine: severity composition only. Per-PID scorer
/// parameters (`min_samples`, `entropy_weight`, `pressure_alpha`) are baked
/// into each `PidWorker` at creation and would need re-derivation for every
/// tracked PID to change safely mid-flight, so those still require a
/// restart — this mirrors the common daemon pattern of a reloadable subset
/// plus a restart-required remainder.
struct ReloadableSeverity {
    weights: SeverityWeights,
    thresholds: SeverityThresholds,
}

/// Ties every containment component together behind one exclusive
/// per-PID lock. The global `tip_hash` mutex serializes ledger commits so
/// `parent_hash` linkage is never built from a stale tip under
/// concurrent PID workers.
pub struct EscalationEngine {
    cfg: EngineConfig,
    severity: std::sync::RwLock<ReloadableSeverity>,
    workers: DashMap<Pid, Mutex<PidWorker>>,
    filter: FilterContract,
    ledger: Arc<LedgerStore>,
    validator: ConstitutionalValidator,
    budget: BudgetBucket,
    camouflage: Mutex<CamouflageManager>,
    epoch_scheduler: Mutex<EpochScheduler>,
    /// Set post-construction via [`Self::set_decoy_sender`] once the
    /// binary has spawned `camouflage::run_decoy_supervisor`; `None`
    /// before then (and in tests), in which case rotations simply don't
    /// spawn a decoy.
    decoy_tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<DecoyRotation>>>,
    control_law: Mutex<ControlLaw>,
    quorum: Mutex<QuorumTracker>,
    partition: Mutex<PartitionTracker>,
    sink: EscalationSink,
    metrics: Arc<Metrics>,
    tip_hash: Mutex<Hash>,
    decisions_committed: AtomicU64,
    /// Set post-construction via [`Self::set_gossip_sender`] once the
    /// binary has spawned `gossip::run_gossip_service`; `None` before then
    /// (and in tests), in which case locally-observed anomalies simply
    /// aren't broadcast to peers.
    gossip_tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<crate::gossip::GossipPayload>>>,
}

impl EscalationEngine {
    pub fn new(
        cfg: EngineConfig,
        filter: FilterContract,
        ledger: Arc<LedgerStore>,
        max_skew_ns: u64,
        budget: BudgetBucket,
        camouflage: CamouflageManager,
        epoch_scheduler: EpochScheduler,
        control_law: ControlLaw,
        quorum: QuorumTracker,
        partition: PartitionTracker,
        sink: EscalationSink,
        metrics: Arc<Metrics>,
    ) -> Self {
        let tip_hash = ledger.tip_hash().unwrap_or(Hash::ZERO);
        let severity = std::sync::RwLock::new(ReloadableSeverity {
            weights: cfg.weights.clone(),
            thresholds: cfg.thresholds.clone(),
        });
        Self {
            cfg,
            severity,
            workers: DashMap::new(),
            filter,
            ledger,
            validator: ConstitutionalValidator::new(max_skew_ns),
            budget,
            camouflage: Mutex::new(camouflage),
            epoch_scheduler: Mutex::new(epoch_scheduler),
            decoy_tx: Mutex::new(None),
            control_law: Mutex::new(control_law),
            quorum: Mutex::new(quorum),
            partition: Mutex::new(partition),
            sink,
            metrics,
            tip_hash: Mutex::new(tip_hash),
            decisions_committed: AtomicU64::new(0),
            gossip_tx: Mutex::new(None),
        }
    }

    /// Wires in the channel the background decoy supervisor listens on.
    /// Call once at startup after spawning `camouflage::run_decoy_supervisor`.
    pub fn set_decoy_sender(&self, tx: tokio::sync::mpsc::UnboundedSender<DecoyRotation>) {
        *self.decoy_tx.lock().expect("decoy_tx mutex poisoned") = Some(tx);
    }

    /// Wires in the channel the background gossip service publishes
    /// outgoing envelopes through. Call once at startup after spawning
    /// `gossip::run_gossip_service`.
    pub fn set_gossip_sender(&self, tx: tokio::sync::mpsc::UnboundedSender<crate::gossip::GossipPayload>) {
        *self.gossip_tx.lock().expect("gossip_tx mutex poisoned") = Some(tx);
    }

    /// Applies an anomaly observation a peer gossiped to us (spec §4.9):
    /// feeds the local quorum tracker the same way a local observation
    /// would, so `q_t` reflects corroboration across the mesh rather than
    /// just this node's own reports.
    pub fn record_remote_observation(&self, pid: Pid, node: NodeId, a_t: f64, now_secs: u64) {
        let mut quorum = self.quorum.lock().expect("quorum mutex poisoned");
        quorum.record_observation(pid, node, a_t, now_secs);
    }

    /// Applies a baseline a peer gossiped to us (spec §4.9 federated
    /// baseline merge). Creates the `PidWorker` if this node has not yet
    /// observed `pid` itself, so a freshly joined node can seed its
    /// scorer from the mesh instead of waiting out `min_samples` alone.
    /// Silently ignores a mean vector of the wrong dimension rather than
    /// panicking — a malformed remote payload should not take down the
    /// local engine.
    pub fn merge_remote_baseline(&self, pid: Pid, now: u64, feature_mean: &[f64], sample_count: u64) {
        let Ok(mean): Result<crate::scorer::ScoreFeature, _> = feature_mean.to_vec().try_into() else {
            warn!(pid, len = feature_mean.len(), "remote baseline has wrong feature dimension, ignored");
            return;
        };
        let worker_ref = self.worker_entry(pid, now);
        let mut worker = worker_ref.lock().expect("pid worker mutex poisoned");
        worker.scorer.merge_remote(mean, sample_count, self.cfg.gossip_trust_weight);
    }

    fn worker_entry(&self, pid: Pid, now: u64) -> dashmap::mapref::one::Ref<'_, Pid, Mutex<PidWorker>> {
        self.workers.entry(pid).or_insert_with(|| {
            Mutex::new(PidWorker::new(
                pid,
                now,
                self.cfg.min_samples,
                self.cfg.entropy_weight,
                self.cfg.pressure_alpha,
            ))
        });
        self.workers.get(&pid).expect("just inserted")
    }

    /// Records the semantic-hint risk level last published for this PID's
    /// most recent connect target, if any, as `I_t` (spec §4.1/§4.6).
    fn integrity_term(&self, event: &KernelEvent, now_ns: u64) -> f64 {
        let target = event.comm_str();
        match self.filter.semantic_hint(&target, now_ns) {
            Some(hint) => semantic_hint_boost(hint.risk_level, self.cfg.semantic_hint_risk_max),
            None => 0.0,
        }
    }

    /// The hot path, spec §4.6's 11-step algorithm. Every step after
    /// "score and compose severity" that can fail returns an `EngineError`
    /// and the caller is expected to log and continue to the next event —
    /// a denial or violation is itself a recorded outcome, not a crash.
    #[instrument(skip(self, event), fields(pid = event.pid))]
    pub fn handle_event(&self, event: KernelEvent) -> Result<(), EngineError> {
        let now = now_nanos();
        let pid = event.pid;
        self.metrics.inc_events_processed();

        let worker_ref = self.worker_entry(pid, now);
        let mut worker = worker_ref.lock().expect("pid worker mutex poisoned");
        worker.process.touch(now);

        let (feature, entropy_delta) = worker.features.observe(&event);
        let a_t = worker.scorer.observe(&feature, entropy_delta);
        let p_t = worker.pressure.update(a_t);

        let now_secs = now / 1_000_000_000;
        {
            let mut quorum = self.quorum.lock().expect("quorum mutex poisoned");
            quorum.record_observation(pid, self.cfg.node_id.clone(), a_t, now_secs);
        }
        if a_t > self.cfg.gossip_report_threshold {
            let tx = self.gossip_tx.lock().expect("gossip_tx mutex poisoned");
            if let Some(tx) = tx.as_ref() {
                let _ = tx.send(crate::gossip::GossipPayload::AnomalyObservation {
                    pid,
                    a_t,
                    state: worker.process.state.as_u8(),
                });
            }
        }
        let q_eff = self.partition.lock().expect("partition mutex poisoned").state().effective_quorum_min;
        let q_t = self.quorum.lock().expect("quorum mutex poisoned").q_t(pid, q_eff, now_secs);
        let i_t = self.integrity_term(&event, now);

        let (weights, thresholds) = {
            let s = self.severity.read().expect("severity config lock poisoned");
            (s.weights, s.thresholds)
        };
        let severity = compose_severity(&weights, a_t, q_t, i_t, p_t);
        let from_state = worker.process.state;
        let target_state = thresholds.target_state(severity);

        {
            let mut cl = self.control_law.lock().expect("control law mutex poisoned");
            let m_t = cl.step(severity, from_state);
            let mut sched = self.epoch_scheduler.lock().expect("epoch scheduler mutex poisoned");
            if sched.maybe_advance(now_secs, m_t) {
                let mut cam = self.camouflage.lock().expect("camouflage mutex poisoned");
                let old_port = cam.port_before(pid);
                if let Ok(action) = cam.activate(pid, sched.epoch(), now_secs) {
                    self.metrics.inc_camouflage_rotation();
                    info!(pid, epoch = action.epoch, port = action.bind_port, "camouflage rotated");
                    if let Some(old_port) = old_port {
                        if old_port != action.bind_port {
                            let tx = self.decoy_tx.lock().expect("decoy_tx mutex poisoned");
                            if let Some(tx) = tx.as_ref() {
                                let _ = tx.send(DecoyRotation { pid, old_port });
                            }
                        }
                    }
                }
            }
        }

        if worker.process.pinned || target_state <= from_state {
            return Ok(());
        }

        // Invariant G1 / spec §4.6 step 5: budget gating only applies
        // beyond PRESSURE. A NORMAL->PRESSURE escalation always commits
        // regardless of budget state, so PRESSURE itself never consumes
        // or is denied for lack of tokens.
        let cost = transition_cost(from_state, target_state);
        let gated = cost > crate::escalation::budget::default_cost(IsolationState::Pressure);
        if gated && !self.budget.try_consume(cost) {
            self.metrics.inc_budget_exhausted();
            self.metrics.set_budget_tokens_available(self.budget.balance() as i64);
            self.record_denial(pid, from_state, severity, a_t, q_t, i_t, p_t, now, DecisionFlag::BudgetExhausted)?;
            return Err(EngineError::BudgetExhausted { pid, target: target_state });
        }

        let inputs = CanonicalInputs {
            pid,
            from_state: from_state.as_u8(),
            to_state: target_state.as_u8(),
            severity,
            a_t,
            q_t,
            i_t,
            p_t,
            timestamp_ns: now,
            operator_id: None,
            justification_len: None,
        };

        if let Err(violation) = self.validator.validate(&inputs, false) {
            if gated {
                self.budget.refund(cost);
            }
            self.commit_record(&inputs, DecisionFlag::ConstitutionalViolation, true)?;
            self.metrics.inc_constitutional_violation();
            warn!(pid, %violation, "constitutional violation, transition rejected");
            return Err(EngineError::ConstitutionalViolation(violation));
        }

        let committed = self.commit_record(&inputs, DecisionFlag::Escalation, false)?;

        worker.process.commit_state(target_state, now);
        self.filter.set_process_state(pid, target_state);
        self.metrics.observe_transition(from_state, target_state);
        self.metrics.set_budget_tokens_available(self.budget.balance() as i64);

        for actuator in actuators_for_state(target_state) {
            if let Err(e) = actuator.apply(pid) {
                warn!(pid, error = %e, "actuator application failed, state transition stands");
            }
        }

        if self
            .sink
            .push(EscalationEvent {
                pid,
                comm: event.comm_str(),
                old_state: from_state,
                new_state: target_state,
                severity,
                m_t: self.control_law.lock().expect("control law mutex poisoned").m_t(),
                timestamp: now,
                node_id: self.cfg.node_id.clone(),
                decision_hash: committed.decision_hash,
                parent_hash: committed.parent_hash,
            })
            .is_some()
        {
            self.metrics.inc_sink_dropped("buffer_full");
        }
        self.metrics.set_sink_buffered(self.sink.buffered());

        Ok(())
    }

    fn record_denial(
        &self,
        pid: Pid,
        from_state: IsolationState,
        severity: f64,
        a_t: f64,
        q_t: f64,
        i_t: f64,
        p_t: f64,
        now: u64,
        flag: DecisionFlag,
    ) -> Result<(), EngineError> {
        let inputs = CanonicalInputs {
            pid,
            from_state: from_state.as_u8(),
            to_state: from_state.as_u8(),
            severity,
            a_t,
            q_t,
            i_t,
            p_t,
            timestamp_ns: now,
            operator_id: None,
            justification_len: None,
        };
        self.commit_record(&inputs, flag, false).map(|_| ())
    }

    fn commit_record(
        &self,
        inputs: &CanonicalInputs,
        flag: DecisionFlag,
        violation: bool,
    ) -> Result<DecisionRecord, EngineError> {
        let mut tip = self.tip_hash.lock().expect("tip hash mutex poisoned");
        let record = DecisionRecord::new(inputs, *tip, flag, violation);
        // Invariant L1: fsync to the ledger before the filter-map update
        // that callers apply after this returns.
        self.ledger.append(&record)?;
        *tip = record.decision_hash;
        self.validator.record_commit(&record);
        self.decisions_committed.fetch_add(1, Ordering::Relaxed);
        self.metrics.set_chain_depth(self.validator.counters.chain_depth.load(Ordering::Relaxed));
        self.metrics.inc_decision_verified();
        Ok(record)
    }

    /// Cool-down: steps a PID's state down by exactly one level if it has
    /// been quiescent at least `decay_after_secs`. Never called on
    /// `TERMINATED`. Resets the pressure accumulator when the PID returns
    /// to `NORMAL` (spec §4.6).
    #[instrument(skip(self))]
    pub fn decay(&self, pid: Pid, decay_after_secs: u64) -> Result<bool, EngineError> {
        let now = now_nanos();
        let Some(worker_ref) = self.workers.get(&pid) else {
            return Ok(false);
        };
        let mut worker = worker_ref.lock().expect("pid worker mutex poisoned");

        if worker.process.state.is_terminal() || worker.process.pinned {
            return Ok(false);
        }
        let quiescent_secs = worker.process.quiescence(now) / 1_000_000_000;
        if quiescent_secs < decay_after_secs {
            return Ok(false);
        }
        let Some(new_state) = worker.process.state.step_down() else {
            return Ok(false);
        };

        let inputs = CanonicalInputs {
            pid,
            from_state: worker.process.state.as_u8(),
            to_state: new_state.as_u8(),
            severity: 0.0,
            a_t: 0.0,
            q_t: 0.0,
            i_t: 0.0,
            p_t: worker.pressure.value(),
            timestamp_ns: now,
            operator_id: None,
            justification_len: None,
        };
        if let Err(violation) = self.validator.validate(&inputs, true) {
            warn!(pid, %violation, "decay rejected by constitutional validator");
            return Err(EngineError::ConstitutionalViolation(violation));
        }

        let from_state = worker.process.state;
        self.commit_record(&inputs, DecisionFlag::Decay, false)?;
        worker.process.commit_state(new_state, now);
        self.filter.set_process_state(pid, new_state);
        self.metrics.observe_transition(from_state, new_state);
        if new_state == IsolationState::Normal {
            worker.pressure.reset();
            worker.scorer.reset();
        }
        Ok(true)
    }

    /// Operator override (spec §4.13): forces `pid` to `state` and pins it
    /// so automatic escalation stops moving it until `unpin`.
    #[instrument(skip(self))]
    pub fn pin(&self, pid: Pid, state: IsolationState) -> Result<(), EngineError> {
        let now = now_nanos();
        let worker_ref = self.worker_entry(pid, now);
        let mut worker = worker_ref.lock().expect("pid worker mutex poisoned");

        let from_state = worker.process.state;
        let inputs = CanonicalInputs {
            pid,
            from_state: from_state.as_u8(),
            to_state: state.as_u8(),
            severity: 0.0,
            a_t: 0.0,
            q_t: 0.0,
            i_t: 0.0,
            p_t: worker.pressure.value(),
            timestamp_ns: now,
            operator_id: None,
            justification_len: None,
        };
        self.commit_record(&inputs, DecisionFlag::OperatorOverride, false)?;
        worker.process.commit_state(state, now);
        worker.process.pinned = true;
        self.filter.set_process_state(pid, state);
        self.metrics.observe_transition(from_state, state);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn unpin(&self, pid: Pid) {
        if let Some(worker_ref) = self.workers.get(&pid) {
            worker_ref.lock().expect("pid worker mutex poisoned").process.pinned = false;
        }
    }

    /// Operator reset (spec §4.13): forces the PID back to `NORMAL`,
    /// clearing the scorer/pressure history and any pin. The canonical
    /// inputs record `operator_id` (the HMAC key identity that
    /// authenticated the request) and the byte length of the
    /// justification token the operator supplied, so an override is
    /// distinguishable from any other reset in the audit chain without
    /// the justification text itself becoming part of the hashed record.
    #[instrument(skip(self, justification))]
    pub fn reset(&self, pid: Pid, operator_id: &str, justification: &str) -> Result<(), EngineError> {
        let now = now_nanos();
        let Some(worker_ref) = self.workers.get(&pid) else {
            return Ok(());
        };
        let mut worker = worker_ref.lock().expect("pid worker mutex poisoned");
        let from_state = worker.process.state;
        if from_state == IsolationState::Normal {
            return Ok(());
        }
        let inputs = CanonicalInputs {
            pid,
            from_state: from_state.as_u8(),
            to_state: IsolationState::Normal.as_u8(),
            severity: 0.0,
            a_t: 0.0,
            q_t: 0.0,
            i_t: 0.0,
            p_t: 0.0,
            timestamp_ns: now,
            operator_id: Some(operator_id.to_string()),
            justification_len: Some(justification.len() as u32),
        };
        self.commit_record(&inputs, DecisionFlag::OperatorReset, false)?;
        worker.process.commit_state(IsolationState::Normal, now);
        worker.process.pinned = false;
        worker.pressure.reset();
        worker.scorer.reset();
        self.filter.set_process_state(pid, IsolationState::Normal);
        self.metrics.observe_transition(from_state, IsolationState::Normal);
        Ok(())
    }

    pub fn process_state(&self, pid: Pid) -> Option<IsolationState> {
        self.workers.get(&pid).map(|w| w.lock().expect("pid worker mutex poisoned").process.state)
    }

    pub fn recalibrate_partition(&self, reachable_peers: u32, total_peers: u32) {
        let mut partition = self.partition.lock().expect("partition mutex poisoned");
        if let Some(state) = partition.probe(reachable_peers, total_peers) {
            self.metrics.set_partition_mode(matches!(state.mode, crate::gossip::PartitionMode::Partitioned));
            self.metrics.set_partition_effective_quorum_min(state.effective_quorum_min);
        }
    }

    pub fn tracked_pids(&self) -> Vec<Pid> {
        self.workers.iter().map(|e| *e.key()).collect()
    }

    /// One tick of the budget refill schedule (spec §3's periodic refill).
    /// Called by the binary's `budget_refill_loop`.
    pub fn refill_budget(&self) {
        self.budget.refill_tick();
        self.metrics.set_budget_tokens_available(self.budget.balance() as i64);
    }

    pub fn decisions_committed(&self) -> u64 {
        self.decisions_committed.load(Ordering::Relaxed)
    }

    /// Applies a SIGHUP config reload (spec §4.14) to the severity
    /// composition knobs. Callers must validate the new config (strictly
    /// increasing thresholds, non-negative weights) before calling this —
    /// an invalid config is rejected upstream and the previous one stays
    /// in effect, so this method itself never fails.
    pub fn reload_severity(&self, weights: SeverityWeights, thresholds: SeverityThresholds) {
        let mut s = self.severity.write().expect("severity config lock poisoned");
        s.weights = weights;
        s.thresholds = thresholds;
        info!("severity weights/thresholds reloaded");
    }

    pub fn current_weights(&self) -> SeverityWeights {
        self.severity.read().expect("severity config lock poisoned").weights
    }

    pub fn current_thresholds(&self) -> SeverityThresholds {
        self.severity.read().expect("severity config lock poisoned").thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camouflage::CamouflageManager;
    use crate::escalation::budget::BudgetBucket;
    use crate::escalation::sink::EscalationSink;
    use crate::gossip::{PartitionConfig, PartitionTracker, QuorumTracker};
    use crate::kernel::FilterContract;
    use crate::ledger::LedgerStore;
    use crate::severity::control_law::{ControlLaw, ControlLawParams};
    use tempfile::TempDir;

    fn make_engine(dir: &TempDir) -> EscalationEngine {
        let cfg = EngineConfig {
            node_id: NodeId::from("test-node"),
            weights: SeverityWeights::default(),
            thresholds: SeverityThresholds::default(),
            min_samples: 0,
            entropy_weight: 0.0,
            pressure_alpha: 0.0,
            semantic_hint_risk_max: 1.0,
            gossip_report_threshold: 5.0,
            gossip_trust_weight: 0.3,
        };
        let filter = FilterContract::new(1);
        let ledger = Arc::new(LedgerStore::open(dir.path()).unwrap());
        let budget = BudgetBucket::new(1000, 0);
        let camouflage = CamouflageManager::new(NodeId::from("test-node"), dir.path().join("hints"));
        let epoch_scheduler = EpochScheduler::new(300, 15, 0);
        let control_law = ControlLaw::new(ControlLawParams::default(), 0.0);
        let quorum = QuorumTracker::new(60, 5.0);
        let partition = PartitionTracker::new(PartitionConfig::default(), 1);
        let sink = EscalationSink::new(100, false);
        let metrics = Arc::new(Metrics::new());

        EscalationEngine::new(
            cfg, filter, ledger, 5_000_000_000, budget, camouflage, epoch_scheduler,
            control_law, quorum, partition, sink, metrics,
        )
    }

    fn event(pid: u32, syscall_id: u32, ts: u64) -> KernelEvent {
        KernelEvent {
            pid,
            comm: [0u8; 16],
            syscall_id,
            timestamp_ns: ts,
            entropy_hint: 60000,
            integrity_hint: 255,
            cpu: 0,
        }
    }

    #[test]
    fn handle_event_does_not_escalate_quiet_traffic() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        for i in 0..5 {
            engine.handle_event(event(100, 1, i * 1_000_000_000)).unwrap();
        }
        assert_eq!(engine.process_state(100), Some(IsolationState::Normal));
    }

    #[test]
    fn pin_forces_state_and_blocks_escalation() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        engine.pin(200, IsolationState::Frozen).unwrap();
        assert_eq!(engine.process_state(200), Some(IsolationState::Frozen));
        engine.handle_event(event(200, 1, 0)).unwrap();
        assert_eq!(engine.process_state(200), Some(IsolationState::Frozen));
    }

    #[test]
    fn unpin_allows_decay_to_resume() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        engine.pin(300, IsolationState::Isolated).unwrap();
        engine.unpin(300);
        assert!(engine.decay(300, 0).unwrap());
        assert_eq!(engine.process_state(300), Some(IsolationState::Normal));
    }

    #[test]
    fn decay_never_runs_from_terminated() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        engine.pin(400, IsolationState::Terminated).unwrap();
        engine.unpin(400);
        assert!(!engine.decay(400, 0).unwrap());
        assert_eq!(engine.process_state(400), Some(IsolationState::Terminated));
    }

    #[test]
    fn reload_severity_takes_effect_on_next_event() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);

        let original = engine.current_thresholds();
        assert_eq!(original.t_pressure, SeverityThresholds::default().t_pressure);

        let reloaded = SeverityThresholds {
            t_pressure: 0.0,
            ..original
        };
        engine.reload_severity(engine.current_weights(), reloaded);
        assert_eq!(engine.current_thresholds().t_pressure, 0.0);

        // With t_pressure lowered to 0.0, any nonnegative severity now
        // crosses PRESSURE, so even the zeroed-out synthetic event escalates.
        engine.handle_event(event(600, 1, 0)).unwrap();
        assert_eq!(engine.process_state(600), Some(IsolationState::Pressure));
    }

    #[test]
    fn reset_clears_pin_and_history() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        engine.pin(500, IsolationState::Quarantined).unwrap();
        engine.reset(500, "operator-alice", "confirmed false positive").unwrap();
        assert_eq!(engine.process_state(500), Some(IsolationState::Normal));
    }

    #[test]
    fn reset_records_operator_identity_and_justification_length() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        engine.pin(510, IsolationState::Isolated).unwrap();
        engine.reset(510, "operator-bob", "known-good binary").unwrap();

        let reset_record = engine
            .ledger
            .iter_all()
            .find(|r| r.pid == 510 && r.flag == DecisionFlag::OperatorReset)
            .expect("reset record committed");
        let haystack = reset_record.inputs_canonical;
        let needle = b"operator-bob";
        assert!(
            haystack.windows(needle.len()).any(|w| w == needle),
            "canonical inputs should carry the operator identity"
        );
    }

    fn make_engine_with_thresholds_and_budget(
        dir: &TempDir,
        thresholds: SeverityThresholds,
        capacity: u64,
    ) -> EscalationEngine {
        let cfg = EngineConfig {
            node_id: NodeId::from("test-node"),
            weights: SeverityWeights::default(),
            thresholds,
            min_samples: 0,
            entropy_weight: 0.0,
            pressure_alpha: 0.0,
            semantic_hint_risk_max: 1.0,
            gossip_report_threshold: 5.0,
            gossip_trust_weight: 0.3,
        };
        let filter = FilterContract::new(1);
        let ledger = Arc::new(LedgerStore::open(dir.path()).unwrap());
        let budget = BudgetBucket::new(capacity, 0);
        let camouflage = CamouflageManager::new(NodeId::from("test-node"), dir.path().join("hints"));
        let epoch_scheduler = EpochScheduler::new(300, 15, 0);
        let control_law = ControlLaw::new(ControlLawParams::default(), 0.0);
        let quorum = QuorumTracker::new(60, 5.0);
        let partition = PartitionTracker::new(PartitionConfig::default(), 1);
        let sink = EscalationSink::new(100, false);
        let metrics = Arc::new(Metrics::new());

        EscalationEngine::new(
            cfg, filter, ledger, 5_000_000_000, budget, camouflage, epoch_scheduler,
            control_law, quorum, partition, sink, metrics,
        )
    }

    #[test]
    fn pressure_escalation_commits_even_with_an_exhausted_budget() {
        let dir = TempDir::new().unwrap();
        let thresholds = SeverityThresholds {
            t_pressure: -1.0,
            ..SeverityThresholds::default()
        };
        let engine = make_engine_with_thresholds_and_budget(&dir, thresholds, 0);
        engine.handle_event(event(700, 1, 0)).unwrap();
        assert_eq!(engine.process_state(700), Some(IsolationState::Pressure));
    }

    #[test]
    fn escalation_beyond_pressure_is_still_budget_gated() {
        let dir = TempDir::new().unwrap();
        let thresholds = SeverityThresholds {
            t_pressure: -2.0,
            t_isolated: -1.0,
            ..SeverityThresholds::default()
        };
        let engine = make_engine_with_thresholds_and_budget(&dir, thresholds, 0);
        let result = engine.handle_event(event(710, 1, 0));
        assert!(matches!(result, Err(EngineError::BudgetExhausted { .. })));
        assert_eq!(engine.process_state(710), Some(IsolationState::Normal));
    }

    #[test]
    fn remote_observation_contributes_toward_quorum() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        engine.handle_event(event(800, 1, 0)).unwrap();
        engine.record_remote_observation(800, NodeId::from("peer-b"), 999.0, 0);
        let q_eff = engine.partition.lock().unwrap().state().effective_quorum_min;
        let q_t = engine.quorum.lock().unwrap().q_t(800, q_eff, 0);
        assert_eq!(q_t, 1.0, "self observation plus one corroborating peer should trip quorum");
    }

    #[test]
    fn merge_remote_baseline_seeds_a_pid_this_node_has_not_observed() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        assert_eq!(engine.process_state(900), None);
        engine.merge_remote_baseline(900, 0, &[1.0, 2.0, 3.0, 4.0], 50);
        assert_eq!(engine.process_state(900), Some(IsolationState::Normal));
    }

    #[test]
    fn merge_remote_baseline_ignores_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        engine.merge_remote_baseline(910, 0, &[1.0, 2.0], 50);
        assert_eq!(engine.process_state(910), None, "malformed payload must not create a worker");
    }

    #[test]
    fn recalibrate_partition_updates_effective_quorum_min() {
        let dir = TempDir::new().unwrap();
        let engine = make_engine(&dir);
        // theta=0.5, phi=0.5, quorum_min=2 (PartitionConfig::default()); with
        // 1 of 4 peers reachable, r/n = 0.25 < theta, so the mesh is judged
        // partitioned and Q_eff recomputes to max(1, floor(r*phi)) = 1.
        engine.recalibrate_partition(1, 4);
        assert_eq!(
            engine.partition.lock().unwrap().state().effective_quorum_min,
            1
        );
    }
}
