//! Observability surface (AMBIENT per SPEC_FULL.md §2.1).
//!
//! Grounded on `kratos-dns-seed/src/api/metrics.rs`'s `Metrics` struct:
//! plain `AtomicU64` counters/gauges, a hand-rolled `to_prometheus()`
//! exposition format, and a parallel `to_json()` — kept over pulling in
//! the `prometheus` crate (DESIGN.md substitution #2), since the teacher
//! never reaches for that crate either.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

mod server;
pub use server::{run_metrics_server, MetricsState};

/// Node-wide counters and gauges. One instance per running agent, shared
/// behind an `Arc` with every subsystem that updates it.
pub struct Metrics {
    start_time: Instant,

    pub events_processed_total: AtomicU64,
    pub events_dropped_total: AtomicU64,

    pub transitions_normal_to_pressure_total: AtomicU64,
    pub transitions_pressure_to_isolated_total: AtomicU64,
    pub transitions_isolated_to_frozen_total: AtomicU64,
    pub transitions_frozen_to_quarantined_total: AtomicU64,
    pub transitions_quarantined_to_terminated_total: AtomicU64,
    pub transitions_decayed_total: AtomicU64,

    pub budget_exhausted_total: AtomicU64,
    pub budget_tokens_available: AtomicI64,

    pub constitutional_violations_total: AtomicU64,
    pub decisions_verified_total: AtomicU64,
    pub chain_depth: AtomicU64,

    pub gossip_envelopes_accepted_total: AtomicU64,
    pub gossip_envelopes_rejected_total: AtomicU64,
    pub quorum_hot_pids: AtomicU64,
    pub partition_mode_is_partitioned: AtomicU64,
    pub partition_effective_quorum_min: AtomicU64,

    pub camouflage_rotations_total: AtomicU64,
    pub camouflage_decoy_hits_total: AtomicU64,

    pub sink_buffered: AtomicU64,
    pub sink_dropped_total: AtomicU64,
    pub sink_delivered_total: AtomicU64,

    pub operator_commands_total: AtomicU64,
    pub operator_commands_rejected_total: AtomicU64,

    pub ledger_depth: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            events_processed_total: AtomicU64::new(0),
            events_dropped_total: AtomicU64::new(0),
            transitions_normal_to_pressure_total: AtomicU64::new(0),
            transitions_pressure_to_isolated_total: AtomicU64::new(0),
            transitions_isolated_to_frozen_total: AtomicU64::new(0),
            transitions_frozen_to_quarantined_total: AtomicU64::new(0),
            transitions_quarantined_to_terminated_total: AtomicU64::new(0),
            transitions_decayed_total: AtomicU64::new(0),
            budget_exhausted_total: AtomicU64::new(0),
            budget_tokens_available: AtomicI64::new(0),
            constitutional_violations_total: AtomicU64::new(0),
            decisions_verified_total: AtomicU64::new(0),
            chain_depth: AtomicU64::new(0),
            gossip_envelopes_accepted_total: AtomicU64::new(0),
            gossip_envelopes_rejected_total: AtomicU64::new(0),
            quorum_hot_pids: AtomicU64::new(0),
            partition_mode_is_partitioned: AtomicU64::new(0),
            partition_effective_quorum_min: AtomicU64::new(0),
            camouflage_rotations_total: AtomicU64::new(0),
            camouflage_decoy_hits_total: AtomicU64::new(0),
            sink_buffered: AtomicU64::new(0),
            sink_dropped_total: AtomicU64::new(0),
            sink_delivered_total: AtomicU64::new(0),
            operator_commands_total: AtomicU64::new(0),
            operator_commands_rejected_total: AtomicU64::new(0),
            ledger_depth: AtomicU64::new(0),
        }
    }
}

macro_rules! inc {
    ($name:ident, $field:ident) => {
        pub fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    inc!(inc_events_processed, events_processed_total);
    inc!(inc_events_dropped, events_dropped_total);
    inc!(inc_budget_exhausted, budget_exhausted_total);
    inc!(inc_constitutional_violation, constitutional_violations_total);
    inc!(inc_decision_verified, decisions_verified_total);
    inc!(inc_gossip_accepted, gossip_envelopes_accepted_total);
    inc!(inc_gossip_rejected, gossip_envelopes_rejected_total);
    inc!(inc_camouflage_rotation, camouflage_rotations_total);
    inc!(inc_camouflage_decoy_hit, camouflage_decoy_hits_total);
    inc!(inc_sink_delivered, sink_delivered_total);
    inc!(inc_operator_command, operator_commands_total);
    inc!(inc_operator_command_rejected, operator_commands_rejected_total);

    pub fn observe_transition(&self, from: crate::types::IsolationState, to: crate::types::IsolationState) {
        use crate::types::IsolationState::*;
        let counter = match (from, to) {
            (Normal, Pressure) => &self.transitions_normal_to_pressure_total,
            (Pressure, Isolated) => &self.transitions_pressure_to_isolated_total,
            (Isolated, Frozen) => &self.transitions_isolated_to_frozen_total,
            (Frozen, Quarantined) => &self.transitions_frozen_to_quarantined_total,
            (Quarantined, Terminated) => &self.transitions_quarantined_to_terminated_total,
            _ if to < from => &self.transitions_decayed_total,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_budget_tokens_available(&self, v: i64) {
        self.budget_tokens_available.store(v, Ordering::Relaxed);
    }

    pub fn set_chain_depth(&self, v: u64) {
        self.chain_depth.store(v, Ordering::Relaxed);
    }

    pub fn set_quorum_hot_pids(&self, v: u64) {
        self.quorum_hot_pids.store(v, Ordering::Relaxed);
    }

    pub fn set_partition_mode(&self, partitioned: bool) {
        self.partition_mode_is_partitioned
            .store(partitioned as u64, Ordering::Relaxed);
    }

    pub fn set_partition_effective_quorum_min(&self, v: u32) {
        self.partition_effective_quorum_min.store(v as u64, Ordering::Relaxed);
    }

    pub fn set_sink_buffered(&self, v: u64) {
        self.sink_buffered.store(v, Ordering::Relaxed);
    }

    pub fn inc_sink_dropped(&self, _reason: &str) {
        // Reason labels are folded into a single counter for now; the
        // Prometheus exposition below keeps the metric name stable so a
        // labeled variant can be swapped in without breaking dashboards.
        self.sink_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_ledger_depth(&self, v: u64) {
        self.ledger_depth.store(v, Ordering::Relaxed);
    }

    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        macro_rules! gauge {
            ($metric:expr, $help:expr, $value:expr) => {
                out.push_str(&format!(
                    "# HELP {m} {h}\n# TYPE {m} gauge\n{m} {v}\n\n",
                    m = $metric,
                    h = $help,
                    v = $value
                ));
            };
        }
        macro_rules! counter {
            ($metric:expr, $help:expr, $value:expr) => {
                out.push_str(&format!(
                    "# HELP {m} {h}\n# TYPE {m} counter\n{m} {v}\n\n",
                    m = $metric,
                    h = $help,
                    v = $value
                ));
            };
        }

        gauge!(
            "octoreflex_uptime_seconds",
            "Agent uptime in seconds",
            self.uptime_secs()
        );
        counter!(
            "octoreflex_events_processed_total",
            "Kernel events processed",
            self.events_processed_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_events_dropped_total",
            "Kernel events dropped (ring buffer overflow)",
            self.events_dropped_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_transitions_decayed_total",
            "Cool-down state decrements",
            self.transitions_decayed_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_budget_exhausted_total",
            "Escalations denied by the budget gate",
            self.budget_exhausted_total.load(Ordering::Relaxed)
        );
        gauge!(
            "octoreflex_budget_tokens_available",
            "Tokens currently available in the budget bucket",
            self.budget_tokens_available.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_constitutional_violations_total",
            "Decisions rejected by the constitutional validator",
            self.constitutional_violations_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_decisions_verified_total",
            "Decision records appended to the ledger",
            self.decisions_verified_total.load(Ordering::Relaxed)
        );
        gauge!(
            "octoreflex_chain_depth",
            "Depth of the decision hash chain",
            self.chain_depth.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_gossip_envelopes_accepted_total",
            "Gossip envelopes accepted",
            self.gossip_envelopes_accepted_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_gossip_envelopes_rejected_total",
            "Gossip envelopes rejected",
            self.gossip_envelopes_rejected_total.load(Ordering::Relaxed)
        );
        gauge!(
            "octoreflex_quorum_hot_pids",
            "PIDs currently quorum-hot",
            self.quorum_hot_pids.load(Ordering::Relaxed)
        );
        gauge!(
            "octoreflex_partition_mode_is_partitioned",
            "1 if the mesh is currently in partitioned mode",
            self.partition_mode_is_partitioned.load(Ordering::Relaxed)
        );
        gauge!(
            "octoreflex_partition_effective_quorum_min",
            "Recalibrated quorum minimum",
            self.partition_effective_quorum_min.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_camouflage_rotations_total",
            "Camouflage port rotations applied",
            self.camouflage_rotations_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_camouflage_decoy_hits_total",
            "Connections observed on retired decoy listener ports",
            self.camouflage_decoy_hits_total.load(Ordering::Relaxed)
        );
        gauge!(
            "octoreflex_sink_buffered",
            "Escalation events currently buffered for delivery",
            self.sink_buffered.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_sink_dropped_total",
            "Escalation events dropped from the sink buffer",
            self.sink_dropped_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_sink_delivered_total",
            "Escalation events delivered to T1",
            self.sink_delivered_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_operator_commands_total",
            "Operator commands accepted",
            self.operator_commands_total.load(Ordering::Relaxed)
        );
        counter!(
            "octoreflex_operator_commands_rejected_total",
            "Operator commands rejected (auth/replay/rate-limit)",
            self.operator_commands_rejected_total.load(Ordering::Relaxed)
        );
        gauge!(
            "octoreflex_ledger_depth",
            "Number of records in the audit ledger",
            self.ledger_depth.load(Ordering::Relaxed)
        );

        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "events": {
                "processed_total": self.events_processed_total.load(Ordering::Relaxed),
                "dropped_total": self.events_dropped_total.load(Ordering::Relaxed),
            },
            "transitions": {
                "normal_to_pressure_total": self.transitions_normal_to_pressure_total.load(Ordering::Relaxed),
                "pressure_to_isolated_total": self.transitions_pressure_to_isolated_total.load(Ordering::Relaxed),
                "isolated_to_frozen_total": self.transitions_isolated_to_frozen_total.load(Ordering::Relaxed),
                "frozen_to_quarantined_total": self.transitions_frozen_to_quarantined_total.load(Ordering::Relaxed),
                "quarantined_to_terminated_total": self.transitions_quarantined_to_terminated_total.load(Ordering::Relaxed),
                "decayed_total": self.transitions_decayed_total.load(Ordering::Relaxed),
            },
            "budget": {
                "exhausted_total": self.budget_exhausted_total.load(Ordering::Relaxed),
                "tokens_available": self.budget_tokens_available.load(Ordering::Relaxed),
            },
            "constitution": {
                "violations_total": self.constitutional_violations_total.load(Ordering::Relaxed),
                "decisions_verified_total": self.decisions_verified_total.load(Ordering::Relaxed),
                "chain_depth": self.chain_depth.load(Ordering::Relaxed),
            },
            "gossip": {
                "accepted_total": self.gossip_envelopes_accepted_total.load(Ordering::Relaxed),
                "rejected_total": self.gossip_envelopes_rejected_total.load(Ordering::Relaxed),
                "quorum_hot_pids": self.quorum_hot_pids.load(Ordering::Relaxed),
                "partition_mode_is_partitioned": self.partition_mode_is_partitioned.load(Ordering::Relaxed) != 0,
                "partition_effective_quorum_min": self.partition_effective_quorum_min.load(Ordering::Relaxed),
            },
            "camouflage": {
                "rotations_total": self.camouflage_rotations_total.load(Ordering::Relaxed),
                "decoy_hits_total": self.camouflage_decoy_hits_total.load(Ordering::Relaxed),
            },
            "sink": {
                "buffered": self.sink_buffered.load(Ordering::Relaxed),
                "dropped_total": self.sink_dropped_total.load(Ordering::Relaxed),
                "delivered_total": self.sink_delivered_total.load(Ordering::Relaxed),
            },
            "operator": {
                "commands_total": self.operator_commands_total.load(Ordering::Relaxed),
                "commands_rejected_total": self.operator_commands_rejected_total.load(Ordering::Relaxed),
            },
            "ledger_depth": self.ledger_depth.load(Ordering::Relaxed),
        })
    }
}
