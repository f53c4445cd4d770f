// Gossip Quorum (spec §4.9): a PID is QUORUM_HOT if >= Q_eff distinct
// peers (plus self) reported A_t above threshold within the report
// window.

use crate::types::{NodeId, Pid};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Report {
    at_secs: u64,
}

pub struct QuorumTracker {
    window_secs: u64,
    report_threshold: f64,
    reports: HashMap<(Pid, NodeId), Report>,
}

impl QuorumTracker {
    pub fn new(window_secs: u64, report_threshold: f64) -> Self {
        Self {
            window_secs,
            report_threshold,
            reports: HashMap::new(),
        }
    }

    pub fn record_observation(&mut self, pid: Pid, node: NodeId, a_t: f64, now_secs: u64) {
        if a_t > self.report_threshold {
            self.reports.insert((pid, node), Report { at_secs: now_secs });
        }
    }

    fn distinct_reporters(&self, pid: Pid, now_secs: u64) -> usize {
        self.reports
            .iter()
            .filter(|((p, _), report)| *p == pid && now_secs.saturating_sub(report.at_secs) <= self.window_secs)
            .count()
    }

    /// `Q_t` is 1 (hot) if at least `q_eff` distinct peers (including self,
    /// if self has reported) corroborate within the window, else 0.
    pub fn q_t(&self, pid: Pid, q_eff: u32, now_secs: u64) -> f64 {
        if self.distinct_reporters(pid, now_secs) >= q_eff as usize {
            1.0
        } else {
            0.0
        }
    }

    pub fn prune_expired(&mut self, now_secs: u64) {
        let window = self.window_secs;
        self.reports
            .retain(|_, report| now_secs.saturating_sub(report.at_secs) <= window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_reports_are_ignored() {
        let mut q = QuorumTracker::new(60, 5.0);
        q.record_observation(1, NodeId::from("a"), 2.0, 0);
        assert_eq!(q.q_t(1, 1, 0), 0.0);
    }

    #[test]
    fn enough_distinct_reporters_trips_hot() {
        let mut q = QuorumTracker::new(60, 5.0);
        q.record_observation(1, NodeId::from("a"), 10.0, 0);
        q.record_observation(1, NodeId::from("b"), 10.0, 0);
        assert_eq!(q.q_t(1, 2, 0), 1.0);
    }

    #[test]
    fn reports_outside_window_do_not_count() {
        let mut q = QuorumTracker::new(60, 5.0);
        q.record_observation(1, NodeId::from("a"), 10.0, 0);
        assert_eq!(q.q_t(1, 1, 1000), 0.0);
    }

    #[test]
    fn prune_expired_removes_stale_entries() {
        let mut q = QuorumTracker::new(10, 5.0);
        q.record_observation(1, NodeId::from("a"), 10.0, 0);
        q.prune_expired(1000);
        assert_eq!(q.q_t(1, 1, 1000), 0.0);
    }
}
