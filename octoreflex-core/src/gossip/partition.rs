// Partition State (spec §3/§4.9): tracks reachability and recalibrates
// the effective quorum minimum when the mesh fragments.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    Connected,
    Partitioned,
}

#[derive(Debug, Clone, Copy)]
pub struct PartitionState {
    pub mode: PartitionMode,
    pub reachable_peers: u32,
    pub total_peers: u32,
    pub effective_quorum_min: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PartitionConfig {
    /// θ: reachable/total ratio below which the mesh is considered
    /// partitioned.
    pub theta: f64,
    /// φ: recalibration factor applied to reachable peers under
    /// partition.
    pub phi: f64,
    pub quorum_min: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            theta: 0.5,
            phi: 0.5,
            quorum_min: 2,
        }
    }
}

pub struct PartitionTracker {
    config: PartitionConfig,
    state: PartitionState,
}

impl PartitionTracker {
    pub fn new(config: PartitionConfig, total_peers: u32) -> Self {
        let state = PartitionState {
            mode: PartitionMode::Connected,
            reachable_peers: total_peers,
            total_peers,
            effective_quorum_min: config.quorum_min,
        };
        Self { config, state }
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    /// Recomputes `Q_eff` per spec §4.9/§8: if `r/n < theta`,
    /// `Q_eff = max(1, floor(r*phi))`, else `Q_eff = quorum_min`. Returns
    /// `Some(new_state)` exactly once per mode transition (the caller
    /// should emit a `PartitionEvent` only when this returns `Some`).
    pub fn probe(&mut self, reachable_peers: u32, total_peers: u32) -> Option<PartitionState> {
        let ratio = if total_peers == 0 {
            0.0
        } else {
            reachable_peers as f64 / total_peers as f64
        };

        let (new_mode, q_eff) = if ratio < self.config.theta {
            let q = ((reachable_peers as f64 * self.config.phi).floor() as u32).max(1);
            (PartitionMode::Partitioned, q)
        } else {
            (PartitionMode::Connected, self.config.quorum_min)
        };

        let prev_mode = self.state.mode;
        self.state = PartitionState {
            mode: new_mode,
            reachable_peers,
            total_peers,
            effective_quorum_min: q_eff,
        };

        if new_mode != prev_mode {
            Some(self.state)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fully_reachable_mesh_is_connected() {
        let mut t = PartitionTracker::new(PartitionConfig::default(), 5);
        assert!(t.probe(5, 5).is_none());
        assert_eq!(t.state().mode, PartitionMode::Connected);
    }

    #[test]
    fn scenario_five_partition_recalibration() {
        let mut t = PartitionTracker::new(PartitionConfig::default(), 5);
        let event = t.probe(2, 5);
        assert!(event.is_some());
        let s = event.unwrap();
        assert_eq!(s.effective_quorum_min, 1);
        assert_eq!(s.reachable_peers, 2);
        assert_eq!(s.total_peers, 5);

        // subsequent identical probe emits no duplicate event
        assert!(t.probe(2, 5).is_none());
    }

    #[test]
    fn full_isolation_quorum_is_one() {
        let mut t = PartitionTracker::new(PartitionConfig::default(), 5);
        t.probe(0, 5);
        assert_eq!(t.state().effective_quorum_min, 1);
    }

    #[test]
    fn recovering_from_partition_emits_event_once() {
        let mut t = PartitionTracker::new(PartitionConfig::default(), 5);
        t.probe(1, 5);
        assert_eq!(t.state().mode, PartitionMode::Partitioned);
        let event = t.probe(5, 5);
        assert!(event.is_some());
        assert_eq!(t.state().mode, PartitionMode::Connected);
    }

    proptest! {
        /// spec §8: if r/n < theta then Q_eff = max(1, floor(r*phi)), else
        /// Q_eff = quorum_min, for any reachable/total combination.
        #[test]
        fn q_eff_matches_recalibration_formula(
            total_peers in 1u32..50,
            reachable_peers in 0u32..50,
        ) {
            let reachable_peers = reachable_peers.min(total_peers);
            let config = PartitionConfig::default();
            let mut t = PartitionTracker::new(config, total_peers);
            t.probe(reachable_peers, total_peers);
            let ratio = reachable_peers as f64 / total_peers as f64;
            let expected = if ratio < config.theta {
                ((reachable_peers as f64 * config.phi).floor() as u32).max(1)
            } else {
                config.quorum_min
            };
            prop_assert_eq!(t.state().effective_quorum_min, expected);
        }

        /// A probe that doesn't change the connected/partitioned mode
        /// never emits a PartitionEvent (event emitted exactly on mode
        /// transitions, per spec §3/§8).
        #[test]
        fn no_event_without_mode_change(total_peers in 1u32..20, reachable_peers in 0u32..20) {
            let reachable_peers = reachable_peers.min(total_peers);
            let mut t = PartitionTracker::new(PartitionConfig::default(), total_peers);
            let first = t.probe(reachable_peers, total_peers);
            let mode_after_first = t.state().mode;
            let second = t.probe(reachable_peers, total_peers);
            prop_assert!(second.is_none());
            prop_assert_eq!(t.state().mode, mode_after_first);
            let _ = first;
        }
    }
}
