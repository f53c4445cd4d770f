// Per-PID feature extraction feeding the scorer (spec §4.3's feature
// vector). Not itself a spec-named component; a private helper the
// engine uses to turn a stream of `KernelEvent`s into the fixed-width
// `[syscall_rate, distinct_syscall_entropy, connect_target_distinct_count,
// entropy_hint]` vector `scorer::Scorer::observe` expects.

use crate::scorer::ScoreFeature;
use crate::types::{KernelEvent, TimestampNanos, WatchedSyscall};
use std::collections::HashMap;

const RATE_WINDOW_NANOS: u64 = 1_000_000_000;
const RECENT_TARGETS_CAPACITY: usize = 32;

/// Tracks enough recent history per PID to approximate the feature
/// vector without retaining the full event stream. `connect_target_distinct_count`
/// is approximated from a rolling window of hashed `comm` values on
/// `connect` syscalls, since `KernelEvent` carries no destination address
/// field (spec §6's wire layout has no room for one without growing the
/// fixed-size record) — a deliberate approximation, not a missing feature.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    window_start_ns: TimestampNanos,
    events_in_window: u64,
    last_rate: f64,
    syscall_counts: HashMap<u32, u64>,
    recent_connect_targets: Vec<u64>,
}

impl FeatureExtractor {
    pub fn new(now: TimestampNanos) -> Self {
        Self {
            window_start_ns: now,
            events_in_window: 0,
            last_rate: 0.0,
            syscall_counts: HashMap::new(),
            recent_connect_targets: Vec::new(),
        }
    }

    pub fn observe(&mut self, event: &KernelEvent) -> (ScoreFeature, f64) {
        if event.timestamp_ns.saturating_sub(self.window_start_ns) >= RATE_WINDOW_NANOS {
            self.last_rate = self.events_in_window as f64;
            self.events_in_window = 0;
            self.window_start_ns = event.timestamp_ns;
        }
        self.events_in_window += 1;
        *self.syscall_counts.entry(event.syscall_id).or_insert(0) += 1;

        if let WatchedSyscall::Connect = WatchedSyscall::from_id(event.syscall_id) {
            let target_hash = fnv1a(&event.comm);
            if !self.recent_connect_targets.contains(&target_hash) {
                if self.recent_connect_targets.len() >= RECENT_TARGETS_CAPACITY {
                    self.recent_connect_targets.remove(0);
                }
                self.recent_connect_targets.push(target_hash);
            }
        }

        let syscall_rate = self.last_rate.max(self.events_in_window as f64);
        let entropy = distinct_syscall_entropy(&self.syscall_counts);
        let connect_diversity = self.recent_connect_targets.len() as f64;
        let entropy_hint = event.entropy_hint as f64 / u16::MAX as f64;

        let feature: ScoreFeature = [syscall_rate, entropy, connect_diversity, entropy_hint];
        (feature, entropy_hint)
    }
}

/// Shannon entropy (base 2) of the observed syscall-id frequency
/// distribution, used as the `A_t` feature's diversity term.
fn distinct_syscall_entropy(counts: &HashMap<u32, u64>) -> f64 {
    let total: u64 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            if p > 0.0 {
                p * p.log2()
            } else {
                0.0
            }
        })
        .sum::<f64>()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pid: u32, syscall_id: u32, ts: u64, comm: &[u8]) -> KernelEvent {
        let mut buf = [0u8; 16];
        let n = comm.len().min(16);
        buf[..n].copy_from_slice(&comm[..n]);
        KernelEvent {
            pid,
            comm: buf,
            syscall_id,
            timestamp_ns: ts,
            entropy_hint: 100,
            integrity_hint: 255,
            cpu: 0,
        }
    }

    #[test]
    fn single_syscall_type_has_zero_entropy() {
        let mut fx = FeatureExtractor::new(0);
        for i in 0..5 {
            fx.observe(&event(1, 59, i, b"sh"));
        }
        let (feature, _) = fx.observe(&event(1, 59, 5, b"sh"));
        assert!((feature[1]).abs() < 1e-9);
    }

    #[test]
    fn varied_syscalls_increase_entropy() {
        let mut fx = FeatureExtractor::new(0);
        let (f1, _) = fx.observe(&event(1, 59, 0, b"sh"));
        fx.observe(&event(1, 42, 1, b"curl"));
        let (f2, _) = fx.observe(&event(1, 2, 2, b"curl"));
        assert!(f2[1] > f1[1]);
    }

    #[test]
    fn distinct_connect_targets_tracked_up_to_capacity() {
        let mut fx = FeatureExtractor::new(0);
        for i in 0..40u8 {
            fx.observe(&event(1, 42, i as u64, &[i]));
        }
        let (feature, _) = fx.observe(&event(1, 42, 40, &[40]));
        assert!(feature[2] <= RECENT_TARGETS_CAPACITY as f64);
        assert!(feature[2] > 1.0);
    }
}
