// Camouflage Module (spec §4.8): deterministic port/IP rotation, decoy
// listeners, and atomically-replaced hint files.

pub mod decoy;

pub use decoy::{run_decoy_supervisor, DecoyRotation};

use crate::types::{domain_separate, signature::DOMAIN_CAMOUFLAGE_PORT, Hash, NodeId, Pid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

pub const PORT_RANGE_START: u16 = 20000;
pub const PORT_RANGE_LEN: u16 = 10000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CamouflageAction {
    pub pid: Pid,
    pub epoch: u64,
    pub bind_port: u16,
    pub decoy_ip: Ipv4Addr,
    pub activated_at: u64,
}

/// `decoy_ip = deterministic_ip(node_id, pid, epoch)`, derived the same
/// way as `deterministic_port` but mapped into the loopback block
/// (127.0.0.0/8) rather than a real routable range: on a single host
/// there is no second NIC address to rotate onto, so the "IP rotation"
/// half of spec §4.8 is realized as a local alias a decoy binds to, kept
/// deterministic and hint-published the same way as the port.
pub fn deterministic_ip(node_id: &NodeId, pid: Pid, epoch: u64) -> Ipv4Addr {
    let mut msg = Vec::with_capacity(node_id.0.len() + 12);
    msg.extend_from_slice(node_id.0.as_bytes());
    msg.extend_from_slice(&pid.to_be_bytes());
    msg.extend_from_slice(&epoch.to_be_bytes());
    msg.push(0xA5); // domain-separate from deterministic_port's byte layout
    let digest = Hash::digest(&domain_separate(DOMAIN_CAMOUFLAGE_PORT, &msg));
    Ipv4Addr::new(127, digest.0[0], digest.0[1], digest.0[2].max(1))
}

/// `bind_port = deterministic_port(node_id, pid, epoch)`, a pure function
/// of its inputs (spec §8's round-trip property) derived from
/// SHA-256(node_id || pid || epoch) mapped into the allowed port range.
pub fn deterministic_port(node_id: &NodeId, pid: Pid, epoch: u64) -> u16 {
    let mut msg = Vec::with_capacity(node_id.0.len() + 12);
    msg.extend_from_slice(node_id.0.as_bytes());
    msg.extend_from_slice(&pid.to_be_bytes());
    msg.extend_from_slice(&epoch.to_be_bytes());
    let digest = Hash::digest(&domain_separate(DOMAIN_CAMOUFLAGE_PORT, &msg));
    let raw = u32::from_be_bytes(digest.0[..4].try_into().unwrap());
    PORT_RANGE_START + (raw % PORT_RANGE_LEN as u32) as u16
}

/// Manages the set of active camouflage actions and the atomically
/// replaced hint files clients use to predict rotation.
pub struct CamouflageManager {
    node_id: NodeId,
    hints_dir: PathBuf,
    active: HashMap<Pid, CamouflageAction>,
}

impl CamouflageManager {
    pub fn new(node_id: NodeId, hints_dir: PathBuf) -> Self {
        Self {
            node_id,
            hints_dir,
            active: HashMap::new(),
        }
    }

    /// Idempotent: re-activating with an identical (pid, epoch) is a no-op
    /// and leaves hint files byte-identical (spec §8).
    pub fn activate(&mut self, pid: Pid, epoch: u64, now: u64) -> std::io::Result<CamouflageAction> {
        if let Some(existing) = self.active.get(&pid) {
            if existing.epoch == epoch {
                return Ok(*existing);
            }
        }
        let bind_port = deterministic_port(&self.node_id, pid, epoch);
        let decoy_ip = deterministic_ip(&self.node_id, pid, epoch);
        let action = CamouflageAction {
            pid,
            epoch,
            bind_port,
            decoy_ip,
            activated_at: now,
        };
        self.active.insert(pid, action);
        self.write_hints()?;
        Ok(action)
    }

    /// The port a PID was bound to before its most recent [`Self::activate`]
    /// call, if any — the caller uses this to hand the retired port off to
    /// a decoy listener (spec §4.8).
    pub fn port_before(&self, pid: Pid) -> Option<u16> {
        self.active.get(&pid).map(|a| a.bind_port)
    }

    pub fn deactivate(&mut self, pid: Pid) -> std::io::Result<()> {
        self.active.remove(&pid);
        self.write_hints()
    }

    pub fn active_action(&self, pid: Pid) -> Option<CamouflageAction> {
        self.active.get(&pid).copied()
    }

    /// Atomic replace: write to a temp file then rename, so readers never
    /// observe a partially-written hint file. Writes both
    /// `port_hints.json` and `ip_hints.json` (spec §6's persisted state
    /// list), keyed by PID, so an authorized client can predict both
    /// halves of the rotation.
    fn write_hints(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.hints_dir)?;
        let ports: HashMap<String, u16> = self
            .active
            .values()
            .map(|a| (a.pid.to_string(), a.bind_port))
            .collect();
        let ips: HashMap<String, String> = self
            .active
            .values()
            .map(|a| (a.pid.to_string(), a.decoy_ip.to_string()))
            .collect();
        atomic_write_json(&self.hints_dir.join("port_hints.json"), &ports)?;
        atomic_write_json(&self.hints_dir.join("ip_hints.json"), &ips)
    }
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Ties epoch advancement to the control-law `m_t` (spec §4.11): a hotter
/// node rotates camouflage ports more aggressively, down to
/// `min_interval_secs`.
pub struct EpochScheduler {
    base_interval_secs: u64,
    min_interval_secs: u64,
    epoch: u64,
    last_advance_secs: u64,
}

impl EpochScheduler {
    pub fn new(base_interval_secs: u64, min_interval_secs: u64, now_secs: u64) -> Self {
        Self {
            base_interval_secs,
            min_interval_secs,
            epoch: 0,
            last_advance_secs: now_secs,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// `interval(m_t) = max(min_interval, base_interval * (1 - m_t))`: as
    /// `m_t` approaches 1 the rotation interval collapses toward the floor.
    pub fn interval_for(&self, m_t: f64) -> u64 {
        let m_t = m_t.clamp(0.0, 1.0);
        let scaled = (self.base_interval_secs as f64 * (1.0 - m_t)) as u64;
        scaled.max(self.min_interval_secs)
    }

    /// Advances the epoch if due, returning `true` when it did.
    pub fn maybe_advance(&mut self, now_secs: u64, m_t: f64) -> bool {
        let interval = self.interval_for(m_t);
        if now_secs.saturating_sub(self.last_advance_secs) >= interval {
            self.epoch += 1;
            self.last_advance_secs = now_secs;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod epoch_scheduler_tests {
    use super::*;

    #[test]
    fn does_not_advance_before_interval_elapses() {
        let mut sched = EpochScheduler::new(300, 15, 0);
        assert!(!sched.maybe_advance(100, 0.0));
        assert_eq!(sched.epoch(), 0);
    }

    #[test]
    fn advances_once_interval_elapses() {
        let mut sched = EpochScheduler::new(300, 15, 0);
        assert!(sched.maybe_advance(300, 0.0));
        assert_eq!(sched.epoch(), 1);
    }

    #[test]
    fn high_m_t_shortens_interval_to_floor() {
        let sched = EpochScheduler::new(300, 15, 0);
        assert_eq!(sched.interval_for(1.0), 15);
        assert_eq!(sched.interval_for(0.0), 300);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn deterministic_port_is_pure_function_of_inputs() {
        let node = NodeId::from("node-a");
        let p1 = deterministic_port(&node, 42, 7);
        let p2 = deterministic_port(&node, 42, 7);
        assert_eq!(p1, p2);
    }

    #[test]
    fn deterministic_port_changes_with_epoch() {
        let node = NodeId::from("node-a");
        let p1 = deterministic_port(&node, 42, 1);
        let p2 = deterministic_port(&node, 42, 2);
        assert_ne!(p1, p2);
    }

    #[test]
    fn deterministic_port_stays_in_range() {
        let node = NodeId::from("node-a");
        for epoch in 0..50 {
            let p = deterministic_port(&node, 1, epoch);
            assert!(p >= PORT_RANGE_START && p < PORT_RANGE_START + PORT_RANGE_LEN);
        }
    }

    #[test]
    fn deterministic_ip_is_pure_and_stays_in_loopback_block() {
        let node = NodeId::from("node-a");
        for epoch in 0..50 {
            let ip = deterministic_ip(&node, 1, epoch);
            assert_eq!(ip.octets()[0], 127);
        }
        assert_eq!(deterministic_ip(&node, 1, 1), deterministic_ip(&node, 1, 1));
    }

    #[test]
    fn port_before_reports_the_retiring_port() {
        let dir = TempDir::new().unwrap();
        let mut mgr = CamouflageManager::new(NodeId::from("node-a"), dir.path().to_path_buf());
        assert!(mgr.port_before(10).is_none());
        let a1 = mgr.activate(10, 1, 1000).unwrap();
        assert_eq!(mgr.port_before(10), Some(a1.bind_port));
    }

    #[test]
    fn activate_writes_both_hint_files() {
        let dir = TempDir::new().unwrap();
        let mut mgr = CamouflageManager::new(NodeId::from("node-a"), dir.path().to_path_buf());
        mgr.activate(10, 1, 1000).unwrap();
        assert!(dir.path().join("port_hints.json").exists());
        assert!(dir.path().join("ip_hints.json").exists());
    }

    #[test]
    fn reactivating_same_epoch_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut mgr = CamouflageManager::new(NodeId::from("node-a"), dir.path().to_path_buf());
        let a1 = mgr.activate(10, 1, 1000).unwrap();
        let a2 = mgr.activate(10, 1, 2000).unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn deactivate_removes_from_hint_file() {
        let dir = TempDir::new().unwrap();
        let mut mgr = CamouflageManager::new(NodeId::from("node-a"), dir.path().to_path_buf());
        mgr.activate(10, 1, 1000).unwrap();
        mgr.deactivate(10).unwrap();
        assert!(mgr.active_action(10).is_none());
        let contents = std::fs::read_to_string(dir.path().join("port_hints.json")).unwrap();
        assert!(!contents.contains("\"10\""));
    }
}
