// Kernel Event - the immutable record produced by the filter layer.

use super::primitives::{Pid, TimestampNanos};
use serde::{Deserialize, Serialize};

/// Matches the kernel-side layout described in spec §6: fixed-width fields
/// only, no heap-allocated data, so a real filter program could emit this
/// shape without touching user pointers beyond the fixed `comm` buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KernelEvent {
    pub pid: Pid,
    pub comm: [u8; 16],
    pub syscall_id: u32,
    pub timestamp_ns: TimestampNanos,
    pub entropy_hint: u16,
    pub integrity_hint: u8,
    pub cpu: u16,
}

impl KernelEvent {
    pub fn comm_str(&self) -> String {
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(self.comm.len());
        String::from_utf8_lossy(&self.comm[..end]).into_owned()
    }

    pub fn integrity_hint_unit(&self) -> f64 {
        (self.integrity_hint as f64) / 255.0
    }
}

/// Well-known syscall identifiers the filter layer cares about (spec §4.1's
/// policy table). Not exhaustive; anything else is scored but not subject
/// to a dedicated kernel-side policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedSyscall {
    Exec,
    Connect,
    OpenForWrite,
    Setuid,
    Unshare,
    Ptrace,
    Mount,
    Other(u32),
}

impl WatchedSyscall {
    pub fn from_id(id: u32) -> Self {
        match id {
            59 => WatchedSyscall::Exec,
            42 => WatchedSyscall::Connect,
            2 => WatchedSyscall::OpenForWrite,
            105 => WatchedSyscall::Setuid,
            272 => WatchedSyscall::Unshare,
            101 => WatchedSyscall::Ptrace,
            165 => WatchedSyscall::Mount,
            other => WatchedSyscall::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> KernelEvent {
        let mut comm = [0u8; 16];
        comm[..4].copy_from_slice(b"curl");
        KernelEvent {
            pid: 4242,
            comm,
            syscall_id: 42,
            timestamp_ns: 1_000_000,
            entropy_hint: 512,
            integrity_hint: 255,
            cpu: 3,
        }
    }

    #[test]
    fn comm_str_trims_at_nul() {
        let e = sample_event();
        assert_eq!(e.comm_str(), "curl");
    }

    #[test]
    fn integrity_hint_normalizes_to_unit_interval() {
        let e = sample_event();
        assert!((e.integrity_hint_unit() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn watched_syscall_maps_known_ids() {
        assert_eq!(WatchedSyscall::from_id(42), WatchedSyscall::Connect);
        assert_eq!(WatchedSyscall::from_id(999999), WatchedSyscall::Other(999999));
    }
}
