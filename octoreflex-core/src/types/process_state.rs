// Process State - the per-PID isolation lifecycle record.
//
// Invariant M1: the observable state value for a PID is monotonically
// non-decreasing across escalation commits. Decay is the only path that
// lowers it, and decay never runs from event-processing code.

use super::primitives::{Pid, TimestampNanos};
use serde::{Deserialize, Serialize};

/// Ordered isolation levels. Ord/PartialOrd are derived from declaration
/// order, which is what lets the escalation engine compare states with `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum IsolationState {
    Normal = 0,
    Pressure = 1,
    Isolated = 2,
    Frozen = 3,
    Quarantined = 4,
    Terminated = 5,
}

impl IsolationState {
    pub const ALL: [IsolationState; 6] = [
        IsolationState::Normal,
        IsolationState::Pressure,
        IsolationState::Isolated,
        IsolationState::Frozen,
        IsolationState::Quarantined,
        IsolationState::Terminated,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_u8() == v)
    }

    /// One step down, or `None` if already at `Normal`. `Terminated` never
    /// decays (enforced by the caller, not here).
    pub fn step_down(self) -> Option<Self> {
        Self::from_u8(self.as_u8().checked_sub(1)?)
    }

    /// Control-law utilization coefficient U(state), spec §4.11.
    pub fn utilization(self) -> f64 {
        match self {
            IsolationState::Normal => 0.0,
            IsolationState::Pressure => 0.2,
            IsolationState::Isolated => 0.5,
            IsolationState::Frozen => 0.7,
            IsolationState::Quarantined => 0.9,
            IsolationState::Terminated => 1.0,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IsolationState::Terminated)
    }
}

impl Default for IsolationState {
    fn default() -> Self {
        IsolationState::Normal
    }
}

/// Per-PID record owned exclusively by the escalation engine. Scorer,
/// pressure accumulator, and camouflage records are associated 1:1 with
/// this entry and share its lifetime.
#[derive(Debug, Clone)]
pub struct ProcessState {
    pub pid: Pid,
    pub state: IsolationState,
    pub entered_at: TimestampNanos,
    pub last_event_at: TimestampNanos,
    pub cached_pressure: f64,
    pub pinned: bool,
}

impl ProcessState {
    pub fn new(pid: Pid, now: TimestampNanos) -> Self {
        Self {
            pid,
            state: IsolationState::Normal,
            entered_at: now,
            last_event_at: now,
            cached_pressure: 0.0,
            pinned: false,
        }
    }

    /// Commits a new state. Callers must ensure `new_state` respects
    /// invariant M1 (escalation: `new_state > self.state`; decay: exactly
    /// one step down; never leaving `Terminated`).
    pub fn commit_state(&mut self, new_state: IsolationState, now: TimestampNanos) {
        self.state = new_state;
        self.entered_at = now;
    }

    pub fn touch(&mut self, now: TimestampNanos) {
        self.last_event_at = now;
    }

    pub fn quiescence(&self, now: TimestampNanos) -> u64 {
        now.saturating_sub(self.last_event_at)
    }
}
