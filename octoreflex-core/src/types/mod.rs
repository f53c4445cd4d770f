pub mod kernel_event;
pub mod primitives;
pub mod process_state;
pub mod signature;

pub use kernel_event::{KernelEvent, WatchedSyscall};
pub use primitives::{now_nanos, Hash, NodeId, Pid, TimestampNanos};
pub use process_state::{IsolationState, ProcessState};
pub use signature::{domain_separate, Signature64};
