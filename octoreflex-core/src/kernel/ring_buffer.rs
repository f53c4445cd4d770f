// Event Intake & Ring Buffer (spec §4.2).
//
// The kernel filter layer is the sole producer; intake must never block
// the kernel side, so overflow drops the event and increments a per-CPU
// counter rather than applying back-pressure.

use crate::types::KernelEvent;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct RingBuffer {
    queue: ArrayQueue<KernelEvent>,
    dropped: AtomicU64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Never blocks. Returns `false` if the event was dropped due to
    /// overflow; the caller is responsible for bumping the per-CPU drop
    /// counter on the `FilterContract`.
    pub fn push(&self, event: KernelEvent) -> bool {
        match self.queue.push(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<KernelEvent> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Dispatch target for a given PID, used by intake workers to preserve
    /// per-PID ordering across M worker slots (spec §5: `pid mod M`).
    pub fn worker_slot(pid: u32, workers: usize) -> usize {
        (pid as usize) % workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pid: u32) -> KernelEvent {
        KernelEvent {
            pid,
            comm: [0u8; 16],
            syscall_id: 1,
            timestamp_ns: 0,
            entropy_hint: 0,
            integrity_hint: 0,
            cpu: 0,
        }
    }

    #[test]
    fn push_pop_preserves_order() {
        let rb = RingBuffer::new(4);
        assert!(rb.push(event(1)));
        assert!(rb.push(event(2)));
        assert_eq!(rb.pop().unwrap().pid, 1);
        assert_eq!(rb.pop().unwrap().pid, 2);
    }

    #[test]
    fn overflow_drops_and_counts() {
        let rb = RingBuffer::new(1);
        assert!(rb.push(event(1)));
        assert!(!rb.push(event(2)));
        assert_eq!(rb.dropped_total(), 1);
    }

    #[test]
    fn worker_slot_distributes_by_pid_mod_m() {
        assert_eq!(RingBuffer::worker_slot(10, 4), 2);
        assert_eq!(RingBuffer::worker_slot(11, 4), 3);
    }
}
