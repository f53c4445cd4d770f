// Decoy listeners (spec §4.8): when camouflage rotates a PID off a port,
// a listener stays behind on the retired port to catch adversaries still
// probing the old address. Connects there are fed back into the normal
// intake path as elevated-integrity `connect` events rather than handled
// out of band, so the escalation engine scores them like any other event.

use crate::kernel::RingBuffer;
use crate::metrics::Metrics;
use crate::types::{now_nanos, KernelEvent, Pid};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DECOY_SYSCALL_ID: u32 = 42; // WatchedSyscall::Connect

/// A rotation notice: `pid`'s camouflage moved off `old_port`, so a decoy
/// should take over that port.
#[derive(Debug, Clone, Copy)]
pub struct DecoyRotation {
    pub pid: Pid,
    pub old_port: u16,
}

struct RunningDecoy {
    port: u16,
    handle: JoinHandle<()>,
}

impl Drop for RunningDecoy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Owns the set of live decoy listeners and reacts to rotation notices
/// sent by the escalation engine. Runs as a background task for the
/// lifetime of the agent (spec §5: "event handlers never block on"
/// anything outside the hot path, so decoys are entirely out-of-line).
pub async fn run_decoy_supervisor(
    mut rotations: mpsc::UnboundedReceiver<DecoyRotation>,
    ring: Arc<RingBuffer>,
    metrics: Arc<Metrics>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut active: HashMap<Pid, RunningDecoy> = HashMap::new();
    loop {
        tokio::select! {
            rotation = rotations.recv() => {
                match rotation {
                    Some(r) => {
                        // Replacing a PID's decoy drops (and aborts) its
                        // previous listener automatically.
                        match spawn_decoy(r.pid, r.old_port, ring.clone(), metrics.clone()).await {
                            Ok(handle) => {
                                active.insert(r.pid, RunningDecoy { port: r.old_port, handle });
                            }
                            Err(e) => warn!(pid = r.pid, port = r.old_port, error = %e, "failed to bind decoy listener"),
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(active = active.len(), "decoy supervisor shutting down");
}

async fn spawn_decoy(
    pid: Pid,
    port: u16,
    ring: Arc<RingBuffer>,
    metrics: Arc<Metrics>,
) -> std::io::Result<JoinHandle<()>> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await?;
    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((_stream, peer)) => {
                    debug!(pid, port, %peer, "decoy listener observed a connect");
                    metrics.inc_camouflage_decoy_hit();
                    let event = decoy_event(pid);
                    if !ring.push(event) {
                        metrics.inc_events_dropped();
                    }
                }
                Err(e) => {
                    warn!(pid, port, error = %e, "decoy listener accept failed");
                    break;
                }
            }
        }
    }))
}

/// A synthetic `connect` event with a maxed-out entropy and integrity
/// hint, so a decoy hit always reads as highly anomalous to the scorer
/// (spec §4.8: "record connects as anomaly-producing events with
/// elevated integrity hint").
fn decoy_event(pid: Pid) -> KernelEvent {
    let mut comm = [0u8; 16];
    comm[..5].copy_from_slice(b"decoy");
    KernelEvent {
        pid,
        comm,
        syscall_id: DECOY_SYSCALL_ID,
        timestamp_ns: now_nanos(),
        entropy_hint: u16::MAX,
        integrity_hint: u8::MAX,
        cpu: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use std::sync::Arc;

    #[tokio::test]
    async fn decoy_listener_turns_a_connect_into_a_ring_buffer_event() {
        let ring = Arc::new(RingBuffer::new(8));
        let metrics = Arc::new(Metrics::new());

        // Bind to port 0 to let the OS assign a free port, then discover
        // it so the test doesn't depend on a fixed port being free.
        let probe = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let handle = spawn_decoy(99, port, ring.clone(), metrics.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let _ = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(metrics.camouflage_decoy_hits_total.load(std::sync::atomic::Ordering::Relaxed), 1);
        let event = ring.pop().expect("decoy event pushed");
        assert_eq!(event.pid, 99);
        assert_eq!(event.integrity_hint, u8::MAX);

        handle.abort();
    }
}
