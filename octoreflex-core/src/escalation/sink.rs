// Escalation Sink (spec §4.14/§6): fire-and-forget publisher of escalation
// events to the external T1 consumer. Buffering and HTTP delivery follow
// the wallet RPC client's plain `reqwest` usage
// (`kratos-wallet/src/rpc.rs`), moved to the async client since this
// crate's ambient stack (unlike the wallet binary) already runs on tokio.

use crate::types::{Hash, IsolationState, NodeId, Pid};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Wire schema for an escalation event, spec §6.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationEvent {
    pub pid: Pid,
    pub comm: String,
    pub old_state: IsolationState,
    pub new_state: IsolationState,
    pub severity: f64,
    pub m_t: f64,
    pub timestamp: u64,
    pub node_id: NodeId,
    pub decision_hash: Hash,
    pub parent_hash: Hash,
}

impl EscalationEvent {
    fn priority(&self) -> f64 {
        self.severity * 10.0 + self.new_state.as_u8() as f64
    }
}

struct Buffer {
    events: Vec<EscalationEvent>,
    capacity: usize,
}

impl Buffer {
    /// Inserts `event`, evicting the lowest-priority entry (linear scan)
    /// when full. Returns the evicted event, if any.
    fn push(&mut self, event: EscalationEvent) -> Option<EscalationEvent> {
        if self.events.len() < self.capacity {
            self.events.push(event);
            return None;
        }
        let incoming_priority = event.priority();
        let (min_idx, min_priority) = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.priority()))
            .fold((0usize, f64::INFINITY), |acc, cur| if cur.1 < acc.1 { cur } else { acc });
        if incoming_priority <= min_priority {
            // The buffer is already holding events of equal or higher
            // priority than the incoming one; drop the incoming event.
            return Some(event);
        }
        Some(std::mem::replace(&mut self.events[min_idx], event))
    }

    fn drain_batch(&mut self, max: usize) -> Vec<EscalationEvent> {
        let n = self.events.len().min(max);
        self.events.drain(..n).collect()
    }
}

/// Priority-buffered, best-effort publisher. `push` never blocks and never
/// fails; under sustained overflow it evicts the least-severe buffered
/// event rather than the newest one, so a spike in NORMAL/PRESSURE churn
/// doesn't crowd out a QUARANTINED event still waiting for delivery.
pub struct EscalationSink {
    buffer: Mutex<Buffer>,
    endpoint: Option<String>,
    compress: bool,
}

impl EscalationSink {
    pub fn new(capacity: usize, compress: bool) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                events: Vec::with_capacity(capacity.min(1024)),
                capacity,
            }),
            endpoint: None,
            compress,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Buffers `event`. Returns the evicted event, if the buffer was full
    /// and something had to make room (the caller reports this as a drop).
    pub fn push(&self, event: EscalationEvent) -> Option<EscalationEvent> {
        self.buffer.lock().expect("sink buffer mutex poisoned").push(event)
    }

    pub fn buffered(&self) -> u64 {
        self.buffer.lock().expect("sink buffer mutex poisoned").events.len() as u64
    }

    fn take_batch(&self, max: usize) -> Vec<EscalationEvent> {
        self.buffer.lock().expect("sink buffer mutex poisoned").drain_batch(max)
    }

    /// Delivers one batch to `endpoint` if configured. Returns the number
    /// of events delivered; events that fail to send are dropped, not
    /// re-queued, per spec §4.14's fire-and-forget contract.
    pub async fn flush_once(&self, client: &reqwest::Client) -> usize {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return 0;
        };
        let batch = self.take_batch(64);
        if batch.is_empty() {
            return 0;
        }
        let delivered = batch.len();
        let body = match serde_json::to_vec(&batch) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize escalation batch");
                return 0;
            }
        };

        let (payload, content_encoding) = if self.compress {
            (snap::raw::Encoder::new().compress_vec(&body).unwrap_or(body), Some("snappy"))
        } else {
            (body, None)
        };

        let mut req = client
            .post(endpoint)
            .header("content-type", "application/json")
            .timeout(Duration::from_secs(5));
        if let Some(enc) = content_encoding {
            req = req.header("content-encoding", enc);
        }

        match req.body(payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(count = delivered, "delivered escalation batch to sink endpoint");
                delivered
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "sink endpoint rejected escalation batch");
                0
            }
            Err(e) => {
                warn!(error = %e, "sink endpoint delivery failed");
                0
            }
        }
    }
}

/// Background delivery loop, spawned once by the binary's supervisor.
/// Runs until `shutdown` resolves.
pub async fn run_sink_delivery_loop(
    sink: std::sync::Arc<EscalationSink>,
    metrics: std::sync::Arc<crate::metrics::Metrics>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let delivered = sink.flush_once(&client).await;
                for _ in 0..delivered {
                    metrics.inc_sink_delivered();
                }
                metrics.set_sink_buffered(sink.buffered());
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pid: Pid, severity: f64, new_state: IsolationState) -> EscalationEvent {
        EscalationEvent {
            pid,
            comm: "test".into(),
            old_state: IsolationState::Normal,
            new_state,
            severity,
            m_t: 0.0,
            timestamp: 0,
            node_id: NodeId::from("node-a"),
            decision_hash: Hash::ZERO,
            parent_hash: Hash::ZERO,
        }
    }

    #[test]
    fn push_under_capacity_never_evicts() {
        let sink = EscalationSink::new(4, false);
        for i in 0..4 {
            assert!(sink.push(event(i, 1.0, IsolationState::Pressure)).is_none());
        }
        assert_eq!(sink.buffered(), 4);
    }

    #[test]
    fn overflow_evicts_lowest_priority_entry() {
        let sink = EscalationSink::new(2, false);
        sink.push(event(1, 9.0, IsolationState::Terminated));
        sink.push(event(2, 0.1, IsolationState::Pressure));
        let evicted = sink.push(event(3, 5.0, IsolationState::Frozen));
        assert_eq!(evicted.unwrap().pid, 2);
        assert_eq!(sink.buffered(), 2);
    }

    #[test]
    fn overflow_drops_incoming_when_it_is_the_lowest_priority() {
        let sink = EscalationSink::new(2, false);
        sink.push(event(1, 9.0, IsolationState::Terminated));
        sink.push(event(2, 8.0, IsolationState::Quarantined));
        let evicted = sink.push(event(3, 0.0, IsolationState::Pressure));
        assert_eq!(evicted.unwrap().pid, 3);
    }

    #[tokio::test]
    async fn flush_with_no_endpoint_is_a_noop() {
        let sink = EscalationSink::new(4, false);
        sink.push(event(1, 1.0, IsolationState::Pressure));
        let client = reqwest::Client::new();
        assert_eq!(sink.flush_once(&client).await, 0);
        assert_eq!(sink.buffered(), 1);
    }
}
