// Operator Interface (spec §4.13): a local UNIX socket carrying
// HMAC-authenticated commands. Adapted from `kratos-core/src/rpc/server.rs`'s
// channel-based dispatch — there, requests cross from warp's handler
// context into the node's async context over an `mpsc` channel paired with
// a `oneshot` reply; here the transport is a UNIX socket instead of HTTP,
// but the internal shape (one `OperatorCall` variant per RPC method, one
// reply channel per call) is unchanged.

use crate::escalation::EscalationEngine;
use crate::metrics::Metrics;
use crate::operator::rate_limit::OperatorRateLimiter;
use crate::types::{domain_separate, signature::DOMAIN_OPERATOR_COMMAND, IsolationState, Pid};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("invalid HMAC signature")]
    BadSignature,
    #[error("nonce {0} is not greater than the last accepted nonce")]
    ReplayedNonce(u64),
    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unknown command {0}")]
    UnknownCommand(String),
}

#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    key_id: String,
    cmd: String,
    nonce: u64,
    hmac: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ResponseEnvelope {
    ok: bool,
    result: serde_json::Value,
}

/// One variant per operator command, each carrying its own `oneshot` reply
/// channel — mirrors `kratos-core`'s `RpcCall`.
pub enum OperatorCall {
    /// `(pid, operator_id, justification, reply)` — `operator_id` is the
    /// HMAC key identity that authenticated the request (spec §4.13).
    Reset(Pid, String, String, oneshot::Sender<Result<(), String>>),
    Pin(Pid, IsolationState, oneshot::Sender<Result<(), String>>),
    Unpin(Pid, oneshot::Sender<Result<(), String>>),
    Stats(oneshot::Sender<serde_json::Value>),
    GovernanceStats(oneshot::Sender<serde_json::Value>),
    SemanticHint(String, u8, u64, oneshot::Sender<Result<(), String>>),
}

pub type OperatorSender = mpsc::UnboundedSender<OperatorCall>;

/// Owns the engine and filter handles and processes `OperatorCall`s
/// sequentially. Runs for the agent's lifetime as its own task.
pub async fn run_operator_processor(
    engine: Arc<EscalationEngine>,
    filter: crate::kernel::FilterContract,
    metrics: Arc<Metrics>,
    mut rx: mpsc::UnboundedReceiver<OperatorCall>,
) {
    while let Some(call) = rx.recv().await {
        match call {
            OperatorCall::Reset(pid, operator_id, justification, reply) => {
                let result = engine.reset(pid, &operator_id, &justification).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            OperatorCall::Pin(pid, state, reply) => {
                let result = engine.pin(pid, state).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            OperatorCall::Unpin(pid, reply) => {
                engine.unpin(pid);
                let _ = reply.send(Ok(()));
            }
            OperatorCall::Stats(reply) => {
                let _ = reply.send(metrics.to_json());
            }
            OperatorCall::GovernanceStats(reply) => {
                let tracked: Vec<Pid> = engine.tracked_pids();
                let _ = reply.send(serde_json::json!({
                    "tracked_pids": tracked.len(),
                    "decisions_committed": engine.decisions_committed(),
                }));
            }
            OperatorCall::SemanticHint(target, risk_level, ttl_secs, reply) => {
                let expires_at = crate::types::now_nanos() + ttl_secs * 1_000_000_000;
                filter.publish_semantic_hint(target, risk_level, expires_at);
                let _ = reply.send(Ok(()));
            }
        }
    }
}

struct NonceTracker {
    last_seen: DashMap<String, u64>,
}

impl NonceTracker {
    fn new() -> Self {
        Self { last_seen: DashMap::new() }
    }

    /// Monotonic-nonce replay protection (spec §4.13): a request is only
    /// accepted if its nonce is strictly greater than the last one
    /// accepted for that key.
    fn check_and_advance(&self, key_id: &str, nonce: u64) -> Result<(), OperatorError> {
        let mut entry = self.last_seen.entry(key_id.to_string()).or_insert(0);
        if nonce <= *entry {
            return Err(OperatorError::ReplayedNonce(nonce));
        }
        *entry = nonce;
        Ok(())
    }
}

fn verify_hmac(secret: &[u8], envelope: &RequestEnvelope) -> Result<(), OperatorError> {
    let mut msg = Vec::new();
    msg.extend_from_slice(envelope.cmd.as_bytes());
    msg.extend_from_slice(&envelope.nonce.to_be_bytes());
    msg.extend_from_slice(envelope.args.to_string().as_bytes());
    let signed = domain_separate(DOMAIN_OPERATOR_COMMAND, &msg);

    let expected_hex = hex::decode(&envelope.hmac).map_err(|_| OperatorError::BadSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| OperatorError::BadSignature)?;
    mac.update(&signed);
    mac.verify_slice(&expected_hex).map_err(|_| OperatorError::BadSignature)
}

fn dispatch_value(cmd: &str, args: &serde_json::Value) -> Result<DispatchTarget, OperatorError> {
    match cmd {
        "reset" => {
            let justification = args
                .get("justification")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Ok(DispatchTarget::Reset(parse_pid(args)?, justification))
        }
        "pin" => {
            let pid = parse_pid(args)?;
            let state = args
                .get("state")
                .and_then(|v| v.as_str())
                .and_then(parse_state_name)
                .ok_or_else(|| OperatorError::Malformed("missing or invalid 'state'".into()))?;
            Ok(DispatchTarget::Pin(pid, state))
        }
        "unpin" => Ok(DispatchTarget::Unpin(parse_pid(args)?)),
        "stats" => Ok(DispatchTarget::Stats),
        "governance_stats" => Ok(DispatchTarget::GovernanceStats),
        "semantic_hint" => {
            let target = args
                .get("target")
                .and_then(|v| v.as_str())
                .ok_or_else(|| OperatorError::Malformed("missing 'target'".into()))?
                .to_string();
            let risk_level = args.get("risk_level").and_then(|v| v.as_u64()).unwrap_or(1) as u8;
            let ttl_secs = args.get("ttl_secs").and_then(|v| v.as_u64()).unwrap_or(300);
            Ok(DispatchTarget::SemanticHint(target, risk_level, ttl_secs))
        }
        other => Err(OperatorError::UnknownCommand(other.to_string())),
    }
}

enum DispatchTarget {
    Reset(Pid, String),
    Pin(Pid, IsolationState),
    Unpin(Pid),
    Stats,
    GovernanceStats,
    SemanticHint(String, u8, u64),
}

fn parse_pid(args: &serde_json::Value) -> Result<Pid, OperatorError> {
    args.get("pid")
        .and_then(|v| v.as_u64())
        .map(|v| v as Pid)
        .ok_or_else(|| OperatorError::Malformed("missing or invalid 'pid'".into()))
}

fn parse_state_name(name: &str) -> Option<IsolationState> {
    match name {
        "normal" => Some(IsolationState::Normal),
        "pressure" => Some(IsolationState::Pressure),
        "isolated" => Some(IsolationState::Isolated),
        "frozen" => Some(IsolationState::Frozen),
        "quarantined" => Some(IsolationState::Quarantined),
        "terminated" => Some(IsolationState::Terminated),
        _ => None,
    }
}

async fn handle_connection(
    stream: UnixStream,
    secret: Arc<Vec<u8>>,
    rate_limiter: Arc<OperatorRateLimiter>,
    nonces: Arc<NonceTracker>,
    sender: OperatorSender,
    metrics: Arc<Metrics>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = process_line(&line, &secret, &rate_limiter, &nonces, &sender, &metrics).await;
        let serialized = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
        if writer.write_all(serialized.as_bytes()).await.is_err() {
            break;
        }
        if writer.write_all(b"\n").await.is_err() {
            break;
        }
    }
}

async fn process_line(
    line: &str,
    secret: &[u8],
    rate_limiter: &OperatorRateLimiter,
    nonces: &NonceTracker,
    sender: &OperatorSender,
    metrics: &Metrics,
) -> ResponseEnvelope {
    let outcome = process_line_inner(line, secret, rate_limiter, nonces, sender).await;
    match outcome {
        Ok(value) => {
            metrics.inc_operator_command();
            ResponseEnvelope { ok: true, result: value }
        }
        Err(e) => {
            metrics.inc_operator_command_rejected();
            warn!(error = %e, "operator command rejected");
            ResponseEnvelope {
                ok: false,
                result: serde_json::json!({ "error": e.to_string() }),
            }
        }
    }
}

async fn process_line_inner(
    line: &str,
    secret: &[u8],
    rate_limiter: &OperatorRateLimiter,
    nonces: &NonceTracker,
    sender: &OperatorSender,
) -> Result<serde_json::Value, OperatorError> {
    let envelope: RequestEnvelope =
        serde_json::from_str(line).map_err(|e| OperatorError::Malformed(e.to_string()))?;

    rate_limiter
        .check_rate_limit(&envelope.key_id)
        .await
        .map_err(OperatorError::RateLimited)?;
    verify_hmac(secret, &envelope)?;
    nonces.check_and_advance(&envelope.key_id, envelope.nonce)?;

    let target = dispatch_value(&envelope.cmd, &envelope.args)?;
    match target {
        DispatchTarget::Reset(pid, justification) => {
            let (tx, rx) = oneshot::channel();
            sender
                .send(OperatorCall::Reset(pid, envelope.key_id.clone(), justification, tx))
                .map_err(|_| OperatorError::Malformed("processor unavailable".into()))?;
            rx.await
                .map_err(|_| OperatorError::Malformed("processor dropped reply".into()))?
                .map(|_| serde_json::json!({}))
                .map_err(OperatorError::Malformed)
        }
        DispatchTarget::Pin(pid, state) => {
            let (tx, rx) = oneshot::channel();
            sender
                .send(OperatorCall::Pin(pid, state, tx))
                .map_err(|_| OperatorError::Malformed("processor unavailable".into()))?;
            rx.await
                .map_err(|_| OperatorError::Malformed("processor dropped reply".into()))?
                .map(|_| serde_json::json!({}))
                .map_err(OperatorError::Malformed)
        }
        DispatchTarget::Unpin(pid) => {
            let (tx, rx) = oneshot::channel();
            sender
                .send(OperatorCall::Unpin(pid, tx))
                .map_err(|_| OperatorError::Malformed("processor unavailable".into()))?;
            rx.await
                .map_err(|_| OperatorError::Malformed("processor dropped reply".into()))?
                .map(|_| serde_json::json!({}))
                .map_err(OperatorError::Malformed)
        }
        DispatchTarget::Stats => {
            let (tx, rx) = oneshot::channel();
            sender
                .send(OperatorCall::Stats(tx))
                .map_err(|_| OperatorError::Malformed("processor unavailable".into()))?;
            rx.await.map_err(|_| OperatorError::Malformed("processor dropped reply".into()))
        }
        DispatchTarget::GovernanceStats => {
            let (tx, rx) = oneshot::channel();
            sender
                .send(OperatorCall::GovernanceStats(tx))
                .map_err(|_| OperatorError::Malformed("processor unavailable".into()))?;
            rx.await.map_err(|_| OperatorError::Malformed("processor dropped reply".into()))
        }
        DispatchTarget::SemanticHint(target, risk_level, ttl_secs) => {
            let (tx, rx) = oneshot::channel();
            sender
                .send(OperatorCall::SemanticHint(target, risk_level, ttl_secs, tx))
                .map_err(|_| OperatorError::Malformed("processor unavailable".into()))?;
            rx.await
                .map_err(|_| OperatorError::Malformed("processor dropped reply".into()))?
                .map(|_| serde_json::json!({}))
                .map_err(OperatorError::Malformed)
        }
    }
}

/// Binds the UNIX socket (mode 0600) and accepts connections until
/// `shutdown` fires. Each connection is handled on its own task; state
/// that must be shared (rate limiter, nonce tracker, the command channel)
/// is cloned behind `Arc`.
pub async fn run_operator_socket(
    socket_path: PathBuf,
    secret: Vec<u8>,
    rate_limiter: OperatorRateLimiter,
    sender: OperatorSender,
    metrics: Arc<Metrics>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    set_socket_permissions(&socket_path)?;
    info!(path = %socket_path.display(), "operator socket listening");

    let secret = Arc::new(secret);
    let rate_limiter = Arc::new(rate_limiter);
    let nonces = Arc::new(NonceTracker::new());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let secret = secret.clone();
                let rate_limiter = rate_limiter.clone();
                let nonces = nonces.clone();
                let sender = sender.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    handle_connection(stream, secret, rate_limiter, nonces, sender, metrics).await;
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope(nonce: u64, secret: &[u8]) -> RequestEnvelope {
        let cmd = "reset".to_string();
        let args = serde_json::json!({ "pid": 42 });
        let mut msg = Vec::new();
        msg.extend_from_slice(cmd.as_bytes());
        msg.extend_from_slice(&nonce.to_be_bytes());
        msg.extend_from_slice(args.to_string().as_bytes());
        let signed = domain_separate(DOMAIN_OPERATOR_COMMAND, &msg);
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(&signed);
        let tag = mac.finalize().into_bytes();
        RequestEnvelope {
            key_id: "op-1".into(),
            cmd,
            nonce,
            hmac: hex::encode(tag),
            args,
        }
    }

    #[test]
    fn valid_hmac_verifies() {
        let secret = b"shared-secret".to_vec();
        let envelope = sample_envelope(1, &secret);
        assert!(verify_hmac(&secret, &envelope).is_ok());
    }

    #[test]
    fn tampered_args_fail_verification() {
        let secret = b"shared-secret".to_vec();
        let mut envelope = sample_envelope(1, &secret);
        envelope.args = serde_json::json!({ "pid": 999 });
        assert!(verify_hmac(&secret, &envelope).is_err());
    }

    #[test]
    fn nonce_tracker_rejects_replay() {
        let tracker = NonceTracker::new();
        assert!(tracker.check_and_advance("op-1", 5).is_ok());
        assert!(tracker.check_and_advance("op-1", 5).is_err());
        assert!(tracker.check_and_advance("op-1", 4).is_err());
        assert!(tracker.check_and_advance("op-1", 6).is_ok());
    }

    #[test]
    fn dispatch_value_parses_known_commands() {
        let args = serde_json::json!({ "pid": 7 });
        assert!(matches!(dispatch_value("reset", &args), Ok(DispatchTarget::Reset(7, ref j)) if j.is_empty()));
        assert!(matches!(dispatch_value("unpin", &args), Ok(DispatchTarget::Unpin(7))));
        assert!(dispatch_value("nonexistent", &args).is_err());
    }

    #[test]
    fn dispatch_value_reset_carries_justification() {
        let args = serde_json::json!({ "pid": 7, "justification": "confirmed benign" });
        match dispatch_value("reset", &args) {
            Ok(DispatchTarget::Reset(7, justification)) => assert_eq!(justification, "confirmed benign"),
            _ => panic!("expected Reset dispatch for pid 7"),
        }
    }

    #[test]
    fn dispatch_value_rejects_unknown_pin_state() {
        let args = serde_json::json!({ "pid": 7, "state": "bogus" });
        assert!(dispatch_value("pin", &args).is_err());
    }
}
