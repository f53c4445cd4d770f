// Gossip service (spec §4.9): drives the `Swarm` built from
// `OctoReflexBehaviour`. Grounded on `kratos-core/src/network/service.rs`'s
// `SwarmBuilder::with_existing_identity(...).with_tokio()` construction
// and its `handle_swarm_event`/`handle_behaviour_event` poll loop; trimmed
// to the two behaviours this crate composes (no Kademlia, see
// `gossip::transport`'s header comment).

use crate::config::{GossipConfig, PeerConfig};
use crate::escalation::EscalationEngine;
use crate::gossip::envelope::{GossipEnvelope, GossipPayload};
use crate::gossip::transport::{
    baseline_pull_protocol, create_request_response_config, gossipsub_config, BaselinePullResponse,
    OctoReflexBehaviour, OctoReflexBehaviourEvent, GOSSIP_TOPIC,
};
use crate::types::NodeId;
use ed25519_dalek::{SigningKey, VerifyingKey};
use futures::StreamExt;
use libp2p::swarm::SwarmEvent;
use libp2p::{gossipsub, request_response, Multiaddr};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Loads the node's ed25519 keypair from `path` (same JSON shape the
/// `key` CLI subcommand writes), generating and persisting a fresh one if
/// the file doesn't exist yet. The same key signs outgoing gossip
/// envelopes and seeds the libp2p transport identity.
pub fn load_or_generate_keypair(path: &std::path::Path) -> io::Result<SigningKey> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let json: serde_json::Value =
                serde_json::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let hex_str = json
                .get("secretKey")
                .and_then(|v| v.as_str())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "keypair file missing secretKey"))?;
            let bytes = hex::decode(hex_str.trim_start_matches("0x"))
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "secretKey is not 32 bytes"))?;
            Ok(SigningKey::from_bytes(&arr))
        }
        Err(_) => {
            use rand::rngs::OsRng;
            let signing_key = SigningKey::generate(&mut OsRng);
            let verifying_key: VerifyingKey = (&signing_key).into();
            let json = serde_json::json!({
                "scheme": "ed25519",
                "secretKey": format!("0x{}", hex::encode(signing_key.to_bytes())),
                "publicKey": format!("0x{}", hex::encode(verifying_key.to_bytes())),
            });
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&json)?)?;
            Ok(signing_key)
        }
    }
}

fn peer_key_registry(peers: &[PeerConfig]) -> HashMap<String, VerifyingKey> {
    peers
        .iter()
        .filter_map(|p| {
            let bytes = hex::decode(p.public_key_hex.trim_start_matches("0x")).ok()?;
            let arr: [u8; 32] = bytes.try_into().ok()?;
            VerifyingKey::from_bytes(&arr).ok().map(|vk| (p.node_id.clone(), vk))
        })
        .collect()
}

struct ServiceState {
    engine: Arc<EscalationEngine>,
    peer_keys: HashMap<String, VerifyingKey>,
    last_seen_sequence: HashMap<String, u64>,
    envelope_ttl_secs: u64,
    reachable_peers: Arc<AtomicU32>,
}

impl ServiceState {
    fn handle_swarm_event(&mut self, event: SwarmEvent<OctoReflexBehaviourEvent>, swarm: &mut libp2p::Swarm<OctoReflexBehaviour>) {
        match event {
            SwarmEvent::Behaviour(behaviour_event) => self.handle_behaviour_event(behaviour_event, swarm),
            SwarmEvent::NewListenAddr { address, .. } => info!(%address, "gossip service listening"),
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                self.reachable_peers.fetch_add(1, Ordering::Relaxed);
                debug!(%peer_id, "gossip peer connected");
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                self.reachable_peers.fetch_sub(1, Ordering::Relaxed);
                debug!(%peer_id, "gossip peer disconnected");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(?peer_id, error = %error, "gossip dial failed");
            }
            _ => {}
        }
    }

    fn handle_behaviour_event(&mut self, event: OctoReflexBehaviourEvent, swarm: &mut libp2p::Swarm<OctoReflexBehaviour>) {
        match event {
            OctoReflexBehaviourEvent::Gossipsub(gossipsub::Event::Message { message, .. }) => {
                self.handle_gossip_message(&message.data);
            }
            OctoReflexBehaviourEvent::BaselinePull(request_response::Event::Message { message, .. }) => {
                if let request_response::Message::Request { channel, .. } = message {
                    // This node keeps no durable baseline snapshot to answer
                    // a pull with; it only ever participates as a sender of
                    // live observations, so every pull is answered NotFound.
                    let _ = swarm
                        .behaviour_mut()
                        .baseline_pull
                        .send_response(channel, BaselinePullResponse::NotFound);
                }
            }
            OctoReflexBehaviourEvent::BaselinePull(request_response::Event::OutboundFailure { peer, error, .. }) => {
                warn!(%peer, error = ?error, "baseline pull outbound failure");
            }
            _ => {}
        }
    }

    /// Invariants P1/P2 (spec §4.9): verify signature and TTL and replay
    /// order before any payload is allowed to touch local state.
    fn handle_gossip_message(&mut self, data: &[u8]) {
        let envelope: GossipEnvelope = match bincode::deserialize(data) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "undecodable gossip envelope dropped");
                return;
            }
        };
        let Some(verifying_key) = self.peer_keys.get(&envelope.node_id.0) else {
            warn!(node_id = %envelope.node_id.0, "gossip envelope from unrecognized peer dropped");
            return;
        };
        let now_secs = crate::types::now_nanos() / 1_000_000_000;
        let last_seen = self.last_seen_sequence.get(&envelope.node_id.0).copied().unwrap_or(0);
        if let Err(e) = envelope.accept(verifying_key, now_secs, self.envelope_ttl_secs, last_seen) {
            warn!(node_id = %envelope.node_id.0, error = %e, "gossip envelope rejected");
            return;
        }
        self.last_seen_sequence.insert(envelope.node_id.0.clone(), envelope.sequence);
        self.dispatch_payload(envelope.node_id.clone(), envelope.payload);
    }

    fn dispatch_payload(&self, node_id: NodeId, payload: GossipPayload) {
        let now_secs = crate::types::now_nanos() / 1_000_000_000;
        match payload {
            GossipPayload::AnomalyObservation { pid, a_t, .. } => {
                self.engine.record_remote_observation(pid, node_id, a_t, now_secs);
            }
            GossipPayload::BaselineShare { pid, feature_mean, sample_count, .. } => {
                self.engine
                    .merge_remote_baseline(pid, crate::types::now_nanos(), &feature_mean, sample_count);
            }
            GossipPayload::LambdaShare { .. } => {
                debug!(node_id = %node_id.0, "lambda share received, not applied locally");
            }
            GossipPayload::SemanticHint { target, risk_level, .. } => {
                debug!(node_id = %node_id.0, %target, risk_level, "semantic hint received, not applied locally");
            }
            GossipPayload::PartitionEvent { reachable_peers, total_peers, .. } => {
                debug!(node_id = %node_id.0, reachable_peers, total_peers, "peer-reported partition event logged");
            }
        }
    }
}

/// Builds and drives the gossip `Swarm` until `shutdown` fires. Listens on
/// `config.listen_addr`, dials every configured peer, subscribes to the
/// envelope topic, and forwards whatever `EscalationEngine` pushes through
/// `gossip_rx` as signed outgoing envelopes.
pub async fn run_gossip_service(
    engine: Arc<EscalationEngine>,
    config: GossipConfig,
    node_id: NodeId,
    mut gossip_rx: mpsc::UnboundedReceiver<GossipPayload>,
    reachable_peers: Arc<AtomicU32>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let signing_key = load_or_generate_keypair(&config.keypair_path)?;
    let local_key = libp2p::identity::Keypair::ed25519_from_bytes(signing_key.to_bytes())
        .map_err(|e| anyhow::anyhow!("invalid gossip keypair: {e}"))?;

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(local_key)
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default(),
            libp2p::noise::Config::new,
            libp2p::yamux::Config::default,
        )?
        .with_behaviour(|keypair| {
            let gossipsub = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                gossipsub_config(),
            )
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let (protocol, support) = baseline_pull_protocol();
            let baseline_pull =
                request_response::Behaviour::new(vec![(protocol, support)], create_request_response_config());
            Ok(OctoReflexBehaviour { gossipsub, baseline_pull })
        })?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    swarm.behaviour_mut().gossipsub.subscribe(&gossipsub::IdentTopic::new(GOSSIP_TOPIC))?;
    swarm.listen_on(config.listen_addr.parse()?)?;

    for peer in &config.peers {
        match peer.multiaddr.parse::<Multiaddr>() {
            Ok(addr) => {
                if let Err(e) = swarm.dial(addr) {
                    warn!(node_id = %peer.node_id, error = %e, "initial gossip dial failed");
                }
            }
            Err(e) => warn!(node_id = %peer.node_id, error = %e, "invalid peer multiaddr, skipped"),
        }
    }

    let mut state = ServiceState {
        engine,
        peer_keys: peer_key_registry(&config.peers),
        last_seen_sequence: HashMap::new(),
        envelope_ttl_secs: config.envelope_ttl_secs,
        reachable_peers,
    };

    let mut sequence: u64 = 0;
    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                state.handle_swarm_event(event, &mut swarm);
            }
            payload = gossip_rx.recv() => {
                let Some(payload) = payload else { break };
                sequence += 1;
                let envelope = GossipEnvelope::sign(&signing_key, node_id.clone(), sequence, payload);
                let bytes = match bincode::serialize(&envelope) {
                    Ok(b) => b,
                    Err(e) => { warn!(error = %e, "failed to encode outgoing gossip envelope"); continue; }
                };
                if let Err(e) = swarm.behaviour_mut().gossipsub.publish(gossipsub::IdentTopic::new(GOSSIP_TOPIC), bytes) {
                    debug!(error = %e, "gossip publish failed (likely no subscribed peers yet)");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}
