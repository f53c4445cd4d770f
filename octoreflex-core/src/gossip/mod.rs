pub mod envelope;
mod partition;
mod quorum;
pub mod service;
pub mod transport;

pub use envelope::{GossipEnvelope, GossipError, GossipPayload};
pub use partition::{PartitionConfig, PartitionMode, PartitionState, PartitionTracker};
pub use quorum::QuorumTracker;
pub use service::{load_or_generate_keypair, run_gossip_service};
pub use transport::{
    create_request_response_config, gossipsub_config, baseline_pull_protocol,
    BaselinePullRequest, BaselinePullResponse, OctoReflexBehaviour, OctoReflexBehaviourEvent, OctoReflexCodec,
    BASELINE_PROTOCOL, GOSSIP_TOPIC, MAX_CONNECTIONS_PER_IP, MAX_GOSSIP_MESSAGE_SIZE,
    MAX_MESSAGES_PER_RPC, MAX_PEER_CONNECTIONS, MESSAGE_CACHE_LENGTH,
};
