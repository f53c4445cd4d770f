// Gossip Envelope (spec §3/§4.9/§6).
//
// Signed with the node's Ed25519 key. Wire-encoded with `bincode` rather
// than Protobuf (see DESIGN.md substitution #1) while preserving the
// field set spec.md names.

use crate::types::{domain_separate, now_nanos, signature::DOMAIN_GOSSIP_ENVELOPE, NodeId, Pid, Signature64};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipPayload {
    AnomalyObservation {
        pid: Pid,
        a_t: f64,
        state: u8,
    },
    BaselineShare {
        pid: Pid,
        feature_mean: Vec<f64>,
        feature_cov: Vec<f64>,
        sample_count: u64,
    },
    LambdaShare {
        lambda1: f64,
        lambda2: f64,
    },
    SemanticHint {
        target: String,
        risk_level: u8,
        ttl_seconds: u32,
    },
    PartitionEvent {
        reachable_peers: u32,
        total_peers: u32,
        effective_quorum_min: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignableEnvelope {
    node_id: String,
    sequence: u64,
    issued_at: u64,
    payload: GossipPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipEnvelope {
    pub node_id: NodeId,
    pub sequence: u64,
    pub issued_at: u64,
    pub payload: GossipPayload,
    pub signature: Signature64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GossipError {
    #[error("signature verification failed")]
    BadSignature,
    #[error("envelope older than ttl")]
    Expired,
    #[error("sequence number not greater than last seen")]
    ReplayedSequence,
    #[error("encoding failed")]
    Encoding,
}

impl GossipEnvelope {
    fn signable_bytes(node_id: &NodeId, sequence: u64, issued_at: u64, payload: &GossipPayload) -> Vec<u8> {
        let signable = SignableEnvelope {
            node_id: node_id.0.clone(),
            sequence,
            issued_at,
            payload: payload.clone(),
        };
        bincode::serialize(&signable).expect("gossip envelope payload always serializes")
    }

    pub fn sign(signing_key: &SigningKey, node_id: NodeId, sequence: u64, payload: GossipPayload) -> Self {
        let issued_at = now_nanos() / 1_000_000_000;
        let bytes = Self::signable_bytes(&node_id, sequence, issued_at, &payload);
        let msg = domain_separate(DOMAIN_GOSSIP_ENVELOPE, &bytes);
        let sig = signing_key.sign(&msg);
        Self {
            node_id,
            sequence,
            issued_at,
            payload,
            signature: Signature64::from_bytes(sig.to_bytes()),
        }
    }

    /// Invariant P2: signature verification occurs before any effect on
    /// local state, so this is always the first check the receive
    /// pipeline runs.
    pub fn verify_signature(&self, verifying_key: &VerifyingKey) -> Result<(), GossipError> {
        let bytes = Self::signable_bytes(&self.node_id, self.sequence, self.issued_at, &self.payload);
        let msg = domain_separate(DOMAIN_GOSSIP_ENVELOPE, &bytes);
        let sig = ed25519_dalek::Signature::from_bytes(self.signature.as_bytes());
        verifying_key
            .verify(&msg, &sig)
            .map_err(|_| GossipError::BadSignature)
    }

    /// Invariant P1: envelopes older than `envelope_ttl` are rejected
    /// regardless of signature validity (callers should still verify the
    /// signature first per P2; TTL is an independent, equally mandatory
    /// gate).
    pub fn check_ttl(&self, now_secs: u64, envelope_ttl_secs: u64) -> Result<(), GossipError> {
        if now_secs.saturating_sub(self.issued_at) > envelope_ttl_secs {
            return Err(GossipError::Expired);
        }
        Ok(())
    }

    pub fn check_sequence(&self, last_seen_sequence: u64) -> Result<(), GossipError> {
        if self.sequence <= last_seen_sequence {
            return Err(GossipError::ReplayedSequence);
        }
        Ok(())
    }

    /// Full receive-pipeline gate, spec §4.9: verify signature, then TTL,
    /// then sequence, in that order.
    pub fn accept(
        &self,
        verifying_key: &VerifyingKey,
        now_secs: u64,
        envelope_ttl_secs: u64,
        last_seen_sequence: u64,
    ) -> Result<(), GossipError> {
        self.verify_signature(verifying_key)?;
        self.check_ttl(now_secs, envelope_ttl_secs)?;
        self.check_sequence(last_seen_sequence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, VerifyingKey) {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        (sk, vk)
    }

    #[test]
    fn valid_envelope_round_trips_verification() {
        let (sk, vk) = keypair();
        let env = GossipEnvelope::sign(
            &sk,
            NodeId::from("node-a"),
            1,
            GossipPayload::AnomalyObservation { pid: 1, a_t: 5.0, state: 1 },
        );
        assert!(env.verify_signature(&vk).is_ok());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (sk, vk) = keypair();
        let mut env = GossipEnvelope::sign(
            &sk,
            NodeId::from("node-a"),
            1,
            GossipPayload::AnomalyObservation { pid: 1, a_t: 5.0, state: 1 },
        );
        env.payload = GossipPayload::AnomalyObservation { pid: 1, a_t: 500.0, state: 5 };
        assert_eq!(env.verify_signature(&vk), Err(GossipError::BadSignature));
    }

    #[test]
    fn expired_envelope_rejected_regardless_of_signature() {
        let (sk, vk) = keypair();
        let mut env = GossipEnvelope::sign(&sk, NodeId::from("node-a"), 1, GossipPayload::LambdaShare { lambda1: 0.1, lambda2: 0.2 });
        env.issued_at = 0;
        assert!(env.verify_signature(&vk).is_ok());
        assert_eq!(env.check_ttl(60, 30), Err(GossipError::Expired));
    }

    #[test]
    fn replayed_sequence_rejected() {
        let (sk, _vk) = keypair();
        let env = GossipEnvelope::sign(&sk, NodeId::from("node-a"), 5, GossipPayload::LambdaShare { lambda1: 0.1, lambda2: 0.2 });
        assert_eq!(env.check_sequence(5), Err(GossipError::ReplayedSequence));
        assert!(env.check_sequence(4).is_ok());
    }

    #[test]
    fn scenario_four_gossip_replay_rejection() {
        let (sk, vk) = keypair();
        let mut env = GossipEnvelope::sign(
            &sk,
            NodeId::from("node-a"),
            1,
            GossipPayload::AnomalyObservation { pid: 77, a_t: 9.0, state: 1 },
        );
        env.issued_at = 0; // 60 seconds ago relative to `now_secs` below
        let result = env.accept(&vk, 60, 30, 0);
        assert_eq!(result, Err(GossipError::Expired));
    }
}
