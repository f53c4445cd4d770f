// Domain-separated signing helpers shared by gossip envelopes and the
// constitutional validator's decision hashing.
//
// Domain separation prevents a signature minted for one message kind from
// being replayed as if it were valid for another.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DOMAIN_GOSSIP_ENVELOPE: &[u8] = b"OCTOREFLEX_GOSSIP_ENVELOPE_V1:";
pub const DOMAIN_DECISION_RECORD: &[u8] = b"OCTOREFLEX_DECISION_RECORD_V1:";
pub const DOMAIN_CAMOUFLAGE_PORT: &[u8] = b"OCTOREFLEX_CAMOUFLAGE_PORT_V1:";
pub const DOMAIN_OPERATOR_COMMAND: &[u8] = b"OCTOREFLEX_OPERATOR_CMD_V1:";

/// Prepend a domain separator to a message before signing or hashing.
#[inline]
pub fn domain_separate(domain: &[u8], message: &[u8]) -> Vec<u8> {
    let mut separated = Vec::with_capacity(domain.len() + message.len());
    separated.extend_from_slice(domain);
    separated.extend_from_slice(message);
    separated
}

/// Wrapper for an Ed25519 signature (64 bytes) with manual serde support,
/// so gossip envelopes encode it as a flat byte string rather than an
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature64(pub [u8; 64]);

impl Signature64 {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn zero() -> Self {
        Self([0; 64])
    }
}

impl From<[u8; 64]> for Signature64 {
    fn from(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Signature64 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Signature64 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("signature must be 64 bytes"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Signature64(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separate_prefixes_message() {
        let out = domain_separate(DOMAIN_GOSSIP_ENVELOPE, b"payload");
        assert!(out.starts_with(DOMAIN_GOSSIP_ENVELOPE));
        assert!(out.ends_with(b"payload"));
    }

    #[test]
    fn signature_roundtrips_through_bincode() {
        let sig = Signature64::from_bytes([7u8; 64]);
        let bytes = bincode::serialize(&sig).unwrap();
        let back: Signature64 = bincode::deserialize(&bytes).unwrap();
        assert_eq!(sig, back);
    }
}
