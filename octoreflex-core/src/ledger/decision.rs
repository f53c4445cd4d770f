// Decision Record (spec §3/§4.10/§4.12).

use crate::types::{domain_separate, signature::DOMAIN_DECISION_RECORD, Hash, IsolationState, Pid, TimestampNanos};
use serde::{Deserialize, Serialize};

/// Canonical, sorted-key byte encoding of every input that determined an
/// escalation outcome. Built by hand (rather than via `serde_json`'s
/// insertion-order maps) so the byte layout is stable across platforms:
/// fixed numeric width, explicit field order, IEEE-754 doubles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalInputs {
    pub pid: Pid,
    pub from_state: u8,
    pub to_state: u8,
    pub severity: f64,
    pub a_t: f64,
    pub q_t: f64,
    pub i_t: f64,
    pub p_t: f64,
    pub timestamp_ns: TimestampNanos,
    /// Operator identity for an operator-initiated decision (spec §4.13).
    /// `None` for every non-operator decision flag.
    pub operator_id: Option<String>,
    /// Length in bytes of the justification token the operator supplied,
    /// not the token itself — the audit chain records that a
    /// justification was given and how long it was, not its contents.
    pub justification_len: Option<u32>,
}

impl CanonicalInputs {
    /// Deterministic byte layout: sorted field order fixed by this struct
    /// definition, integers as fixed-width big-endian, floats as
    /// IEEE-754 big-endian bit patterns. The operator fields are encoded
    /// last as a presence byte followed by their value, so existing
    /// non-operator decisions keep their original byte prefix.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.pid.to_be_bytes());
        buf.push(self.from_state);
        buf.push(self.to_state);
        buf.extend_from_slice(&self.severity.to_be_bytes());
        buf.extend_from_slice(&self.a_t.to_be_bytes());
        buf.extend_from_slice(&self.q_t.to_be_bytes());
        buf.extend_from_slice(&self.i_t.to_be_bytes());
        buf.extend_from_slice(&self.p_t.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_be_bytes());
        match &self.operator_id {
            Some(id) => {
                buf.push(1);
                buf.extend_from_slice(&(id.len() as u32).to_be_bytes());
                buf.extend_from_slice(id.as_bytes());
            }
            None => buf.push(0),
        }
        match self.justification_len {
            Some(len) => {
                buf.push(1);
                buf.extend_from_slice(&len.to_be_bytes());
            }
            None => buf.push(0),
        }
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionFlag {
    Escalation,
    Decay,
    BudgetExhausted,
    ConstitutionalViolation,
    OperatorReset,
    OperatorOverride,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub pid: Pid,
    pub from_state: IsolationState,
    pub to_state: IsolationState,
    pub severity: f64,
    pub inputs_canonical: Vec<u8>,
    pub timestamp_ns: TimestampNanos,
    pub parent_hash: Hash,
    pub decision_hash: Hash,
    pub flag: DecisionFlag,
    pub constitutional_violation: bool,
}

impl DecisionRecord {
    /// `decision_hash = SHA-256(DOMAIN || inputs_canonical || parent_hash)`.
    /// The domain separator keeps this hash space disjoint from gossip
    /// envelope signing even though both ultimately go through SHA-256.
    pub fn compute_hash(inputs_canonical: &[u8], parent_hash: &Hash) -> Hash {
        let mut msg = Vec::with_capacity(inputs_canonical.len() + 32);
        msg.extend_from_slice(inputs_canonical);
        msg.extend_from_slice(parent_hash.as_bytes());
        Hash::digest(&domain_separate(DOMAIN_DECISION_RECORD, &msg))
    }

    pub fn new(
        inputs: &CanonicalInputs,
        parent_hash: Hash,
        flag: DecisionFlag,
        constitutional_violation: bool,
    ) -> Self {
        let inputs_canonical = inputs.to_canonical_bytes();
        let decision_hash = Self::compute_hash(&inputs_canonical, &parent_hash);
        Self {
            pid: inputs.pid,
            from_state: IsolationState::from_u8(inputs.from_state).unwrap_or(IsolationState::Normal),
            to_state: IsolationState::from_u8(inputs.to_state).unwrap_or(IsolationState::Normal),
            severity: inputs.severity,
            inputs_canonical,
            timestamp_ns: inputs.timestamp_ns,
            parent_hash,
            decision_hash,
            flag,
            constitutional_violation,
        }
    }

    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(12);
        key.extend_from_slice(&self.timestamp_ns.to_be_bytes());
        key.extend_from_slice(&self.pid.to_be_bytes());
        key
    }

    pub fn is_decay(&self) -> bool {
        self.flag == DecisionFlag::Decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_inputs() -> CanonicalInputs {
        CanonicalInputs {
            pid: 4242,
            from_state: IsolationState::Normal.as_u8(),
            to_state: IsolationState::Pressure.as_u8(),
            severity: 4.8,
            a_t: 12.0,
            q_t: 0.0,
            i_t: 0.0,
            p_t: 0.0,
            timestamp_ns: 1,
            operator_id: None,
            justification_len: None,
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let inputs = sample_inputs();
        let r1 = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::Escalation, false);
        let r2 = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::Escalation, false);
        assert_eq!(r1.decision_hash, r2.decision_hash);
    }

    #[test]
    fn hash_depends_on_parent() {
        let inputs = sample_inputs();
        let r1 = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::Escalation, false);
        let r2 = DecisionRecord::new(&inputs, Hash::digest(b"x"), DecisionFlag::Escalation, false);
        assert_ne!(r1.decision_hash, r2.decision_hash);
    }

    #[test]
    fn storage_key_sorts_chronologically() {
        let mut inputs = sample_inputs();
        inputs.timestamp_ns = 1;
        let r1 = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::Escalation, false);
        inputs.timestamp_ns = 2;
        let r2 = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::Escalation, false);
        assert!(r1.storage_key() < r2.storage_key());
    }

    proptest! {
        /// spec §8: for consecutive ledger entries, `entries[k+1].parent_hash
        /// == entries[k].decision_hash`, and every `decision_hash` recomputes
        /// deterministically from its own canonical inputs and parent.
        #[test]
        fn chained_records_link_and_rehash_deterministically(
            chain_len in 1usize..20,
            severity in 0.0f64..10.0,
        ) {
            let mut tip = Hash::ZERO;
            let mut inputs = sample_inputs();
            inputs.severity = severity;
            for i in 0..chain_len {
                inputs.timestamp_ns = i as u64 + 1;
                let record = DecisionRecord::new(&inputs, tip, DecisionFlag::Escalation, false);
                prop_assert_eq!(record.parent_hash, tip);
                prop_assert_eq!(
                    record.decision_hash,
                    DecisionRecord::compute_hash(&record.inputs_canonical, &record.parent_hash)
                );
                tip = record.decision_hash;
            }
        }

        /// Changing any single canonical input must change the hash
        /// (collision resistance is sha2's job; this just pins that the
        /// canonical encoding actually threads every field into the hash).
        #[test]
        fn hash_changes_when_timestamp_changes(t1 in 0u64..1_000_000, t2 in 0u64..1_000_000) {
            prop_assume!(t1 != t2);
            let mut inputs = sample_inputs();
            inputs.timestamp_ns = t1;
            let r1 = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::Escalation, false);
            inputs.timestamp_ns = t2;
            let r2 = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::Escalation, false);
            prop_assert_ne!(r1.decision_hash, r2.decision_hash);
        }
    }

    #[test]
    fn operator_identity_is_threaded_into_the_hash() {
        let mut inputs = sample_inputs();
        let plain = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::OperatorReset, false);
        inputs.operator_id = Some("op-alice".to_string());
        inputs.justification_len = Some(42);
        let with_identity = DecisionRecord::new(&inputs, Hash::ZERO, DecisionFlag::OperatorReset, false);
        assert_ne!(plain.decision_hash, with_identity.decision_hash);
    }
}
