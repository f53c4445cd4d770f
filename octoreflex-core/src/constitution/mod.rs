// Constitutional Validator (spec §4.10).
//
// Every Decision Record is checked here before it is allowed to commit.
// Chain-linkage verification (`verify_chain`) mirrors the previous-hash
// walk in `palm-observability`'s `IntegrityVerifier::verify_chain`, scoped
// down to this crate's single-field parent/decision hash pair instead of
// that module's richer audit-entry shape.

use crate::ledger::decision::{CanonicalInputs, DecisionRecord};
use crate::types::{Hash, IsolationState};
use std::sync::atomic::{AtomicU64, Ordering};

pub const A_MAX: f64 = 1_000_000.0;
pub const P_MAX: f64 = 1_000_000.0;
pub const SEVERITY_MAX: f64 = 10.0;
pub const DEFAULT_MAX_SKEW_NS: u64 = 5_000_000_000; // 5s

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    NonFinite,
    OutOfBounds,
    NonMonotonicTime,
    ExcessiveSkew,
    IsolationNonMonotonic,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Violation::NonFinite => "non-finite numeric input",
            Violation::OutOfBounds => "input out of declared bounds",
            Violation::NonMonotonicTime => "timestamp precedes last committed timestamp",
            Violation::ExcessiveSkew => "timestamp skew exceeds max_skew",
            Violation::IsolationNonMonotonic => "to_state must be >= from_state for an escalation",
        };
        write!(f, "{}", s)
    }
}

/// Running counters maintained by the validator (spec §4.10): verified
/// decisions, rejected violations, and chain depth.
#[derive(Default)]
pub struct ValidatorCounters {
    pub decisions_verified_total: AtomicU64,
    pub constitutional_violations_total: AtomicU64,
    pub chain_depth: AtomicU64,
}

pub struct ConstitutionalValidator {
    last_committed_timestamp: std::sync::atomic::AtomicU64,
    max_skew_ns: u64,
    pub counters: ValidatorCounters,
}

impl ConstitutionalValidator {
    pub fn new(max_skew_ns: u64) -> Self {
        Self {
            last_committed_timestamp: std::sync::atomic::AtomicU64::new(0),
            max_skew_ns,
            counters: ValidatorCounters::default(),
        }
    }

    /// Checks a proposed escalation's inputs before a `DecisionRecord` is
    /// built. `is_decay` relaxes the isolation-monotonicity check (decay
    /// records step down by exactly one level, checked by the caller).
    pub fn validate(&self, inputs: &CanonicalInputs, is_decay: bool) -> Result<(), Violation> {
        for v in [inputs.severity, inputs.a_t, inputs.q_t, inputs.i_t, inputs.p_t] {
            if !v.is_finite() {
                return Err(Violation::NonFinite);
            }
        }
        if !(0.0..=SEVERITY_MAX).contains(&inputs.severity) {
            return Err(Violation::OutOfBounds);
        }
        if !(0.0..=A_MAX).contains(&inputs.a_t) {
            return Err(Violation::OutOfBounds);
        }
        if !(0.0..=1.0).contains(&inputs.q_t) {
            return Err(Violation::OutOfBounds);
        }
        if !(0.0..=1.0).contains(&inputs.i_t) {
            return Err(Violation::OutOfBounds);
        }
        if !(0.0..=P_MAX).contains(&inputs.p_t) {
            return Err(Violation::OutOfBounds);
        }
        if IsolationState::from_u8(inputs.from_state).is_none()
            || IsolationState::from_u8(inputs.to_state).is_none()
        {
            return Err(Violation::OutOfBounds);
        }
        if !is_decay && inputs.to_state < inputs.from_state {
            return Err(Violation::IsolationNonMonotonic);
        }

        let last = self.last_committed_timestamp.load(Ordering::SeqCst);
        if inputs.timestamp_ns < last {
            return Err(Violation::NonMonotonicTime);
        }
        if last > 0 && inputs.timestamp_ns.saturating_sub(last) > self.max_skew_ns {
            return Err(Violation::ExcessiveSkew);
        }

        Ok(())
    }

    /// Records that a (possibly violating) decision committed, advancing
    /// the monotonic-time watermark only for non-violating commits.
    pub fn record_commit(&self, record: &DecisionRecord) {
        if record.constitutional_violation {
            self.counters
                .constitutional_violations_total
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.decisions_verified_total.fetch_add(1, Ordering::Relaxed);
            self.last_committed_timestamp
                .store(record.timestamp_ns, Ordering::SeqCst);
        }
        self.counters.chain_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Verifies per-PID chain linkage across a sequence of records already
    /// filtered to one PID and in commit order: each record's parent_hash
    /// must equal the previous record's decision_hash, and each
    /// decision_hash must recompute correctly from its own inputs.
    pub fn verify_chain(records: &[DecisionRecord]) -> Result<(), (usize, &'static str)> {
        for (i, record) in records.iter().enumerate() {
            let expected_hash = DecisionRecord::compute_hash(&record.inputs_canonical, &record.parent_hash);
            if expected_hash != record.decision_hash {
                return Err((i, "decision_hash does not match recomputed hash"));
            }
            if i > 0 {
                let prev: &DecisionRecord = &records[i - 1];
                if record.parent_hash != prev.decision_hash {
                    return Err((i, "parent_hash does not match previous decision_hash"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::decision::DecisionFlag;
    use proptest::prelude::*;

    fn valid_inputs(ts: u64) -> CanonicalInputs {
        CanonicalInputs {
            pid: 1,
            from_state: IsolationState::Normal.as_u8(),
            to_state: IsolationState::Pressure.as_u8(),
            severity: 4.8,
            a_t: 12.0,
            q_t: 0.0,
            i_t: 0.0,
            p_t: 0.0,
            timestamp_ns: ts,
            operator_id: None,
            justification_len: None,
        }
    }

    #[test]
    fn valid_inputs_pass() {
        let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
        assert!(v.validate(&valid_inputs(1), false).is_ok());
    }

    #[test]
    fn nan_is_rejected() {
        let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
        let mut inputs = valid_inputs(1);
        inputs.severity = f64::NAN;
        assert_eq!(v.validate(&inputs, false), Err(Violation::NonFinite));
    }

    #[test]
    fn infinite_is_rejected() {
        let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
        let mut inputs = valid_inputs(1);
        inputs.a_t = f64::INFINITY;
        assert_eq!(v.validate(&inputs, false), Err(Violation::NonFinite));
    }

    #[test]
    fn out_of_bounds_quorum_rejected() {
        let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
        let mut inputs = valid_inputs(1);
        inputs.q_t = 1.5;
        assert_eq!(v.validate(&inputs, false), Err(Violation::OutOfBounds));
    }

    #[test]
    fn non_monotonic_time_rejected_after_commit() {
        let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
        let r = DecisionRecord::new(&valid_inputs(100), Hash::ZERO, DecisionFlag::Escalation, false);
        v.record_commit(&r);
        assert_eq!(v.validate(&valid_inputs(50), false), Err(Violation::NonMonotonicTime));
    }

    #[test]
    fn excessive_skew_rejected() {
        let v = ConstitutionalValidator::new(100);
        let r = DecisionRecord::new(&valid_inputs(100), Hash::ZERO, DecisionFlag::Escalation, false);
        v.record_commit(&r);
        assert_eq!(v.validate(&valid_inputs(10_000), false), Err(Violation::ExcessiveSkew));
    }

    #[test]
    fn decay_allows_backward_state() {
        let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
        let mut inputs = valid_inputs(1);
        inputs.from_state = IsolationState::Isolated.as_u8();
        inputs.to_state = IsolationState::Pressure.as_u8();
        assert!(v.validate(&inputs, true).is_ok());
        assert_eq!(v.validate(&inputs, false), Err(Violation::IsolationNonMonotonic));
    }

    #[test]
    fn verify_chain_detects_broken_linkage() {
        let r1 = DecisionRecord::new(&valid_inputs(1), Hash::ZERO, DecisionFlag::Escalation, false);
        let r2 = DecisionRecord::new(&valid_inputs(2), Hash::digest(b"wrong"), DecisionFlag::Escalation, false);
        let result = ConstitutionalValidator::verify_chain(&[r1, r2]);
        assert!(result.is_err());
    }

    #[test]
    fn verify_chain_accepts_properly_linked_records() {
        let r1 = DecisionRecord::new(&valid_inputs(1), Hash::ZERO, DecisionFlag::Escalation, false);
        let r2 = DecisionRecord::new(&valid_inputs(2), r1.decision_hash, DecisionFlag::Escalation, false);
        assert!(ConstitutionalValidator::verify_chain(&[r1, r2]).is_ok());
    }

    proptest! {
        /// spec §8: no Decision Record with NaN/Inf or out-of-range
        /// severity is ever accepted by the validator.
        #[test]
        fn non_finite_severity_always_rejected(bits in any::<u64>()) {
            let candidate = f64::from_bits(bits);
            prop_assume!(!candidate.is_finite());
            let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
            let mut inputs = valid_inputs(1);
            inputs.severity = candidate;
            prop_assert_eq!(v.validate(&inputs, false), Err(Violation::NonFinite));
        }

        /// Any finite severity outside [0, SEVERITY_MAX] is rejected;
        /// any finite severity inside it passes the bounds check (other
        /// fields held at their valid defaults).
        #[test]
        fn severity_bounds_enforced(severity in -100.0f64..110.0) {
            let v = ConstitutionalValidator::new(DEFAULT_MAX_SKEW_NS);
            let mut inputs = valid_inputs(1);
            inputs.severity = severity;
            let result = v.validate(&inputs, false);
            if (0.0..=SEVERITY_MAX).contains(&severity) {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result, Err(Violation::OutOfBounds));
            }
        }
    }
}
