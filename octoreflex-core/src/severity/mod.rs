pub mod control_law;

use crate::types::IsolationState;

#[derive(Debug, Clone, Copy)]
pub struct SeverityWeights {
    pub w_anomaly: f64,
    pub w_quorum: f64,
    pub w_integrity: f64,
    pub w_pressure: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            w_anomaly: 0.4,
            w_quorum: 1.0,
            w_integrity: 1.0,
            w_pressure: 1.0,
        }
    }
}

/// Strictly increasing severity thresholds (T_P, T_I, T_F, T_Q, T_T).
#[derive(Debug, Clone, Copy)]
pub struct SeverityThresholds {
    pub t_pressure: f64,
    pub t_isolated: f64,
    pub t_frozen: f64,
    pub t_quarantined: f64,
    pub t_terminated: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            t_pressure: 1.0,
            t_isolated: 3.0,
            t_frozen: 5.0,
            t_quarantined: 7.0,
            t_terminated: 9.0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("severity thresholds must be strictly increasing")]
    NotStrictlyIncreasing,
}
use thiserror::Error;

impl SeverityThresholds {
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let ordered = [
            self.t_pressure,
            self.t_isolated,
            self.t_frozen,
            self.t_quarantined,
            self.t_terminated,
        ];
        for w in ordered.windows(2) {
            if !(w[0] < w[1]) {
                return Err(ThresholdError::NotStrictlyIncreasing);
            }
        }
        Ok(())
    }

    /// Target state is the highest threshold crossed; evaluated from
    /// TERMINATED downward so ties resolve toward the higher isolation
    /// level (spec §4.5).
    pub fn target_state(&self, severity: f64) -> IsolationState {
        if severity >= self.t_terminated {
            IsolationState::Terminated
        } else if severity >= self.t_quarantined {
            IsolationState::Quarantined
        } else if severity >= self.t_frozen {
            IsolationState::Frozen
        } else if severity >= self.t_isolated {
            IsolationState::Isolated
        } else if severity >= self.t_pressure {
            IsolationState::Pressure
        } else {
            IsolationState::Normal
        }
    }
}

/// `S = w1*A + w2*Q + w3*I + w4*P`
pub fn compose_severity(
    weights: &SeverityWeights,
    a_t: f64,
    q_t: f64,
    i_t: f64,
    p_t: f64,
) -> f64 {
    weights.w_anomaly * a_t + weights.w_quorum * q_t + weights.w_integrity * i_t + weights.w_pressure * p_t
}

/// Semantic-hint risk-level boost to the integrity term, resolved per
/// spec §9's open question as `I_max/3` per risk level (levels 1..=3).
pub fn semantic_hint_boost(risk_level: u8, i_max: f64) -> f64 {
    (risk_level.min(3) as f64) * (i_max / 3.0)
}
