// Control Law Parameter Loop (spec §4.11).
//
// m_t tracks aggregate pressure across the node (or swarm, when federated
// lambda averaging is enabled) and feeds back into the camouflage epoch
// scheduler and an optional anomaly floor.

use crate::types::IsolationState;

/// `sigmoid(x, k) = 1 / (1 + e^{-k*x})`
pub fn sigmoid(x: f64, k: f64) -> f64 {
    1.0 / (1.0 + (-k * x).exp())
}

#[derive(Debug, Clone, Copy)]
pub struct ControlLawParams {
    pub lambda1: f64,
    pub lambda2: f64,
    pub s_max: f64,
    pub gain_k: f64,
    /// Optional PI extension (spec §4.5/§9): anti-windup clamp ceiling.
    pub integral_gain: Option<f64>,
    pub integral_max: f64,
}

impl Default for ControlLawParams {
    fn default() -> Self {
        Self {
            lambda1: 0.4,
            lambda2: 0.6,
            s_max: 10.0,
            gain_k: 1.0,
            integral_gain: None,
            integral_max: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControlLaw {
    params: ControlLawParams,
    m_t: f64,
    integral: f64,
}

impl ControlLaw {
    pub fn new(params: ControlLawParams, m0: f64) -> Self {
        Self {
            params,
            m_t: m0.clamp(0.0, 1.0),
            integral: 0.0,
        }
    }

    pub fn m_t(&self) -> f64 {
        self.m_t
    }

    /// `m_{t+1} = clamp(m_t + lambda1*sigmoid(S_t/S_max,k) - lambda2*(1-U_t), 0, 1)`
    pub fn step(&mut self, severity: f64, state: IsolationState) -> f64 {
        self.step_with_utilization(severity, state.utilization())
    }

    /// Same update as [`Self::step`] but takes `U_t` directly rather than
    /// deriving it from an [`IsolationState`]. `octoreflex-sim` drives the
    /// control law outside of any live state machine, so it needs to supply
    /// `U_t` as a bare CLI scalar (spec §6's `--U` flag).
    pub fn step_with_utilization(&mut self, severity: f64, u_t: f64) -> f64 {
        let a_hat = sigmoid(severity / self.params.s_max, self.params.gain_k);
        self.m_t = (self.m_t + self.params.lambda1 * a_hat - self.params.lambda2 * (1.0 - u_t))
            .clamp(0.0, 1.0);
        self.m_t
    }

    /// Optional clamped integral term added to severity by the PI
    /// extension, gated by `params.integral_gain`.
    pub fn integral_term(&mut self, a_t: f64) -> f64 {
        match self.params.integral_gain {
            Some(alpha_i) => {
                self.integral = (self.integral + alpha_i * a_t).clamp(0.0, self.params.integral_max);
                self.integral
            }
            None => 0.0,
        }
    }

    pub fn reset_integral(&mut self) {
        self.integral = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_bounded_zero_to_one() {
        assert!(sigmoid(-100.0, 1.0) > 0.0);
        assert!(sigmoid(-100.0, 1.0) < 0.01);
        assert!(sigmoid(100.0, 1.0) > 0.99);
        assert!((sigmoid(0.0, 1.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn step_stays_within_unit_interval() {
        let mut cl = ControlLaw::new(ControlLawParams::default(), 0.2);
        for _ in 0..1000 {
            let m = cl.step(9.0, IsolationState::Normal);
            assert!((0.0..=1.0).contains(&m));
        }
    }

    #[test]
    fn high_utilization_pulls_m_down() {
        let mut cl = ControlLaw::new(ControlLawParams::default(), 0.5);
        let m = cl.step(0.0, IsolationState::Terminated);
        assert!(m < 0.5);
    }

    #[test]
    fn integral_term_is_zero_when_not_gated() {
        let mut cl = ControlLaw::new(ControlLawParams::default(), 0.0);
        assert_eq!(cl.integral_term(5.0), 0.0);
    }

    #[test]
    fn integral_term_clamps_at_ceiling() {
        let mut params = ControlLawParams::default();
        params.integral_gain = Some(1.0);
        params.integral_max = 1.0;
        let mut cl = ControlLaw::new(params, 0.0);
        for _ in 0..10 {
            cl.integral_term(1.0);
        }
        assert!((cl.integral - 1.0).abs() < 1e-9);
    }
}
