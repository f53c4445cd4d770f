// Pressure Accumulator (spec §4.4): per-PID EWMA of anomaly score.

#[derive(Debug, Clone, Copy)]
pub struct PressureAccumulator {
    alpha: f64,
    value: f64,
}

impl PressureAccumulator {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            value: 0.0,
        }
    }

    /// `P_{t+1} = alpha*P_t + (1-alpha)*A_t`
    pub fn update(&mut self, a_t: f64) -> f64 {
        self.value = self.alpha * self.value + (1.0 - self.alpha) * a_t;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}
