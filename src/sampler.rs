use crate::event::EventRecord;
use crate::quota::{QuotaLevel, QuotaState};
use rand::Rng;

/// Rate multiplier applied while quota is approaching its limit.
const APPROACHING_LIMIT_FACTOR: f64 = 0.5;

/// Rate multiplier applied while quota is exceeded.
const EXCEEDED_FACTOR: f64 = 0.1;

/// Independent per-record Bernoulli sampling.
#[derive(Debug, Clone)]
pub struct Sampler {
    rate: f64,
    adaptive: bool,
    quota: QuotaState,
}

impl Sampler {
    /// `rate` is clamped to `[0, 1]`. With `adaptive` set, the effective rate
    /// shrinks while the shared quota state reports pressure.
    pub fn new(rate: f64, quota: QuotaState, adaptive: bool) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            adaptive,
            quota,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn effective_rate(&self) -> f64 {
        if !self.adaptive {
            return self.rate;
        }
        match self.quota.level() {
            QuotaLevel::ApproachingLimit => self.rate * APPROACHING_LIMIT_FACTOR,
            QuotaLevel::Exceeded => self.rate * EXCEEDED_FACTOR,
            QuotaLevel::Unknown | QuotaLevel::Ok => self.rate,
        }
    }

    /// Keep/drop decision made before a record is built.
    pub fn should_capture(&self) -> bool {
        let rate = self.effective_rate();
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            rand::thread_rng().gen::<f64>() < rate
        }
    }

    pub fn decide(&self, _record: &EventRecord) -> bool {
        self.should_capture()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaDetail;

    #[test]
    fn test_full_rate_always_keeps() {
        let sampler = Sampler::new(1.0, QuotaState::new(), false);
        assert!((0..10_000).all(|_| sampler.should_capture()));
    }

    #[test]
    fn test_zero_rate_always_drops() {
        let sampler = Sampler::new(0.0, QuotaState::new(), false);
        assert!((0..10_000).all(|_| !sampler.should_capture()));
    }

    #[test]
    fn test_rate_is_clamped() {
        assert_eq!(Sampler::new(3.5, QuotaState::new(), false).rate(), 1.0);
        assert_eq!(Sampler::new(-1.0, QuotaState::new(), false).rate(), 0.0);
    }

    #[test]
    fn test_partial_rate_is_roughly_proportional() {
        let sampler = Sampler::new(0.25, QuotaState::new(), false);
        let kept = (0..20_000).filter(|_| sampler.should_capture()).count();
        // 0.25 * 20k = 5000, sd ~ 61
        assert!((4_500..5_500).contains(&kept), "kept {}", kept);
    }

    #[test]
    fn test_adaptive_rate_follows_quota() {
        let quota = QuotaState::new();
        let sampler = Sampler::new(0.8, quota.clone(), true);
        assert_eq!(sampler.effective_rate(), 0.8);

        quota.update(QuotaLevel::ApproachingLimit, QuotaDetail::default());
        assert!((sampler.effective_rate() - 0.4).abs() < f64::EPSILON);

        quota.update(QuotaLevel::Exceeded, QuotaDetail::default());
        assert!((sampler.effective_rate() - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_non_adaptive_ignores_quota() {
        let quota = QuotaState::new();
        let sampler = Sampler::new(1.0, quota.clone(), false);
        quota.update(QuotaLevel::Exceeded, QuotaDetail::default());
        assert!(sampler.should_capture());
    }
}
