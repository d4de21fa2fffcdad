use rand::Rng;
use std::time::Duration;

/// Exponential backoff with full jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Upper bound for the delay before retry number `retry` (0-based):
    /// `base * 2^retry`, capped at `max`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        self.delay_with(retry, retry_after, &mut rand::thread_rng())
    }

    /// A server-provided `Retry-After` raises the jittered delay, never above `max`.
    pub fn delay_with<R: Rng + ?Sized>(
        &self,
        retry: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        let ceiling = self.ceiling(retry);
        let jittered = if ceiling.is_zero() {
            Duration::ZERO
        } else {
            rng.gen_range(Duration::ZERO..=ceiling)
        };

        match retry_after {
            Some(hint) => jittered.max(hint).min(self.max),
            None => jittered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(500), Duration::from_secs(30))
    }

    #[test]
    fn test_ceiling_doubles_and_caps() {
        let b = backoff();
        assert_eq!(b.ceiling(0), Duration::from_millis(500));
        assert_eq!(b.ceiling(1), Duration::from_secs(1));
        assert_eq!(b.ceiling(3), Duration::from_secs(4));
        assert_eq!(b.ceiling(6), Duration::from_secs(30));
        assert_eq!(b.ceiling(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_ceiling() {
        let b = backoff();
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..8 {
            for _ in 0..100 {
                assert!(b.delay_with(retry, None, &mut rng) <= b.ceiling(retry));
            }
        }
    }

    #[test]
    fn test_retry_after_raises_delay_but_is_capped() {
        let b = backoff();
        let mut rng = StdRng::seed_from_u64(1);
        let raised = b.delay_with(0, Some(Duration::from_secs(5)), &mut rng);
        assert_eq!(raised, Duration::from_secs(5));

        let capped = b.delay_with(0, Some(Duration::from_secs(600)), &mut rng);
        assert_eq!(capped, Duration::from_secs(30));
    }

    #[test]
    fn test_max_never_below_base() {
        let b = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(b.ceiling(5), Duration::from_secs(2));
    }
}
