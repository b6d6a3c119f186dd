use std::time::Duration;

/// Per-attempt request timeout that doubles each retry up to `max`.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    base: Duration,
    max: Duration,
}

impl TimeoutPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        Duration::from_millis(base_ms.saturating_mul(1u64 << shift).min(max_ms))
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(7), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_doubles_until_capped() {
        let policy = TimeoutPolicy::new(Duration::from_millis(100), Duration::from_millis(800));
        let steps: Vec<_> = (0..6).map(|n| policy.for_attempt(n).as_millis()).collect();
        assert_eq!(steps, vec![100, 200, 400, 800, 800, 800]);
    }

    #[test]
    fn large_attempts_do_not_overflow() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn max_below_base_is_raised() {
        let policy = TimeoutPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.for_attempt(3), Duration::from_secs(5));
    }
}
