//! Per-key exponential requeue delay, reset on success.

use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<FxHashMap<String, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base), failures: Mutex::new(FxHashMap::default()) }
    }

    /// Delay before the next attempt for `key`; doubles per consecutive failure.
    pub fn next(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let n = failures.entry(key.to_string()).or_insert(0);
        let exp = *n;
        *n = n.saturating_add(1);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&self, key: &str) {
        self.failures.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
    }
}

impl Default for Backoff {
    fn default() -> Self { Self::new(Duration::from_millis(500), Duration::from_secs(300)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let got: Vec<u64> = (0..5).map(|_| b.next("ns/a").as_secs()).collect();
        assert_eq!(got, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn keys_are_independent_and_reset() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        b.next("a");
        b.next("a");
        assert_eq!(b.next("b"), Duration::from_secs(1));
        b.reset("a");
        assert_eq!(b.next("a"), Duration::from_secs(1));
    }

    #[test]
    fn huge_failure_counts_stay_capped() {
        let b = Backoff::new(Duration::from_millis(500), Duration::from_secs(300));
        for _ in 0..100 { b.next("k"); }
        assert_eq!(b.next("k"), Duration::from_secs(300));
    }
}
