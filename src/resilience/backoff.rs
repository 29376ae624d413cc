//! Linear backoff for command retries.

use std::time::Duration;

/// Delay before publishing retry number `retry_count`: `base * retry_count`.
pub fn linear_backoff(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let base = Duration::from_millis(1000);
        assert_eq!(linear_backoff(base, 0), Duration::ZERO);
        assert_eq!(linear_backoff(base, 1), Duration::from_millis(1000));
        assert_eq!(linear_backoff(base, 3), Duration::from_millis(3000));
        assert_eq!(linear_backoff(Duration::MAX, 2), Duration::MAX);
    }
}
