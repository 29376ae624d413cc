//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a fallible async operation a bounded number of times
//! - Wait a fixed delay between attempts
//!
//! # Design Decisions
//! - Used for transport hiccups (e.g. a broker ack), never for business failures
//! - The last error is returned when every attempt fails

use std::future::Future;
use std::time::Duration;

/// Run `op` up to `attempts` times (at least once), sleeping `delay` between tries.
pub async fn retry_with_fixed_delay<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    attempt,
                    remaining = attempts - attempt,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = &AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<u32, String> = retry_with_fixed_delay(3, Duration::from_millis(100), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(format!("fail {n}"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), String> = retry_with_fixed_delay(2, Duration::from_millis(10), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope".to_string())
        })
        .await;

        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let calls = &AtomicU32::new(0);
        let _: Result<(), &str> = retry_with_fixed_delay(0, Duration::ZERO, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("x")
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
