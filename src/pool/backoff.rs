//! Exponential backoff with jitter for engine restart retries

use std::time::Duration;

use rand::Rng;

/// Calculate delay for restart `attempt` (1-based) with exponential growth,
/// a hard cap and ±20% jitter.
pub fn calculate_backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let base_delay = base_ms.saturating_mul(2u64.pow(attempt.saturating_sub(1).min(5)));
    let capped_delay = base_delay.min(max_ms);

    let jitter_range = capped_delay / 5;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64
    } else {
        0
    };

    Duration::from_millis((capped_delay as i64 + jitter).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows() {
        let delay1 = calculate_backoff_with_jitter(1, 100, 10000);
        let delay2 = calculate_backoff_with_jitter(2, 100, 10000);
        let delay3 = calculate_backoff_with_jitter(3, 100, 10000);

        // Each subsequent delay should be roughly double (with jitter)
        assert!(delay2.as_millis() > delay1.as_millis() / 2);
        assert!(delay3.as_millis() > delay2.as_millis() / 2);
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 1..20 {
            let delay = calculate_backoff_with_jitter(attempt, 1000, 30000);
            // Cap plus the 20% jitter margin.
            assert!(delay.as_millis() <= 36000);
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..100 {
            let delay = calculate_backoff_with_jitter(1, 1000, 30000);
            assert!(delay.as_millis() >= 800);
            assert!(delay.as_millis() <= 1200);
        }
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        let delay = calculate_backoff_with_jitter(0, 1000, 30000);
        assert!(delay.as_millis() >= 800);
        assert!(delay.as_millis() <= 1200);
    }
}
