use std::time::Duration;

/// Linear `attempts × 5s` backoff with a 5-minute cap (`spec.md` §4.2).
pub fn retry_backoff(attempts: i32) -> Duration {
    let linear = Duration::from_secs(attempts.max(0) as u64 * 5);
    let cap = Duration::from_secs(5 * 60);
    linear.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_linearly_below_the_cap() {
        assert_eq!(retry_backoff(1), Duration::from_secs(5));
        assert_eq!(retry_backoff(4), Duration::from_secs(20));
    }

    #[test]
    fn caps_at_five_minutes() {
        assert_eq!(retry_backoff(1000), Duration::from_secs(300));
    }
}
