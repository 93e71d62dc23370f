use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Percentage over a threshold, rounded: round((observed / threshold - 1) * 100).
pub fn delta_percent(observed: u64, threshold: u64) -> i64 {
    if threshold == 0 {
        return 0;
    }
    ((observed as f64 / threshold as f64 - 1.0) * 100.0).round() as i64
}

/// Bytes rendered as megabytes with two decimals, for log lines and explanations.
pub fn megabytes(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_percent() {
        assert_eq!(delta_percent(12, 12), 0);
        assert_eq!(delta_percent(15, 12), 25);
        assert_eq!(delta_percent(6, 5), 20);
        assert_eq!(delta_percent(0, 0), 0);
    }

    #[test]
    fn test_megabytes() {
        assert_eq!(megabytes(20 * 1024 * 1024), 20.0);
        assert_eq!(megabytes(1_048_576 + 524_288), 1.5);
    }
}
