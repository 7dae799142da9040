//! Wall-clock helpers. Every protocol and persistence timestamp is Unix
//! milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix milliseconds.
///
/// Returns 0 if the system clock is set before the epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_after_2023() {
        assert!(unix_millis() > 1_672_531_200_000);
    }
}
