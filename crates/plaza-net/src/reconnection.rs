//! Client-side reconnection with bounded exponential backoff.
//!
//! When the transport detects a disconnect, [`ReconnectState`] computes
//! exponentially increasing delays with jitter, capped at
//! [`ReconnectConfig::max_delay`]. The transport task sleeps for each delay
//! before redialing and calls [`ReconnectState::reset`] once a connection is
//! re-established.

use std::time::Duration;

use rand::Rng;

/// Configuration for client-side reconnection behaviour.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt. Default: 500 ms.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between reconnection attempts. Default: 10 s.
    pub max_delay: Duration,
    /// Attempts before giving up; `0` retries forever. Default: 0.
    pub max_attempts: u32,
    /// Jitter factor (0.0–1.0). Applied as ±jitter to the delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 0,
            jitter: 0.25,
        }
    }
}

/// Tracks reconnection attempt count and computes the next backoff delay.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    /// Create a new state from the given config.
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    /// Returns `None` if max attempts have been exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.current_delay;
        self.attempts = self.attempts.saturating_add(1);

        // Uniform in [base * (1 - jitter), base * (1 + jitter)].
        let jittered = if self.config.jitter > 0.0 {
            let mut rng = rand::rng();
            let factor = rng.random_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let next = self.current_delay.mul_f64(self.config.backoff_multiplier);
        self.current_delay = next.min(self.config.max_delay);

        Some(jittered.min(self.config.max_delay))
    }

    /// Reset the reconnection state (called after a successful reconnection).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Return the number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Errors produced by the reconnection system.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// All configured attempts were used without success.
    #[error("maximum reconnection attempts exhausted after {0} tries")]
    MaxAttemptsExhausted(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_sequence_is_exponential() {
        let mut state = ReconnectState::new(config_no_jitter());

        assert_eq!(state.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_max_backoff_is_capped() {
        let mut state = ReconnectState::new(config_no_jitter());

        let mut last_delay = Duration::ZERO;
        for _ in 0..15 {
            if let Some(d) = state.next_delay() {
                last_delay = d;
            }
        }

        assert_eq!(last_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_max_attempts_retries_forever() {
        let mut state = ReconnectState::new(config_no_jitter());
        for _ in 0..1_000 {
            assert!(state.next_delay().is_some());
        }
        assert_eq!(state.attempts(), 1_000);
    }

    #[test]
    fn test_max_attempts_exhausted() {
        let config = ReconnectConfig {
            max_attempts: 3,
            jitter: 0.0,
            ..Default::default()
        };
        let mut state = ReconnectState::new(config);

        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_none());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut state = ReconnectState::new(config_no_jitter());
        state.next_delay();
        state.next_delay();
        assert_eq!(state.attempts(), 2);

        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..50 {
            let mut state = ReconnectState::new(ReconnectConfig::default());
            let d = state.next_delay().unwrap();
            assert!(d >= Duration::from_millis(370), "{d:?} below jitter floor");
            assert!(d <= Duration::from_millis(630), "{d:?} above jitter ceiling");
        }
    }
}
