//! Outbound movement throttling.
//!
//! A [`MovementThrottle`] lets a movement report through at most once per
//! interval, and only when it differs from the last report that got
//! through: displacement above `position_epsilon`, a direction change above
//! `direction_epsilon`, or a flip of the moving flag. The transport uses a
//! short interval for its low-latency path; the durable store path uses a
//! second, slower throttle.

use std::f32::consts::{PI, TAU};
use std::time::Duration;

use crate::messages::WirePosition;

/// Throttle thresholds.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum time between two reports that get through.
    pub interval: Duration,
    /// Displacement (world units) that counts as a change.
    pub position_epsilon: f32,
    /// Direction change (radians) that counts as a change.
    pub direction_epsilon: f32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            position_epsilon: 0.01,
            direction_epsilon: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LastReport {
    at_ms: u64,
    position: WirePosition,
    direction: f32,
    moving: bool,
}

/// Rate and change gate for outbound movement reports.
#[derive(Debug, Clone)]
pub struct MovementThrottle {
    config: ThrottleConfig,
    last: Option<LastReport>,
}

impl MovementThrottle {
    /// Creates a throttle that lets the first report through.
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config, last: None }
    }

    /// Returns `true` and records the report if it may be sent at `now_ms`.
    pub fn admit(&mut self, now_ms: u64, position: WirePosition, direction: f32, moving: bool) -> bool {
        if let Some(last) = self.last {
            let interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX);
            if now_ms.saturating_sub(last.at_ms) < interval_ms {
                return false;
            }
            let displaced = last.position.distance(&position) > self.config.position_epsilon;
            let turned = angle_delta(last.direction, direction) > self.config.direction_epsilon;
            if !displaced && !turned && last.moving == moving {
                return false;
            }
        }

        self.last = Some(LastReport {
            at_ms: now_ms,
            position,
            direction,
            moving,
        });
        true
    }

    /// Forget the last report so the next one always gets through.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Time (Unix ms) of the last report that got through.
    pub fn last_sent_at(&self) -> Option<u64> {
        self.last.map(|l| l.at_ms)
    }
}

/// Smallest absolute difference between two angles, in `[0, PI]`.
pub fn angle_delta(a: f32, b: f32) -> f32 {
    let d = (b - a).rem_euclid(TAU);
    if d > PI { TAU - d } else { d }
}
