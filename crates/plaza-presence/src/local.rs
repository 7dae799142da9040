//! The local participant's own movement.
//!
//! [`LocalMovementController`] is authoritative for the local position. It
//! walks toward a clicked target or along a steering direction at the same
//! nominal speed remote peers use to dead-reckon it, and reports a
//! [`LocalMotion`] every tick for the session to send and persist.

use std::time::Duration;

use glam::Vec3;

use crate::interpolation::segment_direction;
use crate::participant::duration_ms;

/// Walk cycles per second while moving.
const STRIDES_PER_SECOND: f32 = 1.5;

/// Largest step integrated in one tick. A stalled host loop resumes with a
/// short step instead of a jump.
const MAX_TICK_STEP: Duration = Duration::from_millis(250);

/// Movement input for the local participant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementIntent {
    /// Walk to a point. The world-bounds collaborator has already clamped it.
    MoveTo(Vec3),
    /// Keep walking along a direction. Only the horizontal part is used.
    Steer(Vec3),
    Stop,
}

/// The local participant's state after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalMotion {
    /// Where the participant is now.
    pub position: Vec3,
    /// Start of the current segment.
    pub source: Vec3,
    /// What peers are told the participant is heading for: the walk target,
    /// or the current position when steering or standing.
    pub target: Vec3,
    pub direction: f32,
    pub moving: bool,
    pub anim_phase: f32,
    /// Unix milliseconds of the tick.
    pub timestamp: u64,
}

#[derive(Debug)]
pub struct LocalMovementController {
    position: Vec3,
    source: Vec3,
    destination: Option<Vec3>,
    steer: Option<Vec3>,
    direction: f32,
    anim_phase: f32,
    speed: f32,
    last_tick: Option<u64>,
}

impl LocalMovementController {
    pub fn new(start: Vec3, direction: f32, speed: f32) -> Self {
        Self {
            position: start,
            source: start,
            destination: None,
            steer: None,
            direction,
            anim_phase: 0.0,
            speed,
            last_tick: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn direction(&self) -> f32 {
        self.direction
    }

    pub fn is_moving(&self) -> bool {
        self.destination.is_some() || self.steer.is_some()
    }

    /// Replace the current intent. Takes effect on the next tick.
    pub fn set_intent(&mut self, intent: MovementIntent) {
        self.source = self.position;
        match intent {
            MovementIntent::MoveTo(target) if target.is_finite() => {
                self.steer = None;
                self.destination = Some(target);
                if let Some(d) = segment_direction(self.position, target) {
                    self.direction = d;
                }
            }
            MovementIntent::Steer(dir) => {
                self.destination = None;
                let flat = Vec3::new(dir.x, 0.0, dir.z);
                self.steer = flat.try_normalize();
                if let Some(d) = self.steer {
                    self.direction = d.x.atan2(d.z);
                }
            }
            MovementIntent::MoveTo(_) | MovementIntent::Stop => {
                self.destination = None;
                self.steer = None;
            }
        }
    }

    /// Advance to `now_ms` and report the result.
    pub fn tick(&mut self, now_ms: u64) -> LocalMotion {
        let dt_ms = self
            .last_tick
            .map(|last| now_ms.saturating_sub(last))
            .unwrap_or(0)
            .min(duration_ms(MAX_TICK_STEP));
        self.last_tick = Some(now_ms);
        let dt = dt_ms as f32 / 1000.0;
        let step = self.speed.max(0.0) * dt;

        if let Some(dest) = self.destination {
            let remaining = dest - self.position;
            if remaining.length() <= step {
                self.position = dest;
                self.destination = None;
            } else {
                self.position += remaining.normalize_or_zero() * step;
            }
        } else if let Some(dir) = self.steer {
            self.position += dir * step;
        }

        let moving = self.is_moving();
        self.anim_phase = if moving {
            (self.anim_phase + dt * STRIDES_PER_SECOND).fract()
        } else {
            0.0
        };

        LocalMotion {
            position: self.position,
            source: self.source,
            target: self.destination.unwrap_or(self.position),
            direction: self.direction,
            moving,
            anim_phase: self.anim_phase,
            timestamp: now_ms,
        }
    }
}

/// Fires once per interval; used to force a persisted position row while
/// nothing else is written.
#[derive(Debug, Clone)]
pub struct HeartbeatTimer {
    interval_ms: u64,
    last: Option<u64>,
}

impl HeartbeatTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: duration_ms(interval),
            last: None,
        }
    }

    /// `true` if nothing was recorded within the interval before `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    /// Note a write at `now_ms`, whatever caused it.
    pub fn record(&mut self, now_ms: u64) {
        self.last = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
