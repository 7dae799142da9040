//! Dead reckoning for remote participants.
//!
//! A movement report starts a segment from wherever the participant is
//! currently drawn to the reported target. Each tick the participant is
//! placed along that segment by elapsed local time at the nominal walking
//! speed:
//!
//! ```text
//! travel_time = |target - source| / nominal_speed
//! progress    = clamp((now - movement_start) / travel_time, 0, 1)
//! position    = lerp(source, target, progress)
//! ```
//!
//! Elapsed time is measured against the locally recorded `movement_start`,
//! so remote clock skew never enters the math. A [`Smoother`] can be layered
//! on top for display, decaying toward the logical position exponentially.

use std::collections::HashMap;
use std::time::Duration;

use glam::Vec3;

use crate::participant::{Participant, ParticipantId};
use crate::registry::ParticipantMap;

/// Segments shorter than this are treated as standing still.
pub const MIN_SEGMENT_LENGTH: f32 = 1e-4;

/// Display positions closer than this to their goal settle onto it.
const SETTLE_DISTANCE: f32 = 1e-3;

/// Interpolation and smoothing settings.
#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    /// Walking speed in world units per second, shared with the local
    /// movement controller.
    pub nominal_speed: f32,
    /// Exponential approach rate of the display smoother, per second.
    /// Zero or less disables smoothing.
    pub smoothing_rate: f32,
    /// Largest frame step the smoother integrates at once.
    pub max_smoothing_step: Duration,
    /// Gaps wider than this snap instead of gliding.
    pub snap_distance: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            nominal_speed: 15.0,
            smoothing_rate: 12.0,
            max_smoothing_step: Duration::from_millis(100),
            snap_distance: 10.0,
        }
    }
}

/// Facing angle of a segment, 0 toward +Z and `PI / 2` toward +X. `None`
/// if the segment has no horizontal extent.
pub fn segment_direction(source: Vec3, target: Vec3) -> Option<f32> {
    let dx = target.x - source.x;
    let dz = target.z - source.z;
    (dx.hypot(dz) > MIN_SEGMENT_LENGTH).then(|| dx.atan2(dz))
}

/// Fraction of the segment covered at `now_ms`, in `[0, 1]`.
pub fn progress(source: Vec3, target: Vec3, movement_start: u64, now_ms: u64, speed: f32) -> f32 {
    let distance = source.distance(target);
    if distance <= MIN_SEGMENT_LENGTH || speed <= 0.0 {
        return 1.0;
    }
    let travel_ms = distance / speed * 1000.0;
    let elapsed_ms = now_ms.saturating_sub(movement_start) as f32;
    (elapsed_ms / travel_ms).clamp(0.0, 1.0)
}

/// Start a segment from the participant's current position toward
/// `target`. `fallback_direction` is kept when the segment has no
/// horizontal extent (turning in place).
pub fn begin_segment(p: &mut Participant, target: Vec3, fallback_direction: f32, now_ms: u64) {
    p.source = p.position;
    p.target = target;
    p.movement_start = now_ms;
    p.direction = segment_direction(p.source, target).unwrap_or(fallback_direction);
    p.moving = p.source.distance(target) > MIN_SEGMENT_LENGTH;
    if !p.moving {
        p.position = target;
    }
}

/// Exponential display smoothing toward a moving goal.
#[derive(Debug, Clone)]
pub struct Smoother {
    rendered: Option<Vec3>,
    rate: f32,
    snap_distance: f32,
}

impl Smoother {
    pub fn new(rate: f32, snap_distance: f32) -> Self {
        Self {
            rendered: None,
            rate,
            snap_distance,
        }
    }

    /// Step toward `goal` over `dt` seconds and return the new display
    /// position. The first update, large gaps, and a non-positive rate all
    /// snap.
    pub fn update(&mut self, goal: Vec3, dt: f32) -> Vec3 {
        let next = match self.rendered {
            Some(current) if self.rate > 0.0 && current.distance(goal) <= self.snap_distance => {
                let factor = 1.0 - (-self.rate * dt.max(0.0)).exp();
                let stepped = current.lerp(goal, factor);
                if stepped.distance(goal) < SETTLE_DISTANCE {
                    goal
                } else {
                    stepped
                }
            }
            _ => goal,
        };
        self.rendered = Some(next);
        next
    }

    /// Last display position, if any.
    pub fn rendered(&self) -> Option<Vec3> {
        self.rendered
    }
}

/// Advances every remote participant along its segment and keeps one
/// [`Smoother`] per participant for display.
#[derive(Debug)]
pub struct MovementInterpolator {
    config: InterpolationConfig,
    smoothers: HashMap<ParticipantId, Smoother>,
    last_frame: Option<u64>,
}

impl MovementInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            smoothers: HashMap::new(),
            last_frame: None,
        }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    /// Move every walking participant to where it should be at `now_ms`.
    /// Returns how many arrived this call.
    pub fn advance(&self, participants: &mut ParticipantMap, now_ms: u64) -> usize {
        let mut arrived = 0;
        for p in participants.values_mut().filter(|p| p.moving) {
            let t = progress(
                p.source,
                p.target,
                p.movement_start,
                now_ms,
                self.config.nominal_speed,
            );
            if t >= 1.0 {
                p.position = p.target;
                p.moving = false;
                arrived += 1;
            } else {
                p.position = p.source.lerp(p.target, t);
            }
        }
        arrived
    }

    /// Seconds since the previous frame, clamped to the smoothing step.
    /// Zero on the first frame.
    pub fn frame_dt(&mut self, now_ms: u64) -> f32 {
        let dt = self
            .last_frame
            .map(|last| now_ms.saturating_sub(last) as f32 / 1000.0)
            .unwrap_or(0.0);
        self.last_frame = Some(now_ms);
        dt.min(self.config.max_smoothing_step.as_secs_f32())
    }

    /// Display position for `id` given its logical position.
    pub fn smoothed(&mut self, id: &ParticipantId, logical: Vec3, dt: f32) -> Vec3 {
        let (rate, snap) = (self.config.smoothing_rate, self.config.snap_distance);
        self.smoothers
            .entry(id.clone())
            .or_insert_with(|| Smoother::new(rate, snap))
            .update(logical, dt)
    }

    /// Drop display state for a departed participant.
    pub fn forget(&mut self, id: &ParticipantId) {
        self.smoothers.remove(id);
    }

    /// Number of participants with display state.
    pub fn tracked(&self) -> usize {
        self.smoothers.len()
    }
}
