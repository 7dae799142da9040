//! Scripted behaviour for the headless client: walk to random points inside
//! a square yard, pause, and now and then say something.

use glam::Vec3;
use plaza_presence::{LocalMotion, MovementIntent};
use rand::Rng;

const LINES: &[&str] = &["hi!", "nice day", "anyone around?", "brb", "gg"];

#[derive(Debug, Clone)]
pub struct WanderConfig {
    /// Targets stay within `[-half_extent, half_extent]` on x and z.
    pub half_extent: f32,
    /// Pause range after arriving, in milliseconds.
    pub pause_ms: (u64, u64),
    /// Gap range between chat lines, in milliseconds.
    pub chat_gap_ms: (u64, u64),
}

impl Default for WanderConfig {
    fn default() -> Self {
        Self {
            half_extent: 20.0,
            pause_ms: (1_000, 4_000),
            chat_gap_ms: (8_000, 30_000),
        }
    }
}

pub struct Wanderer<R> {
    config: WanderConfig,
    rng: R,
    next_move_at: Option<u64>,
    next_chat_at: Option<u64>,
}

impl<R: Rng> Wanderer<R> {
    pub fn new(config: WanderConfig, rng: R) -> Self {
        Self {
            config,
            rng,
            next_move_at: None,
            next_chat_at: None,
        }
    }

    /// A new walk target once the previous walk ended and the pause is over.
    pub fn next_intent(&mut self, motion: &LocalMotion) -> Option<MovementIntent> {
        if motion.moving {
            self.next_move_at = None;
            return None;
        }
        let now = motion.timestamp;
        match self.next_move_at {
            None => {
                let (lo, hi) = self.config.pause_ms;
                self.next_move_at = Some(now + self.rng.random_range(lo..=hi.max(lo)));
                None
            }
            Some(at) if now >= at => {
                self.next_move_at = None;
                Some(MovementIntent::MoveTo(self.pick_target()))
            }
            Some(_) => None,
        }
    }

    /// A chat line when the gap since the last one has passed.
    pub fn next_line(&mut self, now_ms: u64) -> Option<&'static str> {
        let (lo, hi) = self.config.chat_gap_ms;
        let at = *self
            .next_chat_at
            .get_or_insert_with(|| now_ms + self.rng.random_range(lo..=hi.max(lo)));
        if now_ms < at {
            return None;
        }
        self.next_chat_at = Some(now_ms + self.rng.random_range(lo..=hi.max(lo)));
        Some(LINES[self.rng.random_range(0..LINES.len())])
    }

    fn pick_target(&mut self) -> Vec3 {
        let e = self.config.half_extent.abs();
        if e == 0.0 {
            return Vec3::ZERO;
        }
        Vec3::new(
            self.rng.random_range(-e..=e),
            0.0,
            self.rng.random_range(-e..=e),
        )
    }
}
