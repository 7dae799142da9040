//! Chat overlays: one short-lived message per participant, shown in place of
//! the display name until its TTL runs out.
//!
//! Incoming messages are merged by the registry using [`supersedes`]; this
//! module decides what is visible and expires old overlays. Outbound local
//! chat is checked against [`ChatRules`] and a sliding-window
//! [`RateTracker`] before it is sent.

use std::collections::VecDeque;
use std::time::Duration;

use crate::participant::{ChatOverlay, Participant, duration_ms};
use crate::registry::ParticipantMap;

/// Outbound chat rules.
#[derive(Debug, Clone)]
pub struct ChatRules {
    /// Longest accepted message, in characters after trimming.
    pub max_message_length: usize,
    /// Messages allowed within `rate_limit_window`.
    pub rate_limit_messages: u32,
    pub rate_limit_window: Duration,
}

impl Default for ChatRules {
    fn default() -> Self {
        Self {
            max_message_length: 200,
            rate_limit_messages: 5,
            rate_limit_window: Duration::from_secs(10),
        }
    }
}

/// Reason a local message was not sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatRejection {
    #[error("message is empty")]
    Empty,
    #[error("message is {length} characters, limit is {max}")]
    TooLong { length: usize, max: usize },
    #[error("too many messages, wait before sending again")]
    RateLimited,
}

/// Sliding-window message counter.
#[derive(Debug, Clone)]
pub struct RateTracker {
    sent: VecDeque<u64>,
    max_count: u32,
    window_ms: u64,
}

impl RateTracker {
    pub fn new(max_count: u32, window: Duration) -> Self {
        Self {
            sent: VecDeque::new(),
            max_count,
            window_ms: duration_ms(window),
        }
    }

    /// Records a message at `now_ms` and returns `true` if the limit allows
    /// it. A refused message is not recorded.
    pub fn allow(&mut self, now_ms: u64) -> bool {
        while self
            .sent
            .front()
            .is_some_and(|t| now_ms.saturating_sub(*t) >= self.window_ms)
        {
            self.sent.pop_front();
        }
        if self.sent.len() as u32 >= self.max_count {
            return false;
        }
        self.sent.push_back(now_ms);
        true
    }
}

/// `true` if `incoming` should replace `current`. A newer or equally new
/// message always wins; an older one is ignored.
pub fn supersedes(current: Option<&ChatOverlay>, incoming: &ChatOverlay) -> bool {
    current.is_none_or(|c| incoming.timestamp >= c.timestamp)
}

/// Overlay visibility, expiry, and outbound validation.
#[derive(Debug, Clone)]
pub struct ChatOverlayManager {
    ttl: Duration,
    rules: ChatRules,
    rate: RateTracker,
}

impl ChatOverlayManager {
    pub fn new(ttl: Duration, rules: ChatRules) -> Self {
        let rate = RateTracker::new(rules.rate_limit_messages, rules.rate_limit_window);
        Self { ttl, rules, rate }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The text `p` currently shows, if any.
    pub fn visible_text<'a>(&self, p: &'a Participant, now_ms: u64) -> Option<&'a str> {
        p.chat
            .as_ref()
            .filter(|c| c.is_visible(now_ms, self.ttl))
            .map(|c| c.text.as_str())
    }

    /// Label drawn above `p`: the chat text while visible, else the name.
    pub fn label<'a>(&self, p: &'a Participant, now_ms: u64) -> &'a str {
        self.visible_text(p, now_ms).unwrap_or(&p.display_name)
    }

    /// Number of overlays in `participants` that have run out.
    pub fn expired_count(&self, participants: &ParticipantMap, now_ms: u64) -> usize {
        participants
            .values()
            .filter(|p| p.chat.as_ref().is_some_and(|c| c.is_expired(now_ms, self.ttl)))
            .count()
    }

    /// Clear every overlay that has run out. Participants are untouched
    /// otherwise. Returns how many were cleared.
    pub fn expire(&self, participants: &mut ParticipantMap, now_ms: u64) -> usize {
        let mut cleared = 0;
        for p in participants.values_mut() {
            if p.chat.as_ref().is_some_and(|c| c.is_expired(now_ms, self.ttl)) {
                p.chat = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// Check a local message before sending. Returns the trimmed text.
    pub fn validate_outbound(&mut self, text: &str, now_ms: u64) -> Result<String, ChatRejection> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatRejection::Empty);
        }
        let length = trimmed.chars().count();
        if length > self.rules.max_message_length {
            return Err(ChatRejection::TooLong {
                length,
                max: self.rules.max_message_length,
            });
        }
        if !self.rate.allow(now_ms) {
            return Err(ChatRejection::RateLimited);
        }
        Ok(trimmed.to_string())
    }
}
