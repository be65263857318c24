//! Throttle for LLM calls

use chrono::{DateTime, Duration, Utc};
use std::{collections::VecDeque, sync::Mutex};

pub const PER_MINUTE: usize = 6;
pub const PER_HOUR: usize = 30;
/// Minimum seconds between two calls for the same guild
pub const GUILD_COOLDOWN_SECS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    Minute,
    Hour,
    GuildCooldown,
}

/// Global sliding windows.  The per-guild cooldown is checked against the guild's own record
/// of its last call, which persists with the rest of its state.
#[derive(Default)]
pub struct RateLimiter {
    calls: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a call slot at `now`.  `guild_last_call` is `None` to skip the guild cooldown.
    pub fn acquire(
        &self,
        now: DateTime<Utc>,
        guild_last_call: Option<DateTime<Utc>>,
    ) -> Result<(), Denied> {
        if let Some(last) = guild_last_call {
            if now - last < Duration::seconds(GUILD_COOLDOWN_SECS) {
                return Err(Denied::GuildCooldown);
            }
        }

        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while calls.front().is_some_and(|at| now - *at >= Duration::hours(1)) {
            calls.pop_front();
        }
        if calls.len() >= PER_HOUR {
            return Err(Denied::Hour);
        }
        let last_minute = calls
            .iter()
            .filter(|at| now - **at < Duration::minutes(1))
            .count();
        if last_minute >= PER_MINUTE {
            return Err(Denied::Minute);
        }

        calls.push_back(now);
        Ok(())
    }
}
