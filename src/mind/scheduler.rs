//! Which guild to think about next

use serenity::all::GuildId;
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;

/// How often the scheduler looks for due guilds
pub const TICK: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct Scheduler {
    next: HashMap<GuildId, Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, guild_id: GuildId, at: Instant) {
        self.next.insert(guild_id, at);
    }

    /// Schedule at `at` unless the guild is already due sooner.
    pub fn schedule_by(&mut self, guild_id: GuildId, at: Instant) {
        let next = self.next.entry(guild_id).or_insert(at);
        if at < *next {
            *next = at;
        }
    }

    /// The guild whose tick is most overdue at `now`
    pub fn due(&self, now: Instant) -> Option<GuildId> {
        self.next
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by_key(|(_, at)| **at)
            .map(|(guild_id, _)| *guild_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_elapsed_guild_goes_first() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(GuildId::new(1), now - Duration::from_secs(1));
        scheduler.schedule(GuildId::new(2), now - Duration::from_secs(5));
        scheduler.schedule(GuildId::new(3), now + Duration::from_secs(10));

        assert_eq!(scheduler.due(now), Some(GuildId::new(2)));
        scheduler.schedule(GuildId::new(2), now + Duration::from_secs(4));
        assert_eq!(scheduler.due(now), Some(GuildId::new(1)));
        scheduler.schedule(GuildId::new(1), now + Duration::from_secs(4));
        assert_eq!(scheduler.due(now), None);
    }

    #[test]
    fn schedule_by_only_moves_earlier() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule_by(GuildId::new(1), now + Duration::from_secs(30));
        scheduler.schedule_by(GuildId::new(1), now + Duration::from_secs(60));
        assert_eq!(scheduler.due(now + Duration::from_secs(31)), Some(GuildId::new(1)));
        scheduler.schedule_by(GuildId::new(1), now);
        assert_eq!(scheduler.due(now), Some(GuildId::new(1)));
    }
}
