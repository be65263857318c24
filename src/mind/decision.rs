//! Whether to speak, and when to look again

use super::state::{Emotions, GuildState};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::time::Duration;

pub const SPEAK_THRESHOLD: f64 = 0.35;

const WEIGHT_ACTIVITY: f64 = 0.5;
const WEIGHT_EMOTION: f64 = 0.25;
const WEIGHT_TOPIC: f64 = 0.35;
const WEIGHT_RANDOM: f64 = 0.1;

/// Window of the buffer that counts towards topic relevance
const TOPIC_WINDOW: i64 = 5 * 60;

pub fn emotional_activation(emotions: &Emotions) -> f64 {
    ((emotions.anger + emotions.joy) / 2.0 - 0.3 * emotions.fatigue + 0.4 * emotions.engagement)
        .clamp(0.0, 1.0)
}

/// 0.7 plus the share of recent messages that mention the bot, or 0.2 if none do.
pub fn topic_relevance(state: &GuildState, now: DateTime<Utc>) -> f64 {
    let since = now - TimeDelta::seconds(TOPIC_WINDOW);
    let recent: Vec<_> = state.short_buffer.iter().filter(|m| m.at >= since).collect();
    let mentioned = recent.iter().filter(|m| m.mentions_bot).count();
    if mentioned == 0 {
        return 0.2;
    }
    0.7 + 0.3 * mentioned as f64 / recent.len() as f64
}

/// Having just spoken, or talking to nobody, makes speaking again less likely.
pub fn recent_spoke_penalty(state: &GuildState, now: DateTime<Utc>) -> f64 {
    let activity = &state.activity;
    let since_spoke = activity.last_spoke_at.map(|at| now - at);
    let mut penalty = match since_spoke {
        Some(elapsed) if elapsed < TimeDelta::seconds(60) => 0.2,
        Some(elapsed) if elapsed < TimeDelta::seconds(300) => 0.1,
        _ => 0.0,
    };
    penalty += 0.1 * activity.consecutive_bot_replies.min(3) as f64;
    penalty
}

/// `random` is a sample of U(0, 1).
pub fn desire_to_speak(state: &GuildState, now: DateTime<Utc>, random: f64) -> f64 {
    (WEIGHT_ACTIVITY * state.activity.score / 100.0
        + WEIGHT_EMOTION * emotional_activation(&state.emotions)
        + WEIGHT_TOPIC * topic_relevance(state, now)
        - recent_spoke_penalty(state, now)
        + WEIGHT_RANDOM * random)
        .clamp(0.0, 1.0)
}

/// Time until the next tick.  `random` is a sample of U(0, 1).
pub fn next_interval(score: f64, random: f64) -> Duration {
    let secs = if score >= 60.0 {
        4.0
    } else if score >= 20.0 {
        10.0 + 10.0 * random
    } else {
        30.0 + 30.0 * random
    };
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::all::{ChannelId, UserId};

    fn quiet_guild(now: DateTime<Utc>) -> GuildState {
        let mut state = GuildState::default();
        state.emotions = Emotions {
            updated_at: now,
            ..Default::default()
        };
        state.activity.score = 10.0;
        state.activity.last_spoke_at = Some(now);
        state
    }

    #[test]
    fn quiet_guild_stays_quiet() {
        let now = Utc::now();
        let state = quiet_guild(now);
        for random in [0.0, 0.5, 1.0] {
            assert!(desire_to_speak(&state, now, random) < SPEAK_THRESHOLD);
        }
    }

    #[test]
    fn busy_guild_with_a_mention_speaks() {
        let now = Utc::now();
        let mut state = quiet_guild(now);
        state.push_user(
            UserId::new(1),
            "Kim",
            "hey nex what do you think",
            true,
            ChannelId::new(2),
            now - TimeDelta::seconds(30),
        );
        state.activity.score = 80.0;
        state.activity.last_activity_update = Some(now);

        for random in [0.0, 0.5, 1.0] {
            assert!(desire_to_speak(&state, now, random) >= SPEAK_THRESHOLD);
        }
    }

    #[test]
    fn topic_relevance_counts_recent_mentions_only() {
        let now = Utc::now();
        let mut state = GuildState::default();
        let channel = ChannelId::new(2);
        state.push_user(UserId::new(1), "Kim", "old", true, channel, now - TimeDelta::minutes(10));
        assert_eq!(topic_relevance(&state, now), 0.2);

        state.push_user(UserId::new(1), "Kim", "a", true, channel, now);
        state.push_user(UserId::new(1), "Kim", "b", false, channel, now);
        assert!((topic_relevance(&state, now) - 0.85).abs() < 1e-9);
    }

    #[test]
    fn activation_is_clamped() {
        let emotions = Emotions {
            anger: 1.0,
            joy: 1.0,
            fatigue: 0.0,
            engagement: 1.0,
            updated_at: Utc::now(),
        };
        assert_eq!(emotional_activation(&emotions), 1.0);
        let tired = Emotions {
            fatigue: 1.0,
            ..Default::default()
        };
        assert_eq!(emotional_activation(&tired), 0.0);
    }

    #[test]
    fn interval_follows_activity() {
        assert_eq!(next_interval(75.0, 0.9), Duration::from_secs(4));
        let mid = next_interval(30.0, 0.5);
        assert!(mid >= Duration::from_secs(10) && mid <= Duration::from_secs(20));
        let low = next_interval(5.0, 1.0);
        assert_eq!(low, Duration::from_secs(60));
    }
}
