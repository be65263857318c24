//! Per-guild mental state and where it lives on disk

use super::person::Person;
use crate::storage::{read_json, write_atomic, write_json};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, GuildId, UserId};
use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
};

/// Messages kept in the short-term buffer
pub const SHORT_BUFFER_LEN: usize = 80;
/// Emotion decay per second
pub const EMOTION_DECAY: f64 = 0.002;
/// Activity decay per second (five-minute half-life)
pub const ACTIVITY_DECAY: f64 = std::f64::consts::LN_2 / 300.0;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Emotions {
    pub anger: f64,
    pub joy: f64,
    pub fatigue: f64,
    pub engagement: f64,
    pub updated_at: DateTime<Utc>,
}

impl Default for Emotions {
    fn default() -> Self {
        Self {
            anger: 0.0,
            joy: 0.0,
            fatigue: 0.0,
            engagement: 0.0,
            updated_at: Utc::now(),
        }
    }
}

impl Emotions {
    /// `e ← e · max(0, 1 − k·Δs)` for the time since the last update
    pub fn decay(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
        let factor = (1.0 - EMOTION_DECAY * elapsed).max(0.0);
        for value in [
            &mut self.anger,
            &mut self.joy,
            &mut self.fatigue,
            &mut self.engagement,
        ] {
            *value = (*value * factor).clamp(0.0, 1.0);
        }
        self.updated_at = now;
    }

    pub fn bump(value: &mut f64, by: f64) {
        *value = (*value + by).clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Activity {
    /// [0, 100]
    pub score: f64,
    pub last_msg_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_spoke_at: Option<DateTime<Utc>>,
    pub last_channel_id: Option<ChannelId>,
    pub consecutive_bot_replies: u32,
    pub awaiting_reply: bool,
    pub awaiting_reply_since: Option<DateTime<Utc>>,
    pub awaiting_topic: Option<String>,
    pub last_action: Option<String>,
    pub last_topic: Option<String>,
    pub last_llm_call_at: Option<DateTime<Utc>>,
    pub last_activity_update: Option<DateTime<Utc>>,
}

impl Activity {
    /// `score ← score · exp(−k·Δs)` since the last update
    pub fn decay(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_activity_update {
            let elapsed = (now - last).num_milliseconds().max(0) as f64 / 1000.0;
            self.score = (self.score * (-ACTIVITY_DECAY * elapsed).exp()).clamp(0.0, 100.0);
        }
        self.last_activity_update = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User(UserId),
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    pub speaker: Speaker,
    pub author_name: String,
    pub content: String,
    pub at: DateTime<Utc>,
    pub mentions_bot: bool,
}

#[derive(Debug, Default)]
pub struct GuildState {
    pub emotions: Emotions,
    pub activity: Activity,
    pub medium_memory: String,
    pub people: HashMap<UserId, Person>,
    pub short_buffer: VecDeque<BufferedMessage>,
    /// Characters in `short_buffer`
    pub short_chars: usize,
    /// Summarization is due on the next tick
    pub summary_due: bool,
}

impl GuildState {
    pub fn push_user(
        &mut self,
        user_id: UserId,
        name: &str,
        content: &str,
        mentions_bot: bool,
        channel_id: ChannelId,
        now: DateTime<Utc>,
    ) {
        self.activity.decay(now);
        self.activity.score = (self.activity.score + 1.0).min(100.0);
        self.activity.last_msg_at = Some(now);
        self.activity.last_channel_id = Some(channel_id);
        self.activity.consecutive_bot_replies = 0;
        self.activity.awaiting_reply = false;
        self.activity.awaiting_reply_since = None;
        self.activity.awaiting_topic = None;

        self.push(BufferedMessage {
            speaker: Speaker::User(user_id),
            author_name: name.to_owned(),
            content: content.to_owned(),
            at: now,
            mentions_bot,
        });
    }

    pub fn push_assistant(&mut self, content: &str, now: DateTime<Utc>) {
        self.activity.consecutive_bot_replies += 1;
        self.activity.last_spoke_at = Some(now);
        self.activity.awaiting_reply = true;
        self.activity.awaiting_reply_since = Some(now);
        self.activity.awaiting_topic = self.activity.last_topic.clone();

        self.push(BufferedMessage {
            speaker: Speaker::Assistant,
            author_name: String::new(),
            content: content.to_owned(),
            at: now,
            mentions_bot: false,
        });
    }

    fn push(&mut self, msg: BufferedMessage) {
        self.short_chars += msg.content.chars().count();
        self.short_buffer.push_back(msg);
        while self.short_buffer.len() > SHORT_BUFFER_LEN {
            if let Some(old) = self.short_buffer.pop_front() {
                self.short_chars = self.short_chars.saturating_sub(old.content.chars().count());
            }
        }
    }

    /// Drop the `n` oldest buffered messages, e.g. once they have been summarized.
    pub fn forget_oldest(&mut self, n: usize) {
        for _ in 0..n.min(self.short_buffer.len()) {
            if let Some(old) = self.short_buffer.pop_front() {
                self.short_chars = self.short_chars.saturating_sub(old.content.chars().count());
            }
        }
    }
}

/// Files under `mind/guilds/{guildID}/`
#[derive(Debug, Clone)]
pub struct GuildFiles {
    dir: PathBuf,
}

impl GuildFiles {
    pub fn new(mind_dir: &Path, guild_id: GuildId) -> Self {
        Self {
            dir: mind_dir.join("guilds").join(guild_id.to_string()),
        }
    }

    pub async fn load(&self) -> Result<GuildState> {
        let medium_memory = match tokio::fs::read_to_string(self.dir.join("medium_memory.md")).await
        {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).context("Could not read medium memory"),
        };

        let mut people = HashMap::new();
        let people_dir = self.dir.join("people");
        if let Ok(mut entries) = tokio::fs::read_dir(&people_dir).await {
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match read_json::<Person>(&path).await {
                    Ok(Some(person)) => {
                        people.insert(person.user_id, person);
                    }
                    Ok(None) => {}
                    Err(e) => crate::log_warn!("Skipping person file: {:#}", e),
                }
            }
        }

        Ok(GuildState {
            emotions: read_json(&self.dir.join("emotions.json"))
                .await?
                .unwrap_or_default(),
            activity: read_json(&self.dir.join("activity.json"))
                .await?
                .unwrap_or_default(),
            medium_memory,
            people,
            ..Default::default()
        })
    }

    /// Persist emotions and activity.
    pub async fn save_mood(&self, state: &GuildState) -> Result<()> {
        write_json(&self.dir.join("emotions.json"), &state.emotions).await?;
        write_json(&self.dir.join("activity.json"), &state.activity).await
    }

    pub async fn save_medium_memory(&self, text: &str) -> Result<()> {
        write_atomic(&self.dir.join("medium_memory.md"), text.as_bytes()).await
    }

    pub async fn save_person(&self, person: &Person) -> Result<()> {
        write_json(
            &self.dir.join("people").join(format!("{}.json", person.user_id)),
            person,
        )
        .await
    }

    pub async fn save_memory<T: serde::Serialize>(&self, at: DateTime<Utc>, entry: &T) -> Result<()> {
        write_json(
            &self
                .dir
                .join("memories")
                .join(format!("{}.json", at.timestamp_millis())),
            entry,
        )
        .await
    }
}
