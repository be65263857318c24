//! The bot's agentic side
//!
//! Every guild gets its own [`state::GuildState`]: mood, activity, memory, and what it thinks of
//! people.  Messages feed that state through [`Mind::observe`]; a single scheduler task visits
//! due guilds, lets their state decay, folds long conversations into memory, and speaks up when
//! the [`decision`] says so and the [`limiter::RateLimiter`] allows it.

pub mod core;
pub mod decision;
pub mod evolve;
pub mod limiter;
pub mod person;
pub mod scheduler;
pub mod speech;
pub mod state;
pub mod summarize;

use self::{
    core::Core,
    person::{Person, Tone},
    scheduler::{Scheduler, TICK},
    speech::{Budgets, Outbound, Persona},
    state::{Emotions, GuildFiles, GuildState},
};
use crate::{config::Config, llm::LlmClient};
use anyhow::Result;
use chrono::Utc;
use serenity::all::{ChannelId, GuildId, UserId};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::{
    sync::Mutex,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Minimum time between two worldview evolutions
pub const EVOLVE_EVERY: Duration = Duration::from_secs(6 * 60 * 60);
/// Fallback tick interval when a tick fails
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

pub struct Mind {
    core: Core,
    mind_dir: PathBuf,
    cfg: Config,
    llm: Arc<dyn LlmClient>,
    outbound: Arc<dyn Outbound>,
    limiter: limiter::RateLimiter,
    budgets: Budgets,
    guilds: Mutex<HashMap<GuildId, Arc<Mutex<GuildState>>>>,
    scheduler: StdMutex<Scheduler>,
    last_evolution: StdMutex<Option<Instant>>,
}

impl Mind {
    pub async fn load(
        cfg: &Config,
        llm: Arc<dyn LlmClient>,
        outbound: Arc<dyn Outbound>,
    ) -> Result<Self> {
        let core = Core::load(&cfg.mind_dir().join("core"), cfg.ai.prompt_path.as_deref()).await?;
        Ok(Self::new(core, cfg, llm, outbound))
    }

    pub fn new(
        core: Core,
        cfg: &Config,
        llm: Arc<dyn LlmClient>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            core,
            mind_dir: cfg.mind_dir(),
            cfg: cfg.clone(),
            llm,
            outbound,
            limiter: limiter::RateLimiter::new(),
            budgets: Budgets::default(),
            guilds: Mutex::new(HashMap::new()),
            scheduler: StdMutex::new(Scheduler::new()),
            last_evolution: StdMutex::new(None),
        }
    }

    fn files(&self, guild_id: GuildId) -> GuildFiles {
        GuildFiles::new(&self.mind_dir, guild_id)
    }

    /// The guild's state, loaded from disk on first use
    async fn guild(&self, guild_id: GuildId) -> Result<Arc<Mutex<GuildState>>> {
        let mut guilds = self.guilds.lock().await;
        if let Some(state) = guilds.get(&guild_id) {
            return Ok(state.clone());
        }
        let state = Arc::new(Mutex::new(self.files(guild_id).load().await?));
        guilds.insert(guild_id, state.clone());
        Ok(state)
    }

    async fn persona(&self) -> Persona {
        Persona {
            identity: self.core.identity().to_owned(),
            biology: self.core.biology().clone(),
            worldview: self.core.worldview().await,
        }
    }

    /// `data/{guildID}_chat.prompt.md`, if the server has one
    async fn custom_prompt(&self, guild_id: GuildId) -> Option<String> {
        tokio::fs::read_to_string(self.cfg.chat_prompt_path(guild_id))
            .await
            .ok()
    }

    fn schedule_by(&self, guild_id: GuildId, after: Duration) {
        if let Ok(mut scheduler) = self.scheduler.lock() {
            scheduler.schedule_by(guild_id, Instant::now() + after);
        }
    }

    /// Take in a message someone posted.
    pub async fn observe(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        author_name: &str,
        content: &str,
        mentioned: bool,
    ) {
        if let Err(e) = self
            .try_observe(guild_id, channel_id, author_id, author_name, content, mentioned)
            .await
        {
            crate::log_warn!("Mind could not take in a message in {}: {:#}", guild_id, e);
        }
    }

    async fn try_observe(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        author_name: &str,
        content: &str,
        mentioned: bool,
    ) -> Result<()> {
        let now = Utc::now();
        let state = self.guild(guild_id).await?;
        let mut state = state.lock().await;

        state.emotions.decay(now);
        state.push_user(author_id, author_name, content, mentioned, channel_id, now);

        let tone = person::classify(content);
        let person = state
            .people
            .entry(author_id)
            .or_insert_with(|| Person::new(author_id, author_name));
        person.observe(author_name, tone);
        let person = person.clone();
        person.affect(&mut state.emotions);

        let emotions = &mut state.emotions;
        match tone {
            Tone::Positive => Emotions::bump(&mut emotions.joy, 0.05),
            Tone::Negative => Emotions::bump(&mut emotions.anger, 0.03),
            Tone::Aggressive => Emotions::bump(&mut emotions.anger, 0.08),
            Tone::Neutral => {}
        }
        Emotions::bump(&mut emotions.engagement, if mentioned { 0.1 } else { 0.02 });

        if mentioned {
            state.activity.last_topic = Some(content.chars().take(80).collect());
        }
        if summarize::is_due(&state) {
            state.summary_due = true;
        }

        let files = self.files(guild_id);
        files.save_mood(&state).await?;
        files.save_person(&person).await?;

        let score = state.activity.score;
        drop(state);
        self.schedule_by(guild_id, decision::next_interval(score, rand::random()));
        Ok(())
    }

    /// Answer a message addressed to the bot.  `None` when the LLM budget is spent.  The
    /// message itself must already have been observed.
    pub async fn chat(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Option<String>> {
        let now = Utc::now();
        // Direct chat skips the per-guild cooldown but not the global windows.
        if let Err(denied) = self.limiter.acquire(now, None) {
            crate::log_internal!("Chat in {} throttled ({:?})", guild_id, denied);
            return Ok(None);
        }

        let persona = self.persona().await;
        let custom = self.custom_prompt(guild_id).await;
        let state = self.guild(guild_id).await?;
        let messages = {
            let state = state.lock().await;
            speech::build_messages(&persona, &state, custom.as_deref(), &self.budgets)
        };

        let reply = self.llm.chat(&messages).await?;

        let mut state = state.lock().await;
        let now = Utc::now();
        state.activity.last_llm_call_at = Some(now);
        state.activity.last_channel_id = Some(channel_id);
        state.activity.last_action = Some("chat".to_owned());
        state.push_assistant(&reply, now);
        self.files(guild_id).save_mood(&state).await?;
        Ok(Some(reply))
    }

    /// Visit due guilds until the session ends.
    pub async fn run(self: Arc<Self>, session: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = session.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let due = match self.scheduler.lock() {
                Ok(scheduler) => scheduler.due(Instant::now()),
                Err(_) => None,
            };
            let Some(guild_id) = due else {
                continue;
            };

            let next = tokio::select! {
                biased;
                _ = session.cancelled() => break,
                next = self.tick(guild_id) => next,
            };
            let next = next.unwrap_or_else(|e| {
                crate::log_warn!("Mind tick for {} failed: {:#}", guild_id, e);
                RETRY_INTERVAL
            });
            if let Ok(mut scheduler) = self.scheduler.lock() {
                scheduler.schedule(guild_id, Instant::now() + next);
            }
        }
        crate::log_internal!("Mind scheduler stopped");
    }

    /// One visit to a guild.  Returns the time until the next one.
    pub async fn tick(&self, guild_id: GuildId) -> Result<Duration> {
        let now = Utc::now();
        let state = self.guild(guild_id).await?;

        let summary_due = {
            let mut state = state.lock().await;
            state.emotions.decay(now);
            state.activity.decay(now);
            state.activity.last_tick_at = Some(now);
            self.files(guild_id).save_mood(&state).await?;
            state.summary_due
        };

        if summary_due {
            if let Err(e) = self.summarize(guild_id, &state).await {
                crate::log_warn!("Could not summarize {}: {:#}", guild_id, e);
            }
        }

        let (desire, score, channel_id) = {
            let state = state.lock().await;
            (
                decision::desire_to_speak(&state, now, rand::random()),
                state.activity.score,
                state.activity.last_channel_id,
            )
        };

        if desire >= decision::SPEAK_THRESHOLD {
            if let Some(channel_id) = channel_id {
                self.speak(guild_id, channel_id, &state).await?;
            }
        }

        Ok(decision::next_interval(score, rand::random()))
    }

    /// Speak up unprompted.  Returns whether anything was said.
    async fn speak(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        state: &Mutex<GuildState>,
    ) -> Result<bool> {
        let persona = self.persona().await;
        let custom = self.custom_prompt(guild_id).await;
        let messages = {
            let state = state.lock().await;
            if let Err(denied) = self
                .limiter
                .acquire(Utc::now(), state.activity.last_llm_call_at)
            {
                crate::log_internal!("Staying quiet in {} ({:?})", guild_id, denied);
                return Ok(false);
            }
            speech::build_messages(&persona, &state, custom.as_deref(), &self.budgets)
        };

        let reply = match self.llm.chat(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                crate::log_warn!("Mind could not think of anything in {}: {:#}", guild_id, e);
                return Ok(false);
            }
        };
        state.lock().await.activity.last_llm_call_at = Some(Utc::now());

        speech::deliver(self.outbound.as_ref(), channel_id, &reply).await?;

        let mut state = state.lock().await;
        let now = Utc::now();
        state.push_assistant(&reply, now);
        state.activity.last_action = Some("spoke".to_owned());
        Emotions::bump(&mut state.emotions.fatigue, 0.05);
        self.files(guild_id).save_mood(&state).await?;
        crate::log_internal!("Mind spoke in {}", channel_id);
        Ok(true)
    }

    /// Fold the short-term buffer into medium memory.
    async fn summarize(&self, guild_id: GuildId, state: &Mutex<GuildState>) -> Result<()> {
        if let Err(denied) = self.limiter.acquire(Utc::now(), None) {
            crate::log_internal!("Summary for {} postponed ({:?})", guild_id, denied);
            return Ok(());
        }

        let (messages, summarized) = {
            let state = state.lock().await;
            (summarize::request(&state), state.short_buffer.len())
        };
        let summary = self.llm.chat(&messages).await?;

        let memory = {
            let mut state = state.lock().await;
            let now = Utc::now();
            state.activity.last_llm_call_at = Some(now);
            let entry = summarize::memory_entry(&state, &summary, now);
            state.medium_memory = summary.clone();
            state.forget_oldest(summarized);
            state.summary_due = summarize::is_due(&state);

            let files = self.files(guild_id);
            files.save_medium_memory(&summary).await?;
            files.save_memory(now, &entry).await?;
            files.save_mood(&state).await?;
            state.medium_memory.clone()
        };
        crate::log_internal!("Summarized recent conversation in {}", guild_id);

        if self.evolution_due() {
            if let Err(e) = self.evolve(&memory).await {
                crate::log_warn!("Worldview evolution failed: {:#}", e);
            }
        }
        Ok(())
    }

    fn evolution_due(&self) -> bool {
        match self.last_evolution.lock() {
            Ok(last) => last.map_or(true, |at| at.elapsed() >= EVOLVE_EVERY),
            Err(_) => false,
        }
    }

    async fn evolve(&self, medium_memory: &str) -> Result<()> {
        if self.limiter.acquire(Utc::now(), None).is_err() {
            return Ok(());
        }
        if let Ok(mut last) = self.last_evolution.lock() {
            *last = Some(Instant::now());
        }

        let worldview = self.core.worldview().await;
        let next =
            evolve::evolve(self.llm.as_ref(), self.core.biology(), &worldview, medium_memory)
                .await?;
        self.core.set_worldview(next).await?;
        crate::log_internal!("Worldview evolved");
        Ok(())
    }
}
