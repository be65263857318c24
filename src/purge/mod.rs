//! Delayed and recurring channel purges
//!
//! Per channel: `idle → waiting (delayed) → deleting → idle`, or `idle → recurring → idle` on
//! stop.  A channel is in the active table from the moment a job is scheduled until it finishes
//! or is stopped, which keeps it to one job at a time.

pub mod duration;
pub mod sweep;

use crate::{
    error::BotError,
    storage::{DeletionJob, DeletionMode, Storage},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, GuildId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use sweep::{Bounds, ChannelMessages};
use tokio_util::sync::CancellationToken;

/// Zero delays are bumped to this so the notice is visible before messages disappear.
pub const MIN_DELAY: Duration = Duration::from_secs(5);
pub const RECURRING_TICK: Duration = Duration::from_secs(30);

struct ActiveJob {
    generation: u64,
    stop: CancellationToken,
}

pub struct PurgeEngine {
    storage: Arc<Storage>,
    messages: Arc<dyn ChannelMessages>,
    active: Mutex<HashMap<ChannelId, ActiveJob>>,
    generation: AtomicU64,
}

impl PurgeEngine {
    pub fn new(storage: Arc<Storage>, messages: Arc<dyn ChannelMessages>) -> Self {
        Self {
            storage,
            messages,
            active: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, ActiveJob>> {
        // A poisoned table is still a consistent table; every critical section is a single
        // insert or remove.
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim a channel, or fail if a job already runs there.
    fn claim(&self, channel_id: ChannelId) -> Result<(u64, CancellationToken)> {
        let mut active = self.active();
        if active.contains_key(&channel_id) {
            return Err(BotError::InvalidInput(
                "A deletion job is already running in this channel. Use `/del-stop` first."
                    .to_owned(),
            )
            .into());
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let stop = CancellationToken::new();
        active.insert(
            channel_id,
            ActiveJob {
                generation,
                stop: stop.clone(),
            },
        );
        Ok((generation, stop))
    }

    /// Leave the active table, unless the slot was since taken by another job.
    fn release(&self, channel_id: ChannelId, generation: u64) -> bool {
        let mut active = self.active();
        match active.get(&channel_id) {
            Some(job) if job.generation == generation => {
                active.remove(&channel_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, channel_id: ChannelId) -> bool {
        self.active().contains_key(&channel_id)
    }

    /// Purge the channel once `delay` has passed.
    pub async fn schedule_delayed(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
        delay: Duration,
        notify_all: bool,
    ) -> Result<DeletionJob> {
        let delay = delay.max(MIN_DELAY);
        let (generation, stop) = self.claim(channel_id)?;

        let job = DeletionJob {
            guild_id,
            channel_id,
            mode: DeletionMode::Delayed,
            delay_until: Utc::now() + chrono::Duration::from_std(delay)?,
            older_than: String::new(),
            notify_all,
        };
        if let Err(e) = self.storage.set_deletion_job(job.clone()).await {
            // Runs anyway; it just will not survive a restart.
            crate::log_error!("Could not persist deletion job: {:#}", e);
        }

        tokio::spawn(self.clone().run_delayed(job.clone(), delay, generation, stop));
        Ok(job)
    }

    /// Every `RECURRING_TICK`, purge messages older than `older_than`.
    pub async fn start_recurring(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
        older_than: &str,
        notify_all: bool,
    ) -> Result<DeletionJob> {
        let age = duration::parse(older_than)?;
        let (generation, stop) = self.claim(channel_id)?;

        let job = DeletionJob {
            guild_id,
            channel_id,
            mode: DeletionMode::Recurring,
            delay_until: Utc::now(),
            older_than: older_than.trim().to_owned(),
            notify_all,
        };
        if let Err(e) = self.storage.set_deletion_job(job.clone()).await {
            crate::log_error!("Could not persist deletion job: {:#}", e);
        }

        tokio::spawn(self.clone().run_recurring(job.clone(), age, generation, stop));
        Ok(job)
    }

    /// Stop the channel's job, whatever state it is in.  Returns whether there was one.
    pub async fn stop(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<bool> {
        let removed = self.active().remove(&channel_id);
        let persisted = self.storage.get_deletion_job(guild_id, channel_id).await;

        if let Some(job) = &removed {
            job.stop.cancel();
        }
        if persisted.is_some() {
            self.storage.clear_deletion_job(guild_id, channel_id).await?;
        }
        Ok(removed.is_some() || persisted.is_some())
    }

    /// Jobs of a guild that are actually running
    pub async fn jobs(&self, guild_id: GuildId) -> Vec<DeletionJob> {
        let mut jobs: Vec<DeletionJob> = self
            .storage
            .deletion_jobs(guild_id)
            .await
            .into_iter()
            .filter(|job| self.is_active(job.channel_id))
            .collect();
        jobs.sort_by_key(|job| job.channel_id);
        jobs
    }

    /// Resume persisted jobs after a restart.  Overdue delayed jobs run immediately.  Every
    /// recovered channel is in the active table when this returns.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let mut recovered = 0;
        for job in self.storage.all_deletion_jobs().await {
            let (generation, stop) = match self.claim(job.channel_id) {
                Ok(claimed) => claimed,
                Err(_) => continue,
            };

            match job.mode {
                DeletionMode::Delayed => {
                    let wait = (job.delay_until - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::spawn(self.clone().run_delayed(job, wait, generation, stop));
                }
                DeletionMode::Recurring => match duration::parse(&job.older_than) {
                    Ok(age) => {
                        tokio::spawn(self.clone().run_recurring(job, age, generation, stop));
                    }
                    Err(e) => {
                        crate::log_error!(
                            "Dropping recurring job in {} with bad age `{}`: {:#}",
                            job.channel_id,
                            job.older_than,
                            e
                        );
                        self.release(job.channel_id, generation);
                        self.storage
                            .clear_deletion_job(job.guild_id, job.channel_id)
                            .await?;
                        continue;
                    }
                },
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn run_delayed(
        self: Arc<Self>,
        job: DeletionJob,
        wait: Duration,
        generation: u64,
        stop: CancellationToken,
    ) {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        crate::log_internal!("Purging {}... ", job.channel_id);
        let deleted =
            sweep::sweep(self.messages.as_ref(), job.channel_id, Bounds::until(Utc::now()), &stop)
                .await;
        crate::log_internal!("Purging {}... done, {} deleted", job.channel_id, deleted);

        // A stop already cleaned up, and the channel may hold a new job by now.
        if stop.is_cancelled() {
            return;
        }
        if self.release(job.channel_id, generation) {
            if let Err(e) = self
                .storage
                .clear_deletion_job(job.guild_id, job.channel_id)
                .await
            {
                crate::log_error!("Could not clear finished deletion job: {:#}", e);
            }
        }
    }

    /// Runs until stopped, or until its persisted job disappears from storage.
    async fn run_recurring(
        self: Arc<Self>,
        job: DeletionJob,
        age: Duration,
        generation: u64,
        stop: CancellationToken,
    ) {
        // Anything beyond a century is as good as forever.
        let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + RECURRING_TICK,
            RECURRING_TICK,
        );

        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.storage.get_deletion_job(job.guild_id, job.channel_id).await.is_none() {
                crate::log_internal!("Recurring purge of {} has no job left, stopping", job.channel_id);
                self.release(job.channel_id, generation);
                return;
            }

            let cutoff = Utc::now() - age;
            let deleted =
                sweep::sweep(self.messages.as_ref(), job.channel_id, Bounds::until(cutoff), &stop)
                    .await;
            if deleted > 0 {
                crate::log_internal!(
                    "Recurring purge removed {} messages from {}",
                    deleted,
                    job.channel_id
                );
            }
        }
    }
}

/// Table of jobs for `/del-jobs`
pub fn render(jobs: &[DeletionJob], now: DateTime<Utc>) -> String {
    if jobs.is_empty() {
        return "No deletion jobs are running.".to_owned();
    }

    jobs.iter()
        .map(|job| match job.mode {
            DeletionMode::Delayed => {
                let status = match (job.delay_until - now).to_std() {
                    Ok(left) if !left.is_zero() => format!("in {}", duration::format(left)),
                    _ => "overdue".to_owned(),
                };
                format!("<#{}> delayed purge, {}", job.channel_id, status)
            }
            DeletionMode::Recurring => format!(
                "<#{}> recurring purge of messages older than {}, every {}",
                job.channel_id,
                job.older_than,
                duration::format(RECURRING_TICK)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep::tests::FakeChannel;

    const GUILD: GuildId = GuildId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(5);

    async fn engine(
        dir: &tempfile::TempDir,
        channel: FakeChannel,
    ) -> (Arc<PurgeEngine>, Arc<Storage>, Arc<FakeChannel>) {
        let storage = Arc::new(
            Storage::load(dir.path().join("datastore.json"))
                .await
                .unwrap(),
        );
        let channel = Arc::new(channel);
        let engine = Arc::new(PurgeEngine::new(storage.clone(), channel.clone()));
        (engine, storage, channel)
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_purge_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, storage, channel) =
            engine(&dir, FakeChannel::with_history(4, chrono::Duration::minutes(1))).await;

        let before = Utc::now();
        let job = engine
            .schedule_delayed(GUILD, CHANNEL, Duration::from_secs(10), true)
            .await
            .unwrap();
        let persisted = storage.get_deletion_job(GUILD, CHANNEL).await.unwrap();
        assert_eq!(persisted, job);
        assert_eq!(persisted.mode, DeletionMode::Delayed);
        assert!(persisted.notify_all);
        let until = (persisted.delay_until - before).num_seconds();
        assert!((9..=11).contains(&until));
        assert!(engine.is_active(CHANNEL));

        // Nothing happens early.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(channel.deleted_ids().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(channel.deleted_ids(), vec![4, 3, 2, 1]);
        let times = channel.deleted.lock().unwrap().clone();
        for pair in times.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(250));
        }
        assert!(!engine.is_active(CHANNEL));
        assert!(storage.get_deletion_job(GUILD, CHANNEL).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _storage, channel) =
            engine(&dir, FakeChannel::with_history(1, chrono::Duration::minutes(1))).await;
        engine
            .schedule_delayed(GUILD, CHANNEL, Duration::ZERO, false)
            .await
            .unwrap();
        tokio::time::sleep(MIN_DELAY / 2).await;
        assert!(channel.deleted_ids().is_empty());
        tokio::time::sleep(MIN_DELAY).await;
        assert_eq!(channel.deleted_ids(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_job_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _storage, _channel) = engine(&dir, FakeChannel::default()).await;
        engine
            .start_recurring(GUILD, CHANNEL, "2h", false)
            .await
            .unwrap();
        assert!(engine
            .schedule_delayed(GUILD, CHANNEL, Duration::from_secs(60), false)
            .await
            .is_err());
        assert!(engine
            .start_recurring(GUILD, CHANNEL, "1h", false)
            .await
            .is_err());
        assert_eq!(engine.jobs(GUILD).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, storage, channel) =
            engine(&dir, FakeChannel::with_history(3, chrono::Duration::minutes(1))).await;
        engine
            .schedule_delayed(GUILD, CHANNEL, Duration::from_secs(60), false)
            .await
            .unwrap();

        assert!(engine.stop(GUILD, CHANNEL).await.unwrap());
        assert!(!engine.is_active(CHANNEL));
        assert!(storage.get_deletion_job(GUILD, CHANNEL).await.is_none());
        assert!(engine.jobs(GUILD).await.is_empty());

        // The stopped job never fires.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(channel.deleted_ids().is_empty());
        assert!(!engine.stop(GUILD, CHANNEL).await.unwrap());

        // The channel is free again.
        engine
            .start_recurring(GUILD, CHANNEL, "1h", false)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_recovery_deletes_only_old_messages() {
        let dir = tempfile::tempdir().unwrap();
        // Messages 1..=180, one minute apart, the newest just now: 1..=59 are over two hours old.
        let (engine, storage, channel) =
            engine(&dir, FakeChannel::with_history(180, chrono::Duration::zero())).await;
        storage
            .set_deletion_job(DeletionJob {
                guild_id: GUILD,
                channel_id: CHANNEL,
                mode: DeletionMode::Recurring,
                delay_until: Utc::now(),
                older_than: "2h".to_owned(),
                notify_all: false,
            })
            .await
            .unwrap();

        assert_eq!(engine.recover().await.unwrap(), 1);
        assert!(engine.is_active(CHANNEL));

        tokio::time::sleep(RECURRING_TICK + Duration::from_secs(25)).await;
        let deleted = channel.deleted_ids();
        assert!(!deleted.is_empty());
        // Ages are computed from the wall clock, so allow the boundary message to go either way.
        assert!(deleted.iter().all(|id| *id <= 61), "{:?}", deleted);
        assert!(channel
            .messages
            .lock()
            .unwrap()
            .iter()
            .all(|m| m.id.get() > 58));

        // Still running, still persisted.
        assert!(engine.is_active(CHANNEL));
        assert!(storage.get_deletion_job(GUILD, CHANNEL).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_job_ends_once_its_record_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, storage, channel) =
            engine(&dir, FakeChannel::with_history(3, chrono::Duration::hours(5))).await;
        engine
            .start_recurring(GUILD, CHANNEL, "1h", false)
            .await
            .unwrap();
        storage.clear_deletion_job(GUILD, CHANNEL).await.unwrap();

        tokio::time::sleep(RECURRING_TICK + Duration::from_secs(1)).await;
        assert!(!engine.is_active(CHANNEL));
        assert!(channel.deleted_ids().is_empty());
        assert!(engine.jobs(GUILD).await.is_empty());

        // The slot is free for the next job.
        engine
            .schedule_delayed(GUILD, CHANNEL, Duration::from_secs(60), false)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_delayed_job_runs_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, storage, channel) =
            engine(&dir, FakeChannel::with_history(2, chrono::Duration::minutes(5))).await;
        storage
            .set_deletion_job(DeletionJob {
                guild_id: GUILD,
                channel_id: CHANNEL,
                mode: DeletionMode::Delayed,
                delay_until: Utc::now() - chrono::Duration::hours(1),
                older_than: String::new(),
                notify_all: false,
            })
            .await
            .unwrap();

        engine.recover().await.unwrap();
        assert!(engine.is_active(CHANNEL));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(channel.deleted_ids(), vec![2, 1]);
        assert!(!engine.is_active(CHANNEL));
        assert!(storage.get_deletion_job(GUILD, CHANNEL).await.is_none());
    }

    #[test]
    fn render_lists_eta_and_period() {
        let now = Utc::now();
        let jobs = vec![
            DeletionJob {
                guild_id: GUILD,
                channel_id: ChannelId::new(1),
                mode: DeletionMode::Delayed,
                delay_until: now + chrono::Duration::minutes(10),
                older_than: String::new(),
                notify_all: false,
            },
            DeletionJob {
                guild_id: GUILD,
                channel_id: ChannelId::new(2),
                mode: DeletionMode::Delayed,
                delay_until: now - chrono::Duration::minutes(1),
                older_than: String::new(),
                notify_all: false,
            },
            DeletionJob {
                guild_id: GUILD,
                channel_id: ChannelId::new(3),
                mode: DeletionMode::Recurring,
                delay_until: now,
                older_than: "2h".to_owned(),
                notify_all: false,
            },
        ];
        let table = render(&jobs, now);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines[0], "<#1> delayed purge, in 10m");
        assert_eq!(lines[1], "<#2> delayed purge, overdue");
        assert!(lines[2].contains("older than 2h, every 30s"));
        assert_eq!(render(&[], now), "No deletion jobs are running.");
    }
}
