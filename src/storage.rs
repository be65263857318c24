//! Guild-keyed state which persists across sessions
//!
//! Everything lives in memory behind one lock and is written back to a single JSON file after
//! every mutation.  A failed write is logged and returned, but the in-memory change is kept;
//! the next mutation writes the whole snapshot again.

use crate::error::BotError;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId, RoleId, UserId};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    path::{Path, PathBuf},
};
use tokio::sync::RwLock;

/// Most recent command invocations kept per guild
pub const COMMAND_LOG_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleSlot {
    Punisher,
    Victim,
    Assigned,
    Tasker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSlot {
    Confessions,
    Announcements,
    Notifications,
    Tasks,
}

impl RoleSlot {
    pub const ALL: [RoleSlot; 4] = [
        RoleSlot::Punisher,
        RoleSlot::Victim,
        RoleSlot::Assigned,
        RoleSlot::Tasker,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RoleSlot::Punisher => "punisher",
            RoleSlot::Victim => "victim",
            RoleSlot::Assigned => "assigned",
            RoleSlot::Tasker => "tasker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.name() == s)
    }
}

impl ChannelSlot {
    pub const ALL: [ChannelSlot; 4] = [
        ChannelSlot::Confessions,
        ChannelSlot::Announcements,
        ChannelSlot::Notifications,
        ChannelSlot::Tasks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ChannelSlot::Confessions => "confessions",
            ChannelSlot::Announcements => "announcements",
            ChannelSlot::Notifications => "notifications",
            ChannelSlot::Tasks => "tasks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.name() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionMode {
    Delayed,
    Recurring,
}

/// A scheduled purge of one channel.  `delay_until` matters for delayed jobs, `older_than`
/// (a human duration such as `2h`) for recurring ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionJob {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub mode: DeletionMode,
    pub delay_until: DateTime<Utc>,
    #[serde(default)]
    pub older_than: String,
    #[serde(default)]
    pub notify_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortLink {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub clicks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
    Safeword,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTask {
    pub user_id: UserId,
    pub text: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl UserTask {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub datetime: DateTime<Utc>,
    pub user: UserId,
    pub username: String,
    pub channel: ChannelId,
    pub channel_name: String,
    pub guild_name: String,
    pub command_name: String,
}

/// Everything stored about one guild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildRecord {
    #[serde(default)]
    pub roles: BTreeMap<RoleSlot, RoleId>,
    #[serde(default)]
    pub channels: BTreeMap<ChannelSlot, ChannelId>,
    #[serde(default)]
    pub deletion_jobs: BTreeMap<ChannelId, DeletionJob>,
    #[serde(default)]
    pub links: BTreeMap<String, ShortLink>,
    #[serde(default)]
    pub command_log: VecDeque<CommandLogEntry>,
    #[serde(default)]
    pub user_tasks: BTreeMap<UserId, UserTask>,
    #[serde(default)]
    pub disabled_groups: BTreeSet<String>,
}

pub struct Storage {
    path: PathBuf,
    guilds: RwLock<HashMap<GuildId, GuildRecord>>,
}

impl Storage {
    /// Load the datastore, starting empty if the file does not exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let guilds = read_json::<HashMap<GuildId, GuildRecord>>(&path)
            .await?
            .unwrap_or_default();

        crate::log_internal!(
            "Loaded datastore `{}` with {} guild(s)",
            path.display(),
            guilds.len()
        );

        Ok(Self {
            path,
            guilds: RwLock::new(guilds),
        })
    }

    async fn read<T>(&self, guild_id: GuildId, f: impl FnOnce(&GuildRecord) -> T) -> T {
        let guilds = self.guilds.read().await;
        match guilds.get(&guild_id) {
            Some(record) => f(record),
            None => f(&GuildRecord::default()),
        }
    }

    /// Apply `f` to the guild's record (created on first use) and write the snapshot to disk.
    async fn mutate<T>(&self, guild_id: GuildId, f: impl FnOnce(&mut GuildRecord) -> T) -> Result<T> {
        let mut guilds = self.guilds.write().await;
        let out = f(guilds.entry(guild_id).or_default());

        let snapshot = serde_json::to_string_pretty(&*guilds)
            .map_err(|e| anyhow!("Could not serialize datastore: {}", e))?;
        if let Err(e) = write_atomic(&self.path, snapshot.as_bytes()).await {
            crate::log_error!("Datastore change kept in memory only: {:#}", e);
            return Err(e);
        }

        Ok(out)
    }

    pub async fn get_role(&self, guild_id: GuildId, slot: RoleSlot) -> Result<RoleId> {
        self.read(guild_id, |g| g.roles.get(&slot).copied())
            .await
            .ok_or_else(|| {
                BotError::NotConfigured(format!("The `{}` role", slot.name()), "set-roles").into()
            })
    }

    pub async fn set_role(&self, guild_id: GuildId, slot: RoleSlot, role_id: RoleId) -> Result<()> {
        self.mutate(guild_id, |g| {
            g.roles.insert(slot, role_id);
        })
        .await
    }

    pub async fn get_channel(&self, guild_id: GuildId, slot: ChannelSlot) -> Result<ChannelId> {
        self.read(guild_id, |g| g.channels.get(&slot).copied())
            .await
            .ok_or_else(|| {
                BotError::NotConfigured(format!("The `{}` channel", slot.name()), "set-channels")
                    .into()
            })
    }

    pub async fn set_channel(
        &self,
        guild_id: GuildId,
        slot: ChannelSlot,
        channel_id: ChannelId,
    ) -> Result<()> {
        self.mutate(guild_id, |g| {
            g.channels.insert(slot, channel_id);
        })
        .await
    }

    /// Record a deletion job, replacing any previous job for the same channel.
    pub async fn set_deletion_job(&self, job: DeletionJob) -> Result<()> {
        self.mutate(job.guild_id, |g| {
            g.deletion_jobs.insert(job.channel_id, job);
        })
        .await
    }

    pub async fn get_deletion_job(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Option<DeletionJob> {
        self.read(guild_id, |g| g.deletion_jobs.get(&channel_id).cloned())
            .await
    }

    pub async fn clear_deletion_job(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        self.mutate(guild_id, |g| {
            g.deletion_jobs.remove(&channel_id);
        })
        .await
    }

    pub async fn deletion_jobs(&self, guild_id: GuildId) -> Vec<DeletionJob> {
        self.read(guild_id, |g| g.deletion_jobs.values().cloned().collect())
            .await
    }

    /// Every persisted deletion job across all guilds.  Used for restart recovery.
    pub async fn all_deletion_jobs(&self) -> Vec<DeletionJob> {
        self.guilds
            .read()
            .await
            .values()
            .flat_map(|g| g.deletion_jobs.values().cloned())
            .collect()
    }

    pub async fn add_link(&self, guild_id: GuildId, link: ShortLink) -> Result<()> {
        self.mutate(guild_id, |g| {
            g.links.insert(link.id.clone(), link);
        })
        .await
    }

    /// Short IDs are unique across guilds, so this scans them all.
    pub async fn find_link(&self, id: &str) -> Option<(GuildId, ShortLink)> {
        self.guilds
            .read()
            .await
            .iter()
            .find_map(|(guild_id, g)| g.links.get(id).map(|link| (*guild_id, link.clone())))
    }

    /// Returns the new click count, or `None` if the link no longer exists.
    pub async fn increment_clicks(&self, guild_id: GuildId, id: &str) -> Result<Option<u64>> {
        self.mutate(guild_id, |g| {
            g.links.get_mut(id).map(|link| {
                link.clicks += 1;
                link.clicks
            })
        })
        .await
    }

    pub async fn links(&self, guild_id: GuildId) -> Vec<ShortLink> {
        self.read(guild_id, |g| g.links.values().cloned().collect())
            .await
    }

    pub async fn log_command(&self, guild_id: GuildId, entry: CommandLogEntry) -> Result<()> {
        self.mutate(guild_id, |g| {
            g.command_log.push_back(entry);
            while g.command_log.len() > COMMAND_LOG_LIMIT {
                g.command_log.pop_front();
            }
        })
        .await
    }

    pub async fn command_log(&self, guild_id: GuildId) -> Vec<CommandLogEntry> {
        self.read(guild_id, |g| g.command_log.iter().cloned().collect())
            .await
    }

    pub async fn get_user_task(&self, guild_id: GuildId, user_id: UserId) -> Option<UserTask> {
        self.read(guild_id, |g| g.user_tasks.get(&user_id).cloned())
            .await
    }

    /// Store a task for its user.  Each user holds at most one task per guild, so this replaces
    /// whatever was there.
    pub async fn set_user_task(&self, guild_id: GuildId, task: UserTask) -> Result<()> {
        self.mutate(guild_id, |g| {
            g.user_tasks.insert(task.user_id, task);
        })
        .await
    }

    pub async fn clear_user_task(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<UserTask>> {
        self.mutate(guild_id, |g| g.user_tasks.remove(&user_id)).await
    }

    pub async fn disabled_groups(&self, guild_id: GuildId) -> BTreeSet<String> {
        self.read(guild_id, |g| g.disabled_groups.clone()).await
    }

    pub async fn is_group_disabled(&self, guild_id: GuildId, group: &str) -> bool {
        self.read(guild_id, |g| g.disabled_groups.contains(group))
            .await
    }

    /// Returns whether anything changed.
    pub async fn set_group_enabled(&self, guild_id: GuildId, group: &str, enabled: bool) -> Result<bool> {
        self.mutate(guild_id, |g| {
            if enabled {
                g.disabled_groups.remove(group)
            } else {
                g.disabled_groups.insert(group.to_owned())
            }
        })
        .await
    }

    /// Full copy of the stored state, for administrative export.
    pub async fn dump(&self) -> BTreeMap<GuildId, GuildRecord> {
        self.guilds
            .read()
            .await
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }
}

/// Read and parse a JSON file.  `Ok(None)` if it does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(anyhow!(
                "Could not read `{}`: {}",
                path.to_string_lossy(),
                e
            ))
        }
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| anyhow!("Could not parse `{}`: {}", path.to_string_lossy(), e))
}

/// Serialize `value` as indented JSON and atomically replace `path` with it.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow!("Could not serialize `{}`: {}", path.to_string_lossy(), e))?;
    write_atomic(path, data.as_bytes()).await
}

/// Write to a temporary file next to `path`, then rename it over `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            anyhow!(
                "Could not create directory `{}`: {}",
                parent.to_string_lossy(),
                e
            )
        })?;
    }

    // Create a temporary file in the same directory.
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(|e| {
        anyhow!(
            "Could not write temporary file `{}`: {}",
            tmp_path.to_string_lossy(),
            e
        )
    })?;

    // Atomically rename the temporary file over the target file.
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        anyhow!(
            "Could not rename temporary file `{}` to `{}`: {}",
            tmp_path.to_string_lossy(),
            path.to_string_lossy(),
            e
        )
    })?;

    Ok(())
}
