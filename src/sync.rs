//! Per-guild reconciliation of local command definitions with Discord's catalog
//!
//! Each definition is normalized (options sorted by name, runtime fields dropped) and hashed.
//! Hashes from the last successful sync are cached in `data/commands/{guildID}.json`, so a
//! restart only re-uploads commands that actually changed.

use crate::{
    config::Config,
    definition::{Choice, CommandDef, CommandKind, OptionKind, OptionSpec},
    error::BotError,
    registry::Registry,
    storage::{read_json, write_json, Storage},
};
use anyhow::{anyhow, Result};
use serde::Serialize;
use serenity::all::{CommandId, GuildId, Http};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

/// Pause between catalog writes to stay under Discord's rate limit
pub const SYNC_PACE: Duration = Duration::from_millis(350);

/// A command as Discord knows it
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommand {
    pub id: CommandId,
    pub name: String,
}

/// Discord's per-guild command catalog
#[serenity::async_trait]
pub trait CommandCatalog: Send + Sync {
    async fn list(&self, guild_id: GuildId) -> Result<Vec<RemoteCommand>>;
    /// Create the command, or overwrite the one with the same name.
    async fn upsert(&self, guild_id: GuildId, def: &CommandDef) -> Result<()>;
    async fn delete(&self, guild_id: GuildId, command: &RemoteCommand) -> Result<()>;
}

pub struct SerenityCatalog {
    http: Arc<Http>,
}

impl SerenityCatalog {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[serenity::async_trait]
impl CommandCatalog for SerenityCatalog {
    async fn list(&self, guild_id: GuildId) -> Result<Vec<RemoteCommand>> {
        Ok(guild_id
            .get_commands(&self.http)
            .await?
            .into_iter()
            .map(|c| RemoteCommand {
                id: c.id,
                name: c.name,
            })
            .collect())
    }

    async fn upsert(&self, guild_id: GuildId, def: &CommandDef) -> Result<()> {
        guild_id
            .create_command(&self.http, def.to_create_command())
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Could not register `{}`: {}", def.name, e))
    }

    async fn delete(&self, guild_id: GuildId, command: &RemoteCommand) -> Result<()> {
        guild_id
            .delete_command(&self.http, command.id)
            .await
            .map_err(|e| anyhow!("Could not delete `{}`: {}", command.name, e))
    }
}

/// What a refresh request should reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    All,
    Group(String),
    Command(String),
}

impl FromStr for RefreshTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "" => Err(anyhow!("empty refresh target")),
            "all" => Ok(RefreshTarget::All),
            _ => match s.strip_prefix("group:") {
                Some("") => Err(anyhow!("missing group name")),
                Some(group) => Ok(RefreshTarget::Group(group.to_owned())),
                None => Ok(RefreshTarget::Command(s.to_owned())),
            },
        }
    }
}

impl std::fmt::Display for RefreshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RefreshTarget::All => write!(f, "all"),
            RefreshTarget::Group(group) => write!(f, "group:{}", group),
            RefreshTarget::Command(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct SyncReport {
    pub deleted: Vec<String>,
    pub upserted: Vec<String>,
    pub unchanged: usize,
}

/// Sort options by name at every level and fill in the command type.  Choices keep their
/// declared order since Discord shows them in that order.
pub fn normalize(def: &CommandDef) -> CommandDef {
    fn sort_options(options: &[OptionSpec]) -> Vec<OptionSpec> {
        let mut sorted: Vec<OptionSpec> = options
            .iter()
            .map(|o| OptionSpec {
                options: sort_options(&o.options),
                ..o.clone()
            })
            .collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        sorted
    }

    CommandDef {
        kind: Some(def.kind.unwrap_or(CommandKind::Chat)),
        options: sort_options(&def.options),
        ..def.clone()
    }
}

/// The parts of a definition Discord stores.  Field order is fixed, which makes the JSON
/// canonical.
#[derive(Serialize)]
struct HashView<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(rename = "type")]
    kind: CommandKind,
    options: Vec<OptionView<'a>>,
}

#[derive(Serialize)]
struct OptionView<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(rename = "type")]
    kind: OptionKind,
    required: bool,
    choices: &'a [Choice],
    options: Vec<OptionView<'a>>,
}

impl<'a> OptionView<'a> {
    fn new(option: &'a OptionSpec) -> Self {
        Self {
            name: &option.name,
            description: &option.description,
            kind: option.kind,
            required: option.required,
            choices: &option.choices,
            options: option.options.iter().map(OptionView::new).collect(),
        }
    }
}

/// Hex SHA-256 of the normalized definition
pub fn hash(def: &CommandDef) -> String {
    let normalized = normalize(def);
    let view = HashView {
        name: &normalized.name,
        description: &normalized.description,
        kind: normalized.kind.unwrap_or(CommandKind::Chat),
        options: normalized.options.iter().map(OptionView::new).collect(),
    };
    // Serializing plain structs of strings, bools, and enums cannot fail.
    let json = serde_json::to_vec(&view).unwrap_or_default();

    Sha256::digest(&json)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

type HashCache = BTreeMap<String, String>;

async fn load_cache(path: &Path) -> HashCache {
    match read_json::<HashCache>(path).await {
        Ok(cache) => cache.unwrap_or_default(),
        Err(e) => {
            crate::log_warn!("Ignoring unreadable command cache: {:#}", e);
            HashCache::new()
        }
    }
}

/// Full reconciliation: delete remote commands with no local definition, upsert local
/// commands whose hash changed (or that Discord lacks), then persist the new hashes.
///
/// `force` ignores cached hashes and re-uploads everything.
pub async fn sync_guild(
    catalog: &dyn CommandCatalog,
    guild_id: GuildId,
    local: &[CommandDef],
    cache_path: &Path,
    force: bool,
    pace: Duration,
) -> Result<SyncReport> {
    let remote = catalog.list(guild_id).await?;
    let local_names: BTreeSet<&str> = local.iter().map(|d| d.name.as_str()).collect();
    let remote_names: BTreeSet<&str> = remote.iter().map(|r| r.name.as_str()).collect();
    let mut cache = load_cache(cache_path).await;
    let mut report = SyncReport::default();

    for command in remote.iter().filter(|r| !local_names.contains(r.name.as_str())) {
        catalog.delete(guild_id, command).await?;
        cache.remove(&command.name);
        report.deleted.push(command.name.clone());
        tokio::time::sleep(pace).await;
    }

    // Drop cache entries for commands that no longer exist locally.
    cache.retain(|name, _| local_names.contains(name.as_str()));

    for def in local {
        let digest = hash(def);
        let current = cache.get(&def.name) == Some(&digest);
        if current && !force && remote_names.contains(def.name.as_str()) {
            report.unchanged += 1;
            continue;
        }

        catalog.upsert(guild_id, def).await?;
        cache.insert(def.name.clone(), digest);
        report.upserted.push(def.name.clone());
        tokio::time::sleep(pace).await;
    }

    write_json(cache_path, &cache).await?;
    Ok(report)
}

/// Register (`enabled`) or deregister a subset of commands, keeping the hash cache consistent.
pub async fn sync_subset(
    catalog: &dyn CommandCatalog,
    guild_id: GuildId,
    subset: &[CommandDef],
    enabled: bool,
    cache_path: &Path,
    pace: Duration,
) -> Result<SyncReport> {
    let mut cache = load_cache(cache_path).await;
    let mut report = SyncReport::default();

    if enabled {
        for def in subset {
            catalog.upsert(guild_id, def).await?;
            cache.insert(def.name.clone(), hash(def));
            report.upserted.push(def.name.clone());
            tokio::time::sleep(pace).await;
        }
    } else {
        let names: BTreeSet<&str> = subset.iter().map(|d| d.name.as_str()).collect();
        for command in catalog
            .list(guild_id)
            .await?
            .iter()
            .filter(|r| names.contains(r.name.as_str()))
        {
            catalog.delete(guild_id, command).await?;
            cache.remove(&command.name);
            report.deleted.push(command.name.clone());
            tokio::time::sleep(pace).await;
        }
    }

    write_json(cache_path, &cache).await?;
    Ok(report)
}

/// Remove every command the bot registered in a guild, e.g. when it is blacklisted.
pub async fn delete_all(
    catalog: &dyn CommandCatalog,
    guild_id: GuildId,
    cache_path: &Path,
    pace: Duration,
) -> Result<usize> {
    let remote = catalog.list(guild_id).await?;
    for command in &remote {
        catalog.delete(guild_id, command).await?;
        tokio::time::sleep(pace).await;
    }
    write_json(cache_path, &HashCache::new()).await?;
    Ok(remote.len())
}

/// Reconcile one guild's commands for a refresh target.  Commands in disabled groups are
/// treated as absent; blacklisted guilds lose every command.
pub async fn refresh(
    catalog: &dyn CommandCatalog,
    cfg: &Config,
    storage: &Storage,
    registry: &Registry,
    guild_id: GuildId,
    target: &RefreshTarget,
    force: bool,
) -> Result<SyncReport> {
    let cache_path = cfg.command_cache_path(guild_id);

    if cfg.is_blacklisted(guild_id) {
        let deleted = delete_all(catalog, guild_id, &cache_path, SYNC_PACE).await?;
        crate::log_internal!("Removed {} commands from blacklisted guild {}", deleted, guild_id);
        return Ok(SyncReport::default());
    }

    let disabled = storage.disabled_groups(guild_id).await;
    let definitions = registry.definitions();

    match target {
        RefreshTarget::All => {
            let local: Vec<CommandDef> = definitions
                .into_iter()
                .filter(|d| !disabled.contains(&d.group))
                .collect();
            sync_guild(catalog, guild_id, &local, &cache_path, force, SYNC_PACE).await
        }
        RefreshTarget::Group(group) => {
            let subset: Vec<CommandDef> = definitions
                .into_iter()
                .filter(|d| &d.group == group)
                .collect();
            if subset.is_empty() {
                return Err(BotError::InvalidInput(format!("No command group `{}`.", group)).into());
            }
            let enabled = !disabled.contains(group);
            sync_subset(catalog, guild_id, &subset, enabled, &cache_path, SYNC_PACE).await
        }
        RefreshTarget::Command(name) => {
            let def = definitions
                .into_iter()
                .find(|d| &d.name == name)
                .ok_or_else(|| BotError::InvalidInput(format!("No command `{}`.", name)))?;
            let enabled = !disabled.contains(&def.group);
            sync_subset(catalog, guild_id, &[def], enabled, &cache_path, SYNC_PACE).await
        }
    }
}
