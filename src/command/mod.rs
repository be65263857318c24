//! The commands the bot offers
//!
//! Each command is one type implementing [`Command`] plus whichever capability traits it
//! needs.  [`registry`] lists them all; the order there is only for reading.

mod announce;
mod ask;
mod chat;
mod confess;
mod export;
mod groups;
mod help;
mod link;
mod music;
mod purge;
mod refresh;
mod setup;
mod tasks;
mod translate;

use crate::{
    config::Config,
    error::BotError,
    registry::{Command, Options, Registry},
};
use anyhow::Result;
use serenity::all::{Cache, ChannelId, CreateEmbed, GuildId, UserId};
use std::sync::Arc;

/// Command groups a guild can switch off with `/groups`
pub const GROUP_SOCIAL: &str = "social";
pub const GROUP_TASKS: &str = "tasks";
pub const GROUP_MUSIC: &str = "music";
pub const GROUP_PURGE: &str = "purge";
pub const GROUP_LINKS: &str = "links";
pub const GROUPS: [&str; 5] = [GROUP_SOCIAL, GROUP_TASKS, GROUP_MUSIC, GROUP_PURGE, GROUP_LINKS];

/// Embed accent color
pub const COLOR: u32 = 0x5865F2;

/// All commands, wrapped in the middlewares they ask for
pub fn registry(cfg: &Config) -> Result<Registry> {
    let commands: Vec<Arc<dyn Command>> = vec![
        // Core
        Arc::new(help::Help),
        Arc::new(chat::Chat),
        Arc::new(translate::Translate::new()?),
        // Social
        Arc::new(ask::Ask),
        Arc::new(confess::Confess),
        Arc::new(announce::Announce),
        // Tasks
        Arc::new(tasks::Task::new(cfg.tasks_path.clone())),
        Arc::new(tasks::Complete),
        // Music
        Arc::new(music::Music::default()),
        // Utility
        Arc::new(link::Link),
        // Moderation
        Arc::new(purge::DelNow),
        Arc::new(purge::DelAuto),
        Arc::new(purge::DelStop),
        Arc::new(purge::DelJobs),
        // Administration
        Arc::new(setup::SetRoles),
        Arc::new(setup::SetChannels),
        Arc::new(groups::Groups),
        Arc::new(refresh::RefreshCommands),
        Arc::new(export::Export),
    ];

    let mut registry = Registry::new();
    for command in commands {
        registry.register(command);
    }
    Ok(registry)
}

pub fn embed(title: &str, description: impl Into<String>) -> CreateEmbed {
    CreateEmbed::new()
        .title(title)
        .description(description)
        .color(COLOR)
}

/// Destructive commands take a `confirm` option that must be `yes`.
pub fn require_confirm(options: &Options) -> Result<()> {
    match options.str("confirm") {
        Some("yes") => Ok(()),
        _ => Err(BotError::InvalidInput("Set `confirm` to `yes` to go ahead.".to_owned()).into()),
    }
}

/// The voice channel a member is sitting in, from the cache
pub fn voice_channel_of(cache: &Cache, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

/// Display names of the guild's cached members
pub fn member_names(cache: &Cache, guild_id: GuildId) -> Vec<(UserId, String)> {
    let Some(guild) = cache.guild(guild_id) else {
        return Vec::new();
    };
    guild
        .members
        .values()
        .map(|member| (member.user.id, member.display_name().to_owned()))
        .collect()
}
