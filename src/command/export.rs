use crate::{
    context::Context,
    definition::{Category, CommandDef},
    error::BotError,
    registry::{Command, DiscordMeta, Invocation, SlashCommand},
    respond::Respond,
    storage::CommandLogEntry,
};
use anyhow::Result;
use serenity::all::{CreateAttachment, CreateInteractionResponseMessage};
use std::fmt::Write as _;

/// Sends the developer a dump of everything in storage, plus the command history of the server
/// it is run in
pub struct Export;

/// One line per command, oldest first
fn render_command_log(entries: &[CommandLogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "{} {} ({}) in #{}: /{}",
            entry.datetime.format("%Y-%m-%d %H:%M:%S"),
            entry.username,
            entry.user,
            entry.channel_name,
            entry.command_name
        );
    }
    out
}

#[serenity::async_trait]
impl Command for Export {
    fn name(&self) -> &str {
        "export"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        if !ctx.cfg.is_developer(inv.user().id) {
            return Err(BotError::PermissionDenied("Only the developer can export data.".to_owned()).into());
        }

        let dump = serde_json::to_vec_pretty(&ctx.storage.dump().await)?;
        crate::log_internal!("Exporting {} bytes of storage", dump.len());
        let mut message = CreateInteractionResponseMessage::new()
            .add_file(CreateAttachment::bytes(dump, "datastore.json"))
            .ephemeral(true);
        if let Some(guild_id) = inv.guild_id() {
            let log = render_command_log(&ctx.storage.command_log(guild_id).await);
            if !log.is_empty() {
                message = message.add_file(CreateAttachment::bytes(log.into_bytes(), "command-log.txt"));
            }
        }
        inv.interaction().respond(ctx.http, message).await
    }
}

impl SlashCommand for Export {
    fn definition(&self) -> CommandDef {
        CommandDef::new("export", "Download the bot's stored data").category(Category::Admin)
    }
}

impl DiscordMeta for Export {
    fn guild_only(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serenity::all::{ChannelId, UserId};

    fn entry(secs: i64, username: &str, command: &str) -> CommandLogEntry {
        CommandLogEntry {
            datetime: chrono::Utc.timestamp_opt(secs, 0).unwrap(),
            user: UserId::new(7),
            username: username.to_owned(),
            channel: ChannelId::new(3),
            channel_name: "general".to_owned(),
            guild_name: "Test".to_owned(),
            command_name: command.to_owned(),
        }
    }

    #[test]
    fn command_log_reads_oldest_first() {
        let text = render_command_log(&[
            entry(1_700_000_000, "kim", "help"),
            entry(1_700_000_060, "lee", "music"),
        ]);
        assert_eq!(
            text,
            "2023-11-14 22:13:20 kim (7) in #general: /help\n\
             2023-11-14 22:14:20 lee (7) in #general: /music\n"
        );
        assert!(render_command_log(&[]).is_empty());
    }
}
