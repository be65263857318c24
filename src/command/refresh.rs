use crate::{
    command::GROUPS,
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    error::BotError,
    registry::{Command, DiscordMeta, Invocation, Registry, SlashCommand},
    respond::Respond,
    session::SystemEvent,
    sync::RefreshTarget,
};
use anyhow::Result;
use serenity::all::Permissions;

/// Re-syncs the guild's application commands with Discord
pub struct RefreshCommands;

/// Parse a refresh target and check it names something that exists.
fn target(input: &str, registry: &Registry) -> Result<RefreshTarget> {
    let target: RefreshTarget = input
        .parse()
        .map_err(|_| BotError::InvalidInput("Use `all`, `group:<name>` or a command name.".to_owned()))?;
    match &target {
        RefreshTarget::All => {}
        RefreshTarget::Group(group) if GROUPS.contains(&group.as_str()) => {}
        RefreshTarget::Group(group) => {
            return Err(BotError::InvalidInput(format!("Unknown group `{}`.", group)).into())
        }
        RefreshTarget::Command(name) if registry.get(name).is_some() => {}
        RefreshTarget::Command(name) => {
            return Err(BotError::InvalidInput(format!("Unknown command `{}`.", name)).into())
        }
    }
    Ok(target)
}

#[serenity::async_trait]
impl Command for RefreshCommands {
    fn name(&self) -> &str {
        "refresh-commands"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let input = inv.options().str("target").unwrap_or("all");
        let target = target(input, ctx.registry)?;

        let reply = format!("Refreshing `{}`.", target);
        ctx.bus
            .publish(SystemEvent::RefreshCommands { guild_id, target })?;
        inv.interaction().reply_ephemeral(ctx.http, reply).await
    }
}

impl SlashCommand for RefreshCommands {
    fn definition(&self) -> CommandDef {
        CommandDef::new("refresh-commands", "Re-register this server's commands")
            .category(Category::Admin)
            .option(OptionSpec::string(
                "target",
                "all, group:<name> or a command name (default all)",
            ))
    }
}

impl DiscordMeta for RefreshCommands {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}
