use crate::{
    command::GROUPS,
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    error::BotError,
    registry::{Command, DiscordMeta, Invocation, SlashCommand},
    respond::Respond,
    session::SystemEvent,
    sync::RefreshTarget,
};
use anyhow::Result;
use serenity::all::Permissions;

/// Switches a command group on or off for the guild
pub struct Groups;

#[serenity::async_trait]
impl Command for Groups {
    fn name(&self) -> &str {
        "groups"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let options = inv.options();
        let group = options.require_str("group")?;
        if !GROUPS.contains(&group) {
            return Err(BotError::InvalidInput(format!("Unknown group `{}`.", group)).into());
        }
        let enabled = options.bool("enabled").unwrap_or(true);

        let changed = ctx
            .storage
            .set_group_enabled(guild_id, group, enabled)
            .await?;
        let state = if enabled { "enabled" } else { "disabled" };
        if !changed {
            return inv
                .interaction()
                .reply_ephemeral(ctx.http, format!("`{}` is already {}.", group, state))
                .await;
        }

        ctx.bus.publish(SystemEvent::RefreshCommands {
            guild_id,
            target: RefreshTarget::Group(group.to_owned()),
        })?;
        inv.interaction()
            .reply_ephemeral(
                ctx.http,
                format!("`{}` is now {}. Commands will update shortly.", group, state),
            )
            .await
    }
}

impl SlashCommand for Groups {
    fn definition(&self) -> CommandDef {
        let mut group = OptionSpec::string("group", "The command group").required();
        for name in GROUPS {
            group = group.choice(name, name);
        }
        CommandDef::new("groups", "Enable or disable a group of commands")
            .category(Category::Admin)
            .option(group)
            .option(OptionSpec::boolean("enabled", "Whether the group is available").required())
    }
}

impl DiscordMeta for Groups {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}
