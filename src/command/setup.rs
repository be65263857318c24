use crate::{
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    error::BotError,
    registry::{Command, DiscordMeta, Invocation, SlashCommand},
    respond::Respond,
    storage::{ChannelSlot, RoleSlot},
};
use anyhow::Result;
use serenity::all::Permissions;

/// Assigns the roles the bot hands out
pub struct SetRoles;

/// Assigns the channels the bot posts to
pub struct SetChannels;

fn unknown_slot(kind: &str) -> anyhow::Error {
    BotError::InvalidInput(format!("Unknown type `{}`.", kind)).into()
}

#[serenity::async_trait]
impl Command for SetRoles {
    fn name(&self) -> &str {
        "set-roles"
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
        let kind = options.require_str("type")?;
        let slot = RoleSlot::parse(kind).ok_or_else(|| unknown_slot(kind))?;
        let role_id = options
            .role("role")
            .ok_or_else(|| BotError::InvalidInput("Pick a role.".to_owned()))?;

        ctx.storage.set_role(guild_id, slot, role_id).await?;
        inv.interaction()
            .reply_ephemeral(
                ctx.http,
                format!("The {} role is now <@&{}>.", slot.name(), role_id),
            )
            .await
    }
}

impl SlashCommand for SetRoles {
    fn definition(&self) -> CommandDef {
        let mut kind = OptionSpec::string("type", "Which role to set").required();
        for slot in RoleSlot::ALL {
            kind = kind.choice(slot.name(), slot.name());
        }
        CommandDef::new("set-roles", "Choose the roles the bot hands out")
            .category(Category::Admin)
            .option(kind)
            .option(OptionSpec::role("role", "The role to use").required())
    }
}

impl DiscordMeta for SetRoles {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}

#[serenity::async_trait]
impl Command for SetChannels {
    fn name(&self) -> &str {
        "set-channels"
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
        let kind = options.require_str("type")?;
        let slot = ChannelSlot::parse(kind).ok_or_else(|| unknown_slot(kind))?;
        let channel_id = options
            .channel("channel")
            .ok_or_else(|| BotError::InvalidInput("Pick a channel.".to_owned()))?;

        ctx.storage.set_channel(guild_id, slot, channel_id).await?;
        inv.interaction()
            .reply_ephemeral(
                ctx.http,
                format!("The {} channel is now <#{}>.", slot.name(), channel_id),
            )
            .await
    }
}

impl SlashCommand for SetChannels {
    fn definition(&self) -> CommandDef {
        let mut kind = OptionSpec::string("type", "Which channel to set").required();
        for slot in ChannelSlot::ALL {
            kind = kind.choice(slot.name(), slot.name());
        }
        CommandDef::new("set-channels", "Choose the channels the bot posts to")
            .category(Category::Admin)
            .option(kind)
            .option(OptionSpec::channel("channel", "The channel to use").required())
    }
}

impl DiscordMeta for SetChannels {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ChoiceValue;

    #[test]
    fn every_choice_is_a_known_slot() {
        let roles = SetRoles.definition();
        assert_eq!(roles.options[0].choices.len(), RoleSlot::ALL.len());
        for choice in &roles.options[0].choices {
            let ChoiceValue::String(value) = &choice.value else {
                panic!("slot choices are strings");
            };
            assert!(RoleSlot::parse(value).is_some());
        }

        let channels = SetChannels.definition();
        for choice in &channels.options[0].choices {
            let ChoiceValue::String(value) = &choice.value else {
                panic!("slot choices are strings");
            };
            assert!(ChannelSlot::parse(value).is_some());
        }
    }
}
