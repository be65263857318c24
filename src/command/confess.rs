use crate::{
    command::{embed, GROUP_SOCIAL},
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    registry::{Command, Invocation, SlashCommand},
    respond::Respond,
    storage::ChannelSlot,
};
use anyhow::Result;
use serenity::all::{CreateMessage, Timestamp};

pub struct Confess;

#[serenity::async_trait]
impl Command for Confess {
    fn name(&self) -> &str {
        "confess"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let message = inv.options().require_str("message")?;
        let channel_id = ctx
            .storage
            .get_channel(guild_id, ChannelSlot::Confessions)
            .await?;

        let card = embed("Anonymous confession", message).timestamp(Timestamp::now());
        channel_id
            .send_message(ctx.cache_http, CreateMessage::new().embed(card))
            .await?;

        inv.interaction()
            .reply_ephemeral(ctx.http, "Your confession was posted anonymously.")
            .await
    }
}

impl SlashCommand for Confess {
    fn definition(&self) -> CommandDef {
        CommandDef::new("confess", "Post a confession anonymously")
            .category(Category::Social)
            .group(GROUP_SOCIAL)
            .option(OptionSpec::string("message", "What you want to confess").required())
    }
}
