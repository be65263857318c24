use crate::{
    command::{embed, GROUP_LINKS},
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    registry::{Command, Invocation, SlashCommand},
    respond::Respond,
    shortlink,
};
use anyhow::Result;

/// Shortens a URL through the bot's redirect server
pub struct Link;

#[serenity::async_trait]
impl Command for Link {
    fn name(&self) -> &str {
        "link"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let url = inv.options().require_str("url")?;
        let link = shortlink::create(ctx.storage, guild_id, url).await?;

        let short = format!("{}/{}", ctx.cfg.shortlink_base_url, link.id);
        inv.interaction()
            .reply_embed(
                ctx.http,
                embed("Short link", format!("{}\n→ {}", short, link.url)),
                false,
            )
            .await
    }
}

impl SlashCommand for Link {
    fn definition(&self) -> CommandDef {
        CommandDef::new("link", "Make a short link")
            .category(Category::Utility)
            .group(GROUP_LINKS)
            .option(OptionSpec::string("url", "The http(s) link to shorten").required())
    }
}
