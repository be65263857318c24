use crate::{
    command::{member_names, COLOR, GROUP_SOCIAL},
    context::Context,
    definition::{Category, CommandDef},
    error::BotError,
    helper::relink_mentions,
    registry::{Command, ContextMenuCommand, DiscordMeta, Invocation},
    respond::Respond,
    storage::ChannelSlot,
};
use anyhow::Result;
use serenity::all::{
    CreateAllowedMentions, CreateEmbed, CreateEmbedAuthor, CreateMessage, Message, Permissions,
    UserId,
};

/// Reposts a message into the announcements channel
pub struct Announce;

/// Body of the repost: text with attachment links under it.
fn announcement_text(msg: &Message, members: &[(UserId, String)]) -> String {
    let mut text = relink_mentions(&msg.content, members);
    for attachment in &msg.attachments {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&attachment.url);
    }
    text
}

#[serenity::async_trait]
impl Command for Announce {
    fn name(&self) -> &str {
        "Announce"
    }

    fn as_context_menu(&self) -> Option<&dyn ContextMenuCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let Invocation::MessageTarget { target, .. } = inv else {
            return Err(BotError::Protocol("Announce expects a message".to_owned()).into());
        };
        let guild_id = inv.require_guild()?;
        let channel_id = ctx
            .storage
            .get_channel(guild_id, ChannelSlot::Announcements)
            .await?;

        let text = announcement_text(target, &member_names(ctx.cache, guild_id));
        if text.trim().is_empty() {
            return Err(BotError::InvalidInput("That message has nothing to announce.".to_owned()).into());
        }

        let author = CreateEmbedAuthor::new(&target.author.name)
            .icon_url(target.author.face());
        let card = CreateEmbed::new().author(author).color(COLOR).url(target.link());
        channel_id
            .send_message(
                ctx.cache_http,
                CreateMessage::new()
                    .content(text)
                    .embed(card)
                    .allowed_mentions(CreateAllowedMentions::new().all_users(true)),
            )
            .await?;

        inv.interaction()
            .reply_ephemeral(ctx.http, format!("Announced in <#{}>.", channel_id))
            .await
    }
}

impl ContextMenuCommand for Announce {
    fn definition(&self) -> CommandDef {
        CommandDef::message_menu("Announce")
            .category(Category::Social)
            .group(GROUP_SOCIAL)
    }
}

impl DiscordMeta for Announce {
    fn required_permissions(&self) -> Permissions {
        Permissions::MANAGE_MESSAGES
    }
}
