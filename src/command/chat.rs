use crate::{
    context::Context,
    error::BotError,
    mind::speech::{self, SerenityOutbound},
    registry::{Command, Invocation, MessageHandler},
};
use anyhow::Result;
use serenity::all::{Message, ReactionType};

pub struct Chat;

const THROTTLED: &str = "\u{23F3}"; // hourglass
const FAILED_REPLY: &str = "Sorry, something went wrong while I was thinking about that.";

#[serenity::async_trait]
impl Command for Chat {
    fn name(&self) -> &str {
        "chat"
    }

    fn as_message(&self) -> Option<&dyn MessageHandler> {
        Some(self)
    }

    async fn run(&self, _ctx: &Context<'_>, _inv: &Invocation<'_>) -> Result<()> {
        Err(BotError::Protocol("chat has no application command".to_owned()).into())
    }
}

#[serenity::async_trait]
impl MessageHandler for Chat {
    /// Talk back when mentioned.  The dispatcher has already shown the message to the mind.
    async fn message(&self, ctx: &Context<'_>, msg: &Message) -> Result<()> {
        let Some(guild_id) = msg.guild_id else {
            return Ok(());
        };

        // Typing is cosmetic; never fail the reply over it.
        let _ = msg.channel_id.broadcast_typing(ctx.http).await;

        match ctx.mind.chat(guild_id, msg.channel_id).await {
            Ok(Some(reply)) => {
                let outbound = SerenityOutbound::new(ctx.http.clone());
                speech::deliver(&outbound, msg.channel_id, &reply).await?;
            }
            Ok(None) => {
                msg.react(ctx.cache_http, ReactionType::Unicode(THROTTLED.to_owned()))
                    .await?;
            }
            Err(e) => {
                crate::log_warn!("Chat reply failed: {:#}", e);
                msg.reply(ctx.cache_http, FAILED_REPLY).await?;
            }
        }
        Ok(())
    }
}
