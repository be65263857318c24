use crate::{
    command::COLOR,
    context::Context,
    error::BotError,
    registry::{Command, Invocation, ReactionHandler},
    translate::{self, Translator},
};
use anyhow::Result;
use serenity::all::{CreateEmbed, CreateEmbedFooter, CreateMessage, Reaction, ReactionType};

/// DMs a translation to whoever reacts to a message with a country flag
pub struct Translate {
    translator: Translator,
}

impl Translate {
    pub fn new() -> Result<Self> {
        Ok(Self {
            translator: Translator::new()?,
        })
    }
}

#[serenity::async_trait]
impl Command for Translate {
    fn name(&self) -> &str {
        "translate"
    }

    fn as_reaction(&self) -> Option<&dyn ReactionHandler> {
        Some(self)
    }

    async fn run(&self, _ctx: &Context<'_>, _inv: &Invocation<'_>) -> Result<()> {
        Err(BotError::Protocol("translate has no application command".to_owned()).into())
    }
}

#[serenity::async_trait]
impl ReactionHandler for Translate {
    async fn reaction(&self, ctx: &Context<'_>, reaction: &Reaction) -> Result<()> {
        let ReactionType::Unicode(emoji) = &reaction.emoji else {
            return Ok(());
        };
        let Some(language) = translate::flag_language(emoji) else {
            return Ok(());
        };
        let Some(user_id) = reaction.user_id else {
            return Ok(());
        };

        let msg = reaction.message(ctx.cache_http).await?;
        if msg.author.bot || msg.content.trim().is_empty() {
            return Ok(());
        }

        let translation = self.translator.translate(&msg.content, language).await?;
        let from = translation.source.as_deref().unwrap_or("?");
        let embed = CreateEmbed::new()
            .title(format!("Translation ({} → {})", from, language))
            .description(translation.text)
            .url(msg.link())
            .color(COLOR)
            .footer(CreateEmbedFooter::new(format!("Message by {}", msg.author.name)));

        user_id
            .direct_message(ctx.cache_http, CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}
