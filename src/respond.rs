//! Replying to interactions
//!
//! Slash commands and button presses both answer through an interaction token.  Discord only
//! accepts one initial response per token, so a second reply goes out as a follow-up.

use anyhow::Result;
use serenity::all::{
    CommandInteraction, ComponentInteraction, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, Http,
};

#[serenity::async_trait]
pub trait Respond: Sync {
    async fn respond(&self, http: &Http, message: CreateInteractionResponseMessage) -> Result<()>;
    async fn follow_up(&self, http: &Http, message: CreateInteractionResponseFollowup) -> Result<()>;
    /// Acknowledge now and answer later with `follow_up`, for work that takes over 3 seconds.
    async fn defer(&self, http: &Http, ephemeral: bool) -> Result<()>;

    async fn reply(&self, http: &Http, content: impl Into<String> + Send) -> Result<()> {
        self.respond(http, CreateInteractionResponseMessage::new().content(content))
            .await
    }

    async fn reply_ephemeral(&self, http: &Http, content: impl Into<String> + Send) -> Result<()> {
        self.respond(
            http,
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        )
        .await
    }

    async fn reply_embed(&self, http: &Http, embed: CreateEmbed, ephemeral: bool) -> Result<()> {
        self.respond(
            http,
            CreateInteractionResponseMessage::new()
                .embed(embed)
                .ephemeral(ephemeral),
        )
        .await
    }

    /// Ephemeral reply that works whether or not the interaction was already answered.
    async fn reply_error(&self, http: &Http, content: &str) {
        let first = self
            .respond(
                http,
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            )
            .await;
        if first.is_ok() {
            return;
        }

        let followup = CreateInteractionResponseFollowup::new()
            .content(content)
            .ephemeral(true);
        if let Err(e) = self.follow_up(http, followup).await {
            crate::log_warn!("Could not deliver error reply: {:#}", e);
        }
    }
}

#[serenity::async_trait]
impl Respond for CommandInteraction {
    async fn respond(&self, http: &Http, message: CreateInteractionResponseMessage) -> Result<()> {
        self.create_response(http, CreateInteractionResponse::Message(message))
            .await
            .map_err(Into::into)
    }

    async fn follow_up(&self, http: &Http, message: CreateInteractionResponseFollowup) -> Result<()> {
        self.create_followup(http, message)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    async fn defer(&self, http: &Http, ephemeral: bool) -> Result<()> {
        self.create_response(
            http,
            CreateInteractionResponse::Defer(
                CreateInteractionResponseMessage::new().ephemeral(ephemeral),
            ),
        )
        .await
        .map_err(Into::into)
    }
}

#[serenity::async_trait]
impl Respond for ComponentInteraction {
    async fn respond(&self, http: &Http, message: CreateInteractionResponseMessage) -> Result<()> {
        self.create_response(http, CreateInteractionResponse::Message(message))
            .await
            .map_err(Into::into)
    }

    async fn follow_up(&self, http: &Http, message: CreateInteractionResponseFollowup) -> Result<()> {
        self.create_followup(http, message)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    async fn defer(&self, http: &Http, ephemeral: bool) -> Result<()> {
        self.create_response(
            http,
            CreateInteractionResponse::Defer(
                CreateInteractionResponseMessage::new().ephemeral(ephemeral),
            ),
        )
        .await
        .map_err(Into::into)
    }
}

/// Follow-up with plain text after `defer`
pub async fn follow_up_text(
    interaction: &impl Respond,
    http: &Http,
    content: impl Into<String>,
    ephemeral: bool,
) -> Result<()> {
    interaction
        .follow_up(
            http,
            CreateInteractionResponseFollowup::new()
                .content(content)
                .ephemeral(ephemeral),
        )
        .await
}

/// Update the message a button belongs to, e.g. to disable buttons after a choice.
pub async fn update_component_message(
    interaction: &ComponentInteraction,
    http: &Http,
    message: CreateInteractionResponseMessage,
) -> Result<()> {
    interaction
        .create_response(http, CreateInteractionResponse::UpdateMessage(message))
        .await
        .map_err(Into::into)
}
