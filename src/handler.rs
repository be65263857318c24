use crate::{
    event::{Envelope, Event},
    session::DisconnectSignal,
};
use serenity::all::{
    ConnectionStage, Guild, Interaction, Message, Reaction, Ready, ShardStageUpdateEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Discord event handler.  Queues every event for the session's event pump and never waits on
/// command handlers, so slow commands cannot back-pressure the gateway.
pub struct Handler {
    events: UnboundedSender<Envelope>,
    disconnect: Arc<DisconnectSignal>,
}

impl Handler {
    pub fn new(events: UnboundedSender<Envelope>, disconnect: Arc<DisconnectSignal>) -> Self {
        Self { events, disconnect }
    }

    fn forward(&self, discord_ctx: serenity::all::Context, event: Event) {
        // The pump is gone only while the session is shutting down.
        if self
            .events
            .send(Envelope { discord_ctx, event })
            .is_err()
        {
            crate::log_internal!("Dropping event; session is closing");
        }
    }
}

#[serenity::async_trait]
impl serenity::all::EventHandler for Handler {
    async fn ready(&self, discord_ctx: serenity::all::Context, ready: Ready) {
        self.forward(discord_ctx, Event::Ready(ready));
    }

    async fn guild_create(
        &self,
        discord_ctx: serenity::all::Context,
        guild: Guild,
        is_new: Option<bool>,
    ) {
        self.forward(
            discord_ctx,
            Event::GuildCreate {
                guild_id: guild.id,
                is_new: is_new.unwrap_or(false),
            },
        );
    }

    async fn interaction_create(&self, discord_ctx: serenity::all::Context, interaction: Interaction) {
        self.forward(discord_ctx, Event::Interaction(interaction));
    }

    async fn message(&self, discord_ctx: serenity::all::Context, msg: Message) {
        self.forward(discord_ctx, Event::Message(msg));
    }

    async fn reaction_add(&self, discord_ctx: serenity::all::Context, reaction: Reaction) {
        self.forward(discord_ctx, Event::ReactionAdd(reaction));
    }

    async fn shard_stage_update(
        &self,
        _discord_ctx: serenity::all::Context,
        event: ShardStageUpdateEvent,
    ) {
        if event.new == ConnectionStage::Disconnected {
            self.disconnect.fire("gateway disconnected");
        }
    }
}
