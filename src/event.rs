//! The Serenity crate we're using for the Discord API is designed around callbacks to handle
//! events.  This does not mesh well with a session that must stay responsive while handlers run.
//! To resolve this, the handler translates each callback into a distinct `Event` and queues it;
//! the session's event pump takes them from there.

use crate::{
    context::{CacheHttp, Services},
    dispatch,
};
use serenity::all::{GuildId, Interaction, Message, Reaction, Ready};

/// A Discord event
pub enum Event {
    Ready(Ready),
    GuildCreate { guild_id: GuildId, is_new: bool },
    Interaction(Interaction),
    Message(Message),
    ReactionAdd(Reaction),
}

/// An event together with the Serenity context it arrived on
pub struct Envelope {
    pub discord_ctx: CacheHttp,
    pub event: Event,
}

impl Event {
    /// Hand the event to the dispatcher.  Lifecycle events are ignored here.
    pub async fn handle(self, services: &Services, discord_ctx: &CacheHttp) {
        let ctx = services.ctx(discord_ctx);
        match self {
            Event::Interaction(Interaction::Command(interaction)) => {
                dispatch::dispatch_command(&ctx, &interaction).await
            }
            Event::Interaction(Interaction::Component(interaction)) => {
                dispatch::dispatch_component(&ctx, &interaction).await
            }
            // Autocomplete and modals are not used.
            Event::Interaction(_) => {}
            Event::Message(msg) => dispatch::dispatch_message(&ctx, &msg).await,
            Event::ReactionAdd(reaction) => dispatch::dispatch_reaction(&ctx, &reaction).await,
            Event::Ready(_) | Event::GuildCreate { .. } => {}
        }
    }
}
