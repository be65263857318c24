//! Routes inbound events to commands
//!
//! - Application commands by name
//! - Buttons by custom-ID prefix: `<name>`, `<name>:<payload>`, or `<name>_<payload>`
//! - Reactions to every command with a reaction handler
//! - Messages that mention the bot to every command with a message handler

use crate::{
    context::Context,
    error::BotError,
    helper::{MessageHelper, UserHelper},
    logging::{CommandName, PrintColor},
    registry::{self, Handle, Invocation, Options, Registry},
    respond::Respond,
};
use anyhow::{anyhow, Result};
use serenity::all::{CommandInteraction, CommandType, ComponentInteraction, Message, Reaction};

const GENERIC_ERROR: &str = "Something went wrong while running that command.";

/// Find the command a custom ID belongs to.  Returns the routing key and the payload after the
/// separator (empty when the ID is exactly the key).
///
/// When one key is a prefix of another (`ask` and `ask_admin`), the longest matching key wins.
pub fn route_component<'k, 'c>(
    keys: impl IntoIterator<Item = &'k str>,
    custom_id: &'c str,
) -> Option<(&'k str, &'c str)> {
    keys.into_iter()
        .filter_map(|key| {
            let rest = custom_id.strip_prefix(key)?;
            if rest.is_empty() {
                return Some((key, ""));
            }
            let payload = rest.strip_prefix(':').or_else(|| rest.strip_prefix('_'))?;
            Some((key, payload))
        })
        .max_by_key(|(key, _)| key.len())
}

/// Routing keys for every command with a component handler: its component prefix if declared,
/// else its name.
pub fn component_keys(registry: &Registry) -> Vec<(String, Handle)> {
    registry
        .all()
        .filter(|handle| registry::root(handle).as_component().is_some())
        .map(|handle| {
            let key = registry::definition(handle)
                .and_then(|def| def.component_prefix)
                .unwrap_or_else(|| handle.name().to_owned());
            (key, handle.clone())
        })
        .collect()
}

pub async fn dispatch_command(ctx: &Context<'_>, interaction: &CommandInteraction) {
    let name = interaction.data.name.as_str();
    let result = match ctx.registry.get(name) {
        Some(handle) => run_command(ctx, handle, interaction).await,
        None => Err(BotError::Protocol(format!("unknown command `{}`", name)).into()),
    };

    if let Err(e) = result {
        report_error(name, &e);
        let message = BotError::user_message(&e).unwrap_or_else(|| GENERIC_ERROR.to_owned());
        interaction.reply_error(ctx.http, &message).await;
    }
}

async fn run_command(
    ctx: &Context<'_>,
    handle: &Handle,
    interaction: &CommandInteraction,
) -> Result<()> {
    let data = &interaction.data;
    let inv = match data.kind {
        CommandType::Message => {
            let target = data
                .target_id
                .and_then(|id| data.resolved.messages.get(&id.to_message_id()))
                .ok_or_else(|| anyhow!("message command without a resolved target"))?;
            Invocation::MessageTarget {
                interaction,
                target,
            }
        }
        CommandType::User => {
            let target = data
                .target_id
                .and_then(|id| data.resolved.users.get(&id.to_user_id()))
                .ok_or_else(|| anyhow!("user command without a resolved target"))?;
            Invocation::UserTarget {
                interaction,
                target,
            }
        }
        _ => Invocation::Chat {
            interaction,
            options: Options::from_resolved(&data.options()),
        },
    };

    handle.run(ctx, &inv).await
}

pub async fn dispatch_component(ctx: &Context<'_>, interaction: &ComponentInteraction) {
    let custom_id = interaction.data.custom_id.as_str();
    let keys = component_keys(ctx.registry);
    let routed = route_component(keys.iter().map(|(key, _)| key.as_str()), custom_id);

    let result = match routed {
        Some((key, payload)) => {
            // Keys are unique per command, so this finds the one that matched.
            let handle = keys
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, handle)| handle);
            match handle.and_then(|h| registry::root(h).as_component()) {
                Some(handler) => handler.component(ctx, interaction, payload).await,
                None => Err(BotError::Protocol(custom_id.to_owned()).into()),
            }
        }
        None => Err(BotError::Protocol(custom_id.to_owned()).into()),
    };

    if let Err(e) = result {
        report_error(custom_id, &e);
        let message = BotError::user_message(&e).unwrap_or_else(|| GENERIC_ERROR.to_owned());
        interaction.reply_error(ctx.http, &message).await;
    }
}

pub async fn dispatch_reaction(ctx: &Context<'_>, reaction: &Reaction) {
    // Never react to the bot's own reactions.
    if reaction.user_id == Some(ctx.cache.current_user().id) {
        return;
    }

    for handle in ctx.registry.all() {
        let Some(handler) = registry::root(handle).as_reaction() else {
            continue;
        };
        if let Err(e) = handler.reaction(ctx, reaction).await {
            report_error(handle.name(), &e);
        }
    }
}

pub async fn dispatch_message(ctx: &Context<'_>, msg: &Message) {
    // Ignore all bot messages, including my own
    if msg.author.bot {
        return;
    }

    if let Some(guild_id) = msg.guild_id {
        let author_name = msg.author.nick_in_guild(ctx, Some(guild_id)).await;
        let content = match msg.human_format_content(ctx).await {
            Ok(content) => content,
            Err(e) => {
                crate::log_warn!("Could not format message {}: {:#}", msg.id, e);
                msg.content.clone()
            }
        };
        let mentioned = msg.mentions_user_id(ctx.cache.current_user().id);
        ctx.mind
            .observe(guild_id, msg.channel_id, msg.author.id, &author_name, &content, mentioned)
            .await;
    }

    match msg.is_to_me(ctx).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            crate::log_warn!("Could not tell whether a message was for me: {:#}", e);
            return;
        }
    }

    for handle in ctx.registry.all() {
        let Some(handler) = registry::root(handle).as_message() else {
            continue;
        };
        if let Err(e) = handler.message(ctx, msg).await {
            report_error(handle.name(), &e);
        }
    }
}

fn report_error(name: &str, err: &anyhow::Error) {
    match BotError::user_message(err) {
        // Expected refusals; the user is told why.
        Some(_) => crate::log_event!("{} refused: {:#}", CommandName(name).color(), err),
        None => crate::log_error!("Error in {}: {:#}", CommandName(name).color(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::Dummy;
    use std::sync::Arc;

    #[test]
    fn routes_colon_payload() {
        let keys = ["ask", "complete"];
        assert_eq!(
            route_component(keys, "ask:111:222:DM:accept"),
            Some(("ask", "111:222:DM:accept"))
        );
    }

    #[test]
    fn routes_underscore_payload() {
        let keys = ["ask", "complete"];
        assert_eq!(route_component(keys, "complete_yes"), Some(("complete", "yes")));
    }

    #[test]
    fn exact_name_matches_with_empty_payload() {
        assert_eq!(route_component(["ask"], "ask"), Some(("ask", "")));
    }

    #[test]
    fn prefix_without_separator_does_not_match() {
        let keys = ["ask", "complete"];
        assert_eq!(route_component(keys, "asker:x"), None);
        assert_eq!(route_component(keys, "completed"), None);
        assert_eq!(route_component(keys, ""), None);
    }

    #[test]
    fn longest_key_wins() {
        let keys = ["del", "del_stop", "ask"];
        assert_eq!(route_component(keys, "del_stop:123"), Some(("del_stop", "123")));
        assert_eq!(route_component(keys, "del_now"), Some(("del", "now")));
        // Order of declaration does not matter.
        let keys = ["del_stop", "del"];
        assert_eq!(route_component(keys, "del_stop"), Some(("del_stop", "")));
    }

    #[test]
    fn component_keys_only_for_component_handlers() {
        let mut registry = Registry::new();
        registry.register(Arc::new(Dummy {
            name: "ask",
            slash: true,
            menu: false,
            component: true,
            group: "",
        }));
        registry.register(Dummy::slash("confess"));
        let keys: Vec<_> = component_keys(&registry)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["ask".to_owned()]);
    }
}
