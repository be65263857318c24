//! Miscellaneous convenience methods

use crate::context::Context;
use anyhow::Result;
use serenity::all::{GuildId, UserId};
use std::collections::HashMap;

#[serenity::async_trait]
pub trait UserHelper {
    /// The name people see for this user in the guild, which is what the mind should call them.
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String;
}

#[serenity::async_trait]
impl UserHelper for serenity::all::User {
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String {
        let nick_in_guild = match guild_id {
            Some(guild_id) => self.nick_in(ctx.cache_http, guild_id).await,
            None => None,
        };

        // No nickname, or not in a guild: fall back to the global display name.
        nick_in_guild.unwrap_or_else(|| self.display_name().to_owned())
    }
}

#[serenity::async_trait]
pub trait MessageHelper {
    async fn human_format_content(&self, ctx: &Context) -> Result<String>;
    async fn is_to_me(&self, ctx: &Context) -> Result<bool>;
}

#[serenity::async_trait]
impl MessageHelper for serenity::all::Message {
    /// Message text with `<@id>`, `<@&id>` and `<#id>` markup swapped for the names people see
    /// in the guild, so the mind reads `@Sam` rather than a snowflake.
    async fn human_format_content(&self, ctx: &Context) -> Result<String> {
        let mut content = self.content.clone();

        // Create a mapping from mention strings to their names
        let mut mention_map: HashMap<String, String> = HashMap::new();

        // Map user mentions (e.g. `<@!1234567890>`)
        for user in &self.mentions {
            let user_id = user.id;
            let mention_with_nickname = format!("<@!{}>", user_id);
            let mention_without_nickname = format!("<@{}>", user_id);

            let name = format!("@{}", user.nick_in_guild(ctx, self.guild_id).await);

            // Map both mention formats to the username
            mention_map.insert(mention_with_nickname, name.clone());
            mention_map.insert(mention_without_nickname, name);
        }

        if let Some(guild) = self.guild(ctx.cache) {
            // Map role mentions (e.g. `<@&1234567890>`)
            for role_id in &self.mention_roles {
                let mention = format!("<@&{}>", role_id);

                if let Some(role) = guild.roles.get(role_id) {
                    mention_map.insert(mention, format!("@{}", role.name));
                } else {
                    mention_map.insert(mention, "@UnknownRole".to_string());
                }
            }

            // Map channel mentions (e.g. `<#1234567890>`)
            for (channel_id, channel) in &guild.channels {
                let mention = format!("<#{}>", channel_id);
                if content.contains(&mention) {
                    mention_map.insert(mention, format!("#{}", channel.name));
                }
            }
        }

        // Replace all mentions with their human-facing names
        for (mention, name) in mention_map {
            content = content.replace(&mention, &name);
        }

        Ok(content)
    }

    async fn is_to_me(&self, ctx: &Context) -> Result<bool> {
        // mentions me, the bot, directly
        let my_id = ctx.cache.current_user().id;
        if self.mentions_user_id(my_id) {
            return Ok(true);
        }

        // Is a reply to a comment the bot made
        if let Some(referenced) = &self.referenced_message {
            return Ok(referenced.author.id == my_id);
        }

        // mentions a role I'm in within the guild
        let message_roles = &self.mention_roles;
        if message_roles.is_empty() {
            return Ok(false);
        }
        let Some(guild) = &self.guild(ctx.cache) else {
            return Ok(false);
        };
        let Some(my_member) = &guild.members.get(&my_id) else {
            return Ok(false);
        };
        let my_roles = &my_member.roles;
        Ok(message_roles.iter().any(|role_id| my_roles.contains(role_id)))
    }
}

/// Replace `@Display Name` text with real `<@id>` mentions.  Longer names are replaced first so
/// `@Sam` does not eat the start of `@Samantha`.
pub fn relink_mentions(content: &str, members: &[(UserId, String)]) -> String {
    let mut members: Vec<&(UserId, String)> =
        members.iter().filter(|(_, name)| !name.is_empty()).collect();
    members.sort_by_key(|(_, name)| std::cmp::Reverse(name.chars().count()));

    let mut out = content.to_owned();
    for (user_id, name) in members {
        out = out.replace(&format!("@{}", name), &format!("<@{}>", user_id));
    }
    out
}

/// Discord's message length limit, in characters
pub const MESSAGE_LIMIT: usize = 2000;

/// Split `text` into chunks of at most `limit` characters, breaking at the last newline that
/// fits (or hard at the limit when a line is longer than that).
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let Some((cut, _)) = rest.char_indices().nth(limit) else {
            chunks.push(rest.to_owned());
            break;
        };
        let head = &rest[..cut];
        let (chunk, tail) = match head.rfind('\n') {
            Some(newline) if newline > 0 => (&rest[..newline], &rest[newline + 1..]),
            _ => (head, &rest[cut..]),
        };
        chunks.push(chunk.trim_end().to_owned());
        rest = tail.trim_start_matches('\n');
    }

    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 2000), vec!["hello"]);
        assert!(split_message("  ", 2000).is_empty());
    }

    #[test]
    fn splits_at_last_newline_that_fits() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(text, 10), vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn long_lines_are_cut_hard() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(15);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[1].chars().count(), 5);
    }

    #[test]
    fn relinks_display_names() {
        let members = vec![
            (UserId::new(1), "Sam".to_owned()),
            (UserId::new(2), "Samantha".to_owned()),
        ];
        assert_eq!(
            relink_mentions("hi @Samantha and @Sam!", &members),
            "hi <@2> and <@1>!"
        );
    }

    #[test]
    fn leaves_unknown_names() {
        let members = vec![(UserId::new(1), "Sam".to_owned())];
        assert_eq!(relink_mentions("hi @Alex", &members), "hi @Alex");
    }
}
