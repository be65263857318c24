use crate::{
    command::embed,
    context::Context,
    definition::{Category, CommandDef},
    readme,
    registry::{Command, DiscordMeta, Invocation, SlashCommand},
    respond::Respond,
};
use anyhow::Result;
use std::collections::BTreeSet;

pub struct Help;

/// Help text for the commands a guild has enabled
fn render(defs: &[CommandDef], disabled: &BTreeSet<String>) -> String {
    let enabled: Vec<CommandDef> = defs
        .iter()
        .filter(|def| !disabled.contains(&def.group))
        .cloned()
        .collect();

    let mut out = String::new();
    for (category, defs) in readme::by_category(&enabled) {
        out.push_str(&format!("**{}**\n", category.label()));
        for def in defs {
            for (usage, description) in readme::usage_lines(def) {
                out.push_str(&format!("`{}` {}\n", usage, description));
            }
        }
        out.push('\n');
    }
    out
}

#[serenity::async_trait]
impl Command for Help {
    fn name(&self) -> &str {
        "help"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let disabled = match inv.guild_id() {
            Some(guild_id) => ctx.storage.disabled_groups(guild_id).await,
            None => BTreeSet::new(),
        };
        let text = render(&ctx.registry.definitions(), &disabled);
        inv.interaction()
            .reply_embed(ctx.http, embed("Commands", text), true)
            .await
    }
}

impl SlashCommand for Help {
    fn definition(&self) -> CommandDef {
        CommandDef::new("help", "List the commands available here").category(Category::General)
    }
}

impl DiscordMeta for Help {
    fn guild_only(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::OptionSpec;

    #[test]
    fn disabled_groups_are_hidden() {
        let defs = vec![
            CommandDef::new("help", "List commands"),
            CommandDef::new("music", "Music")
                .category(Category::Music)
                .group("music")
                .option(OptionSpec::sub_command("stop", "Stop")),
            CommandDef::new("link", "Shorten a link")
                .category(Category::Utility)
                .group("links")
                .option(OptionSpec::string("url", "Link").required()),
        ];
        let disabled: BTreeSet<String> = ["music".to_owned()].into_iter().collect();
        let text = render(&defs, &disabled);

        assert!(text.contains("`/help` List commands"));
        assert!(text.contains("`/link <url>` Shorten a link"));
        assert!(!text.contains("music"));
        assert!(text.find("**General**").unwrap() < text.find("**Utility**").unwrap());
    }
}
