//! Command reference, for `help` and the generated README

use crate::{
    definition::{Category, CommandDef, CommandKind, OptionKind, OptionSpec},
    registry::Registry,
    storage::write_atomic,
};
use anyhow::Result;
use std::{collections::BTreeMap, path::Path};

/// Definitions grouped by category, lightest category first, commands by name within each.
pub fn by_category(defs: &[CommandDef]) -> Vec<(Category, Vec<&CommandDef>)> {
    let mut groups: BTreeMap<(u8, Category), Vec<&CommandDef>> = BTreeMap::new();
    for def in defs {
        groups
            .entry((def.category.weight(), def.category))
            .or_default()
            .push(def);
    }
    groups
        .into_iter()
        .map(|((_, category), mut defs)| {
            defs.sort_by(|a, b| a.name.cmp(&b.name));
            (category, defs)
        })
        .collect()
}

fn argument(option: &OptionSpec) -> String {
    if option.required {
        format!("<{}>", option.name)
    } else {
        format!("[{}]", option.name)
    }
}

fn invocation(prefix: &str, options: &[OptionSpec]) -> String {
    let mut line = prefix.to_owned();
    for option in options {
        line.push(' ');
        line.push_str(&argument(option));
    }
    line
}

/// One `(usage, description)` pair per leaf of the command.
pub fn usage_lines(def: &CommandDef) -> Vec<(String, String)> {
    match def.kind.unwrap_or(CommandKind::Chat) {
        CommandKind::MessageMenu => vec![(
            format!("Message menu → Apps → {}", def.name),
            def.description.clone(),
        )],
        CommandKind::UserMenu => vec![(
            format!("User menu → Apps → {}", def.name),
            def.description.clone(),
        )],
        CommandKind::Chat => {
            let subs: Vec<&OptionSpec> = def
                .options
                .iter()
                .filter(|o| o.kind == OptionKind::SubCommand)
                .collect();
            if subs.is_empty() {
                return vec![(
                    invocation(&format!("/{}", def.name), &def.options),
                    def.description.clone(),
                )];
            }
            subs.into_iter()
                .map(|sub| {
                    (
                        invocation(&format!("/{} {}", def.name, sub.name), &sub.options),
                        sub.description.clone(),
                    )
                })
                .collect()
        }
    }
}

/// Markdown reference of every command with a definition
pub fn render(defs: &[CommandDef]) -> String {
    let mut out = String::from("# Commands\n\nGenerated from the bot's command definitions.\n");
    for (category, defs) in by_category(defs) {
        out.push_str(&format!("\n## {}\n\n", category.label()));
        for def in defs {
            for (usage, description) in usage_lines(def) {
                if description.is_empty() {
                    out.push_str(&format!("- `{}`\n", usage));
                } else {
                    out.push_str(&format!("- `{}`: {}\n", usage, description));
                }
            }
        }
    }
    out
}

pub async fn write(path: &Path, registry: &Registry) -> Result<()> {
    write_atomic(path, render(&registry.definitions()).as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Vec<CommandDef> {
        vec![
            CommandDef::new("del-stop", "Stop purging this channel").category(Category::Moderation),
            CommandDef::new("confess", "Post anonymously")
                .category(Category::Social)
                .option(OptionSpec::string("message", "What to confess").required()),
            CommandDef::new("ask", "Ask for consent")
                .category(Category::Social)
                .option(OptionSpec::user("member", "Who to ask").required())
                .option(OptionSpec::string("reason", "Why")),
            CommandDef::new("music", "Music player")
                .category(Category::Music)
                .option(
                    OptionSpec::sub_command("play", "Play something")
                        .option(OptionSpec::string("input", "URL or search").required()),
                )
                .option(OptionSpec::sub_command("stop", "Stop playing")),
            CommandDef::message_menu("Announce").category(Category::Utility),
        ]
    }

    #[test]
    fn categories_follow_weights() {
        let defs = defs();
        let grouped = by_category(&defs);
        let order: Vec<Category> = grouped.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            order,
            vec![
                Category::Social,
                Category::Music,
                Category::Utility,
                Category::Moderation
            ]
        );
        let social: Vec<&str> = grouped[0].1.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(social, vec!["ask", "confess"]);
    }

    #[test]
    fn usage_marks_required_arguments() {
        let defs = defs();
        assert_eq!(
            usage_lines(&defs[2])[0].0,
            "/ask <member> [reason]"
        );
        let music = usage_lines(&defs[3]);
        assert_eq!(music[0].0, "/music play <input>");
        assert_eq!(music[1].0, "/music stop");
        assert_eq!(usage_lines(&defs[4])[0].0, "Message menu → Apps → Announce");
    }

    #[test]
    fn markdown_has_sections_in_order() {
        let markdown = render(&defs());
        let social = markdown.find("## Social").unwrap();
        let moderation = markdown.find("## Moderation").unwrap();
        assert!(social < moderation);
        assert!(markdown.contains("- `/confess <message>`: Post anonymously"));
        assert!(markdown.contains("- `Message menu → Apps → Announce`"));
    }

    #[tokio::test]
    async fn writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("COMMANDS.md");
        let mut registry = Registry::new();
        registry.register_bare(crate::registry::tests::Dummy::slash("ping"));
        write(&path, &registry).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("- `/ping [b] [a]`: dummy"));
    }
}
