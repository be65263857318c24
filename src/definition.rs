//! Static descriptions of the commands the bot registers with Discord

use serde::{Deserialize, Serialize};
use serenity::all::{CommandOptionType, CommandType, CreateCommand, CreateCommandOption};

/// Help and README sections.  Lower weight is listed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Category {
    #[default]
    General,
    Social,
    Tasks,
    Music,
    Utility,
    Moderation,
    Admin,
}

impl Category {
    pub fn weight(self) -> u8 {
        match self {
            Category::General => 0,
            Category::Social => 10,
            Category::Tasks => 20,
            Category::Music => 30,
            Category::Utility => 40,
            Category::Moderation => 50,
            Category::Admin => 60,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::General => "General",
            Category::Social => "Social",
            Category::Tasks => "Tasks",
            Category::Music => "Music",
            Category::Utility => "Utility",
            Category::Moderation => "Moderation",
            Category::Admin => "Administration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Chat,
    MessageMenu,
    UserMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    User,
    Role,
    Channel,
    Attachment,
    SubCommand,
    SubCommandGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceValue {
    String(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub value: ChoiceValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    pub kind: OptionKind,
    pub required: bool,
    pub choices: Vec<Choice>,
    pub options: Vec<OptionSpec>,
}

/// Everything Discord and the help listing need to know about a command.
///
/// `kind` is `None` when the command does not say; command sync fills in the default for the
/// capability that provided the definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDef {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub group: String,
    pub kind: Option<CommandKind>,
    pub options: Vec<OptionSpec>,
    /// Custom-ID prefix of the buttons this command emits, when it differs from `name`
    pub component_prefix: Option<String>,
}

impl CommandDef {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            category: Category::default(),
            group: String::new(),
            kind: None,
            options: Vec::new(),
            component_prefix: None,
        }
    }

    pub fn message_menu(name: &str) -> Self {
        Self::new(name, "").kind(CommandKind::MessageMenu)
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = group.to_owned();
        self
    }

    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }

    pub fn component_prefix(mut self, prefix: &str) -> Self {
        self.component_prefix = Some(prefix.to_owned());
        self
    }

    /// Builder for registering this definition with Discord
    pub fn to_create_command(&self) -> CreateCommand {
        let kind = self.kind.unwrap_or(CommandKind::Chat);
        let mut builder = CreateCommand::new(&self.name).kind(match kind {
            CommandKind::Chat => CommandType::ChatInput,
            CommandKind::MessageMenu => CommandType::Message,
            CommandKind::UserMenu => CommandType::User,
        });

        // Discord rejects descriptions and options on context menu commands.
        if kind == CommandKind::Chat {
            builder = builder.description(&self.description).set_options(
                self.options
                    .iter()
                    .map(OptionSpec::to_create_option)
                    .collect(),
            );
        }

        builder
    }
}

impl OptionSpec {
    pub fn new(kind: OptionKind, name: &str, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            kind,
            required: false,
            choices: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(OptionKind::String, name, description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::new(OptionKind::Integer, name, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(OptionKind::Boolean, name, description)
    }

    pub fn user(name: &str, description: &str) -> Self {
        Self::new(OptionKind::User, name, description)
    }

    pub fn role(name: &str, description: &str) -> Self {
        Self::new(OptionKind::Role, name, description)
    }

    pub fn channel(name: &str, description: &str) -> Self {
        Self::new(OptionKind::Channel, name, description)
    }

    pub fn sub_command(name: &str, description: &str) -> Self {
        Self::new(OptionKind::SubCommand, name, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn choice(mut self, label: &str, value: &str) -> Self {
        self.choices.push(Choice {
            label: label.to_owned(),
            value: ChoiceValue::String(value.to_owned()),
        });
        self
    }

    pub fn int_choice(mut self, label: &str, value: i64) -> Self {
        self.choices.push(Choice {
            label: label.to_owned(),
            value: ChoiceValue::Integer(value),
        });
        self
    }

    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }

    pub fn to_create_option(&self) -> CreateCommandOption {
        let kind = match self.kind {
            OptionKind::String => CommandOptionType::String,
            OptionKind::Integer => CommandOptionType::Integer,
            OptionKind::Boolean => CommandOptionType::Boolean,
            OptionKind::User => CommandOptionType::User,
            OptionKind::Role => CommandOptionType::Role,
            OptionKind::Channel => CommandOptionType::Channel,
            OptionKind::Attachment => CommandOptionType::Attachment,
            OptionKind::SubCommand => CommandOptionType::SubCommand,
            OptionKind::SubCommandGroup => CommandOptionType::SubCommandGroup,
        };

        let mut builder = CreateCommandOption::new(kind, &self.name, &self.description);
        // Sub-commands carry no `required` flag of their own.
        if !matches!(
            self.kind,
            OptionKind::SubCommand | OptionKind::SubCommandGroup
        ) {
            builder = builder.required(self.required);
        }
        for choice in &self.choices {
            builder = match &choice.value {
                ChoiceValue::String(value) => builder.add_string_choice(&choice.label, value),
                // Discord integer choices are bounded well within i32 for our commands.
                ChoiceValue::Integer(value) => builder.add_int_choice(
                    &choice.label,
                    (*value).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
                ),
            };
        }
        for option in &self.options {
            builder = builder.add_sub_option(option.to_create_option());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_options_in_declared_order() {
        let def = CommandDef::new("music", "Play music")
            .category(Category::Music)
            .group("music")
            .option(
                OptionSpec::sub_command("play", "Play something")
                    .option(OptionSpec::string("input", "URL or search").required())
                    .option(
                        OptionSpec::string("source", "Where to look")
                            .choice("YouTube", "youtube")
                            .choice("Radio", "radio"),
                    ),
            )
            .option(OptionSpec::sub_command("stop", "Stop"));

        assert_eq!(def.options.len(), 2);
        assert_eq!(def.options[0].options[0].name, "input");
        assert!(def.options[0].options[0].required);
        assert_eq!(def.options[0].options[1].choices[1].label, "Radio");
        assert_eq!(def.group, "music");
        assert_eq!(def.kind, None);
    }

    #[test]
    fn message_menu_has_kind_and_no_description() {
        let def = CommandDef::message_menu("Announce");
        assert_eq!(def.kind, Some(CommandKind::MessageMenu));
        assert!(def.description.is_empty());
    }

    #[test]
    fn categories_sort_by_weight() {
        let mut cats = vec![Category::Admin, Category::General, Category::Music];
        cats.sort_by_key(|c| c.weight());
        assert_eq!(cats, vec![Category::General, Category::Music, Category::Admin]);
    }
}
