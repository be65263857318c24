//! Command registry
//!
//! Every command is stored as a `Handle`.  A handle may be a middleware wrapping another
//! handle; `root` unwraps it back to the concrete command, which is where the capability
//! traits (slash definition, context menu, component, reaction, message) are implemented.

use crate::{
    context::Context,
    definition::{CommandDef, CommandKind},
    error::BotError,
    logging::{CommandName, Place, PrintColor},
    storage::CommandLogEntry,
};
use anyhow::Result;
use serenity::all::{
    ChannelId, CommandInteraction, ComponentInteraction, GuildId, Message, Permissions, Reaction,
    ResolvedOption, ResolvedValue, RoleId, User, UserId,
};
use std::{collections::BTreeMap, sync::Arc};

pub type Handle = Arc<dyn Command>;

/// Something the dispatcher can run
#[serenity::async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    /// The wrapped handle, if this is a middleware
    fn inner(&self) -> Option<&Handle> {
        None
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        None
    }
    fn as_context_menu(&self) -> Option<&dyn ContextMenuCommand> {
        None
    }
    fn as_component(&self) -> Option<&dyn ComponentHandler> {
        None
    }
    fn as_reaction(&self) -> Option<&dyn ReactionHandler> {
        None
    }
    fn as_message(&self) -> Option<&dyn MessageHandler> {
        None
    }
    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        None
    }

    /// Run an application command invocation
    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()>;
}

/// Provides a chat-input definition
pub trait SlashCommand: Send + Sync {
    fn definition(&self) -> CommandDef;
}

/// Provides a right-click menu definition
pub trait ContextMenuCommand: Send + Sync {
    fn definition(&self) -> CommandDef;
}

/// Handles buttons whose custom ID starts with the command name
#[serenity::async_trait]
pub trait ComponentHandler: Send + Sync {
    async fn component(
        &self,
        ctx: &Context<'_>,
        interaction: &ComponentInteraction,
        payload: &str,
    ) -> Result<()>;
}

/// Sees every reaction added to a message; decides by emoji whether to act
#[serenity::async_trait]
pub trait ReactionHandler: Send + Sync {
    async fn reaction(&self, ctx: &Context<'_>, reaction: &Reaction) -> Result<()>;
}

/// Sees messages that mention the bot
#[serenity::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn message(&self, ctx: &Context<'_>, msg: &Message) -> Result<()>;
}

/// Access requirements that decide which middlewares wrap a command
pub trait DiscordMeta: Send + Sync {
    fn guild_only(&self) -> bool {
        true
    }
    fn required_permissions(&self) -> Permissions {
        Permissions::empty()
    }
}

/// One invocation of an application command, shaped by the kind of command.
pub enum Invocation<'a> {
    Chat {
        interaction: &'a CommandInteraction,
        options: Options,
    },
    MessageTarget {
        interaction: &'a CommandInteraction,
        target: &'a Message,
    },
    UserTarget {
        interaction: &'a CommandInteraction,
        target: &'a User,
    },
}

impl<'a> Invocation<'a> {
    pub fn interaction(&self) -> &'a CommandInteraction {
        match self {
            Invocation::Chat { interaction, .. }
            | Invocation::MessageTarget { interaction, .. }
            | Invocation::UserTarget { interaction, .. } => interaction,
        }
    }

    pub fn guild_id(&self) -> Option<GuildId> {
        self.interaction().guild_id
    }

    /// Guild ID, or an error for commands used in DMs.
    pub fn require_guild(&self) -> Result<GuildId> {
        self.guild_id().ok_or_else(|| {
            BotError::PermissionDenied("This command only works in a server.".to_owned()).into()
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.interaction().channel_id
    }

    pub fn user(&self) -> &'a User {
        &self.interaction().user
    }

    /// The invoking member's permissions in the channel, as computed by Discord
    pub fn member_permissions(&self) -> Permissions {
        self.interaction()
            .member
            .as_ref()
            .and_then(|m| m.permissions)
            .unwrap_or_else(Permissions::empty)
    }

    /// The bot's own permissions in the channel, as computed by Discord
    pub fn app_permissions(&self) -> Permissions {
        self.interaction()
            .app_permissions
            .unwrap_or_else(Permissions::empty)
    }

    pub fn options(&self) -> &Options {
        static EMPTY: Options = Options(Vec::new());
        match self {
            Invocation::Chat { options, .. } => options,
            _ => &EMPTY,
        }
    }
}

/// Owned copy of a command option value
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    User(UserId),
    Role(RoleId),
    Channel(ChannelId),
    Attachment(String),
    SubCommand(String, Options),
}

/// The options of one invocation, in the order Discord sent them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options(pub Vec<(String, OptionValue)>);

impl Options {
    pub fn from_resolved(resolved: &[ResolvedOption<'_>]) -> Self {
        let mut out = Vec::new();
        for option in resolved {
            let value = match &option.value {
                ResolvedValue::String(s) => OptionValue::String((*s).to_owned()),
                ResolvedValue::Integer(i) => OptionValue::Integer(*i),
                ResolvedValue::Boolean(b) => OptionValue::Boolean(*b),
                ResolvedValue::User(user, _) => OptionValue::User(user.id),
                ResolvedValue::Role(role) => OptionValue::Role(role.id),
                ResolvedValue::Channel(channel) => OptionValue::Channel(channel.id),
                ResolvedValue::Attachment(attachment) => {
                    OptionValue::Attachment(attachment.url.clone())
                }
                ResolvedValue::SubCommand(inner) | ResolvedValue::SubCommandGroup(inner) => {
                    OptionValue::SubCommand(option.name.to_owned(), Options::from_resolved(inner))
                }
                _ => continue,
            };
            out.push((option.name.to_owned(), value));
        }
        Self(out)
    }

    fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(OptionValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(OptionValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(OptionValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn user(&self, name: &str) -> Option<UserId> {
        match self.get(name) {
            Some(OptionValue::User(u)) => Some(*u),
            _ => None,
        }
    }

    pub fn role(&self, name: &str) -> Option<RoleId> {
        match self.get(name) {
            Some(OptionValue::Role(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn channel(&self, name: &str) -> Option<ChannelId> {
        match self.get(name) {
            Some(OptionValue::Channel(c)) => Some(*c),
            _ => None,
        }
    }

    /// Required string option, or an input error naming it.
    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.str(name)
            .ok_or_else(|| BotError::InvalidInput(format!("Missing option `{}`.", name)).into())
    }

    /// The selected sub-command and its options
    pub fn sub_command(&self) -> Option<(&str, &Options)> {
        self.0.iter().find_map(|(_, v)| match v {
            OptionValue::SubCommand(name, options) => Some((name.as_str(), options)),
            _ => None,
        })
    }
}

/// Innermost concrete command of a (possibly wrapped) handle.
pub fn root(handle: &Handle) -> &dyn Command {
    let mut current: &Handle = handle;
    while let Some(inner) = current.inner() {
        current = inner;
    }
    current.as_ref()
}

/// Definition of a command, with the kind filled in from the capability that provided it.
/// `None` for commands that only react to messages, reactions, or components.
pub fn definition(handle: &Handle) -> Option<CommandDef> {
    let command = root(handle);
    if let Some(slash) = command.as_slash() {
        let mut def = slash.definition();
        def.kind.get_or_insert(CommandKind::Chat);
        return Some(def);
    }
    if let Some(menu) = command.as_context_menu() {
        let mut def = menu.definition();
        def.kind.get_or_insert(CommandKind::MessageMenu);
        return Some(def);
    }
    None
}

/// Name → command handle.  Filled once at start, read-only afterwards.
#[derive(Default)]
pub struct Registry {
    commands: BTreeMap<String, Handle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command, wrapping it in the middlewares its metadata and definition call for.
    pub fn register(&mut self, command: Handle) {
        let name = command.name().to_owned();
        let def = definition(&command);
        let (guild_only, permissions) = match root(&command).as_meta() {
            Some(meta) => (meta.guild_only(), meta.required_permissions()),
            None => (true, Permissions::empty()),
        };

        let mut handle = command;
        if !permissions.is_empty() {
            handle = Arc::new(RequirePermissions {
                inner: handle,
                permissions,
            });
        }
        if let Some(group) = def.map(|d| d.group).filter(|g| !g.is_empty()) {
            handle = Arc::new(RequireGroupEnabled {
                inner: handle,
                group,
            });
        }
        if guild_only {
            handle = Arc::new(GuildOnly { inner: handle });
        }
        handle = Arc::new(LogInvocation { inner: handle });

        self.commands.insert(name, handle);
    }

    /// Register without any middleware.  For tests and commands that need none.
    pub fn register_bare(&mut self, command: Handle) {
        self.commands.insert(command.name().to_owned(), command);
    }

    pub fn get(&self, name: &str) -> Option<&Handle> {
        self.commands.get(name)
    }

    /// All commands ordered by name
    pub fn all(&self) -> impl Iterator<Item = &Handle> {
        self.commands.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Local definitions for command sync and documentation
    pub fn definitions(&self) -> Vec<CommandDef> {
        self.all().filter_map(definition).collect()
    }
}

//
// Middlewares
//

/// Refuses invocations outside a guild
struct GuildOnly {
    inner: Handle,
}

/// Refuses members lacking the given permissions.  The configured developer always passes.
struct RequirePermissions {
    inner: Handle,
    permissions: Permissions,
}

/// Refuses invocations of commands whose group is disabled in the guild
struct RequireGroupEnabled {
    inner: Handle,
    group: String,
}

/// Logs the invocation and appends it to the guild's command history
struct LogInvocation {
    inner: Handle,
}

#[serenity::async_trait]
impl Command for GuildOnly {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inner(&self) -> Option<&Handle> {
        Some(&self.inner)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        inv.require_guild()?;
        self.inner.run(ctx, inv).await
    }
}

#[serenity::async_trait]
impl Command for RequirePermissions {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inner(&self) -> Option<&Handle> {
        Some(&self.inner)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        crate::permissions::require_member(
            ctx.cfg,
            inv.user().id,
            inv.member_permissions(),
            self.permissions,
        )?;
        self.inner.run(ctx, inv).await
    }
}

#[serenity::async_trait]
impl Command for RequireGroupEnabled {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inner(&self) -> Option<&Handle> {
        Some(&self.inner)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        if let Some(guild_id) = inv.guild_id() {
            if ctx.storage.is_group_disabled(guild_id, &self.group).await {
                return Err(BotError::PermissionDenied(format!(
                    "The `{}` commands are disabled on this server.",
                    self.group
                ))
                .into());
            }
        }
        self.inner.run(ctx, inv).await
    }
}

#[serenity::async_trait]
impl Command for LogInvocation {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inner(&self) -> Option<&Handle> {
        Some(&self.inner)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let user = inv.user();
        let channel_name = inv
            .interaction()
            .channel
            .as_ref()
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| inv.channel_id().to_string());
        let guild_name = inv.guild_id().map(|guild_id| {
            guild_id
                .name(ctx.cache)
                .unwrap_or_else(|| guild_id.to_string())
        });
        crate::log_event!(
            "{} used {} in {}",
            user.color(),
            CommandName(self.name()).color(),
            Place {
                guild: guild_name.as_deref(),
                channel: &channel_name,
            }
            .color(),
        );

        if let (Some(guild_id), Some(guild_name)) = (inv.guild_id(), guild_name) {
            let entry = CommandLogEntry {
                datetime: chrono::Utc::now(),
                user: user.id,
                username: user.name.clone(),
                channel: inv.channel_id(),
                channel_name,
                guild_name,
                command_name: self.name().to_owned(),
            };
            // Failing to record history must not block the command.
            if let Err(e) = ctx.storage.log_command(guild_id, entry).await {
                crate::log_warn!("Could not record command history: {:#}", e);
            }
        }

        self.inner.run(ctx, inv).await
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::definition::{Category, OptionSpec};

    /// Minimal command exposing selected capabilities, for registry and dispatcher tests.
    pub struct Dummy {
        pub name: &'static str,
        pub slash: bool,
        pub menu: bool,
        pub component: bool,
        pub group: &'static str,
    }

    impl Dummy {
        pub fn slash(name: &'static str) -> Handle {
            Arc::new(Dummy {
                name,
                slash: true,
                menu: false,
                component: false,
                group: "",
            })
        }
    }

    #[serenity::async_trait]
    impl Command for Dummy {
        fn name(&self) -> &str {
            self.name
        }
        fn as_slash(&self) -> Option<&dyn SlashCommand> {
            self.slash.then_some(self as &dyn SlashCommand)
        }
        fn as_context_menu(&self) -> Option<&dyn ContextMenuCommand> {
            self.menu.then_some(self as &dyn ContextMenuCommand)
        }
        fn as_component(&self) -> Option<&dyn ComponentHandler> {
            self.component.then_some(self as &dyn ComponentHandler)
        }
        async fn run(&self, _ctx: &Context<'_>, _inv: &Invocation<'_>) -> Result<()> {
            Ok(())
        }
    }

    impl SlashCommand for Dummy {
        fn definition(&self) -> CommandDef {
            CommandDef::new(self.name, "dummy")
                .category(Category::Utility)
                .group(self.group)
                .option(OptionSpec::string("b", "second"))
                .option(OptionSpec::string("a", "first"))
        }
    }

    impl ContextMenuCommand for Dummy {
        fn definition(&self) -> CommandDef {
            CommandDef::new(self.name, "")
        }
    }

    #[serenity::async_trait]
    impl ComponentHandler for Dummy {
        async fn component(
            &self,
            _ctx: &Context<'_>,
            _interaction: &ComponentInteraction,
            _payload: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn root_unwraps_all_middlewares() {
        let mut registry = Registry::new();
        registry.register(Arc::new(Dummy {
            name: "ask",
            slash: true,
            menu: false,
            component: true,
            group: "social",
        }));

        let handle = registry.get("ask").unwrap();
        // Wrapped at least in logging and guild-only.
        assert!(handle.inner().is_some());
        let command = root(handle);
        assert!(command.inner().is_none());
        assert!(command.as_component().is_some());
        assert!(command.as_reaction().is_none());
        assert_eq!(handle.name(), "ask");
    }

    #[test]
    fn definition_defaults_kind_by_capability() {
        let slash = Dummy::slash("s");
        assert_eq!(definition(&slash).unwrap().kind, Some(CommandKind::Chat));

        let menu: Handle = Arc::new(Dummy {
            name: "Announce",
            slash: false,
            menu: true,
            component: false,
            group: "",
        });
        assert_eq!(
            definition(&menu).unwrap().kind,
            Some(CommandKind::MessageMenu)
        );

        let neither: Handle = Arc::new(Dummy {
            name: "translate",
            slash: false,
            menu: false,
            component: false,
            group: "",
        });
        assert!(definition(&neither).is_none());
    }

    #[test]
    fn all_is_ordered_by_name() {
        let mut registry = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register_bare(Dummy::slash(name));
        }
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.definitions().len(), 3);
    }

    #[test]
    fn options_lookup_and_sub_commands() {
        let options = Options(vec![(
            "play".to_owned(),
            OptionValue::SubCommand(
                "play".to_owned(),
                Options(vec![
                    ("input".to_owned(), OptionValue::String("lofi".to_owned())),
                    ("loud".to_owned(), OptionValue::Boolean(true)),
                ]),
            ),
        )]);
        let (name, sub) = options.sub_command().unwrap();
        assert_eq!(name, "play");
        assert_eq!(sub.str("input"), Some("lofi"));
        assert_eq!(sub.bool("loud"), Some(true));
        assert_eq!(sub.str("loud"), None);
        assert!(sub.require_str("source").is_err());
    }
}
