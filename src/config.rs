use crate::error::BotError;
use anyhow::Result;
use serenity::all::{GuildId, UserId};
use std::{collections::HashSet, path::PathBuf};

const DEFAULT_STORAGE_PATH: &str = "./data/datastore.json";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_SHORTLINK_ADDR: &str = "0.0.0.0:8787";
const DEFAULT_SHORTLINK_BASE_URL: &str = "http://localhost:8787";
const DEFAULT_README_PATH: &str = "COMMANDS.md";

/// Source of environment variables.  Lets tests build a `Config` without touching the process
/// environment.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment
pub struct ProcessEnv;

impl ReadEnv for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// Bot configuration.  Built once at start and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub storage_path: PathBuf,
    pub tasks_path: PathBuf,
    pub data_dir: PathBuf,
    pub protected_users: HashSet<UserId>,
    pub developer_id: Option<UserId>,
    pub init_slash_commands: bool,
    pub blacklisted_guilds: HashSet<GuildId>,
    pub ai: AiConfig,
    pub shortlink_addr: String,
    pub shortlink_base_url: String,
    pub readme_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    G4f,
    Pollinations,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub base_url: String,
    pub model: String,
    pub prompt_path: Option<PathBuf>,
}

impl AiProvider {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "g4f" => Ok(AiProvider::G4f),
            "pollinations" => Ok(AiProvider::Pollinations),
            other => Err(BotError::Config(format!("unknown AI_PROVIDER `{}`", other)).into()),
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            AiProvider::G4f => "http://localhost:1337/v1/chat/completions",
            AiProvider::Pollinations => "https://text.pollinations.ai/openai",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            AiProvider::G4f => "gpt-4o-mini",
            AiProvider::Pollinations => "openai",
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => crate::log_internal!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(BotError::Config(format!("could not read .env: {}", e)).into()),
        }
        Self::from_env(&ProcessEnv)
    }

    pub fn from_env(env: &impl ReadEnv) -> Result<Self> {
        let require = |key: &str| {
            env.var(key)
                .ok_or_else(|| BotError::Config(format!("{} is not set", key)))
        };

        let discord_token = require("DISCORD_TOKEN")?;
        let tasks_path = PathBuf::from(require("TASKS_PATH")?);

        let storage_path = PathBuf::from(
            env.var("STORAGE_PATH")
                .unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_owned()),
        );
        let data_dir =
            PathBuf::from(env.var("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_owned()));

        let protected_users = parse_id_list(&env.var("PROTECTED_USERS").unwrap_or_default())
            .into_iter()
            .map(UserId::new)
            .collect();
        let developer_id = match env.var("DEVELOPER_ID") {
            Some(id) => Some(UserId::new(parse_id(&id).ok_or_else(|| {
                BotError::Config(format!("DEVELOPER_ID `{}` is not a valid ID", id))
            })?)),
            None => None,
        };
        let blacklisted_guilds =
            parse_id_list(&env.var("BLACKLISTED_GUILDS").unwrap_or_default())
                .into_iter()
                .map(GuildId::new)
                .collect();

        let init_slash_commands = env
            .var("INIT_SLASH_COMMANDS")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let provider = AiProvider::parse(&env.var("AI_PROVIDER").unwrap_or_else(|| "g4f".into()))?;
        let ai = AiConfig {
            provider,
            base_url: env
                .var("AI_BASE_URL")
                .unwrap_or_else(|| provider.default_base_url().to_owned()),
            model: env
                .var("AI_MODEL")
                .unwrap_or_else(|| provider.default_model().to_owned()),
            prompt_path: env.var("AI_PROMPT_PATH").map(PathBuf::from),
        };

        Ok(Config {
            discord_token,
            storage_path,
            tasks_path,
            data_dir,
            protected_users,
            developer_id,
            init_slash_commands,
            blacklisted_guilds,
            ai,
            shortlink_addr: env
                .var("SHORTLINK_ADDR")
                .unwrap_or_else(|| DEFAULT_SHORTLINK_ADDR.to_owned()),
            shortlink_base_url: env
                .var("SHORTLINK_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SHORTLINK_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            readme_path: PathBuf::from(
                env.var("README_PATH")
                    .unwrap_or_else(|| DEFAULT_README_PATH.to_owned()),
            ),
        })
    }

    pub fn is_protected(&self, user_id: UserId) -> bool {
        self.protected_users.contains(&user_id)
    }

    pub fn is_developer(&self, user_id: UserId) -> bool {
        self.developer_id == Some(user_id)
    }

    pub fn is_blacklisted(&self, guild_id: GuildId) -> bool {
        self.blacklisted_guilds.contains(&guild_id)
    }

    /// `data/commands/{guildID}.json`
    pub fn command_cache_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir
            .join("commands")
            .join(format!("{}.json", guild_id))
    }

    /// `data/mind`
    pub fn mind_dir(&self) -> PathBuf {
        self.data_dir.join("mind")
    }

    /// `data/{guildID}_chat.prompt.md`
    pub fn chat_prompt_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir.join(format!("{}_chat.prompt.md", guild_id))
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// Discord snowflakes are never zero; serenity's ID constructors panic on zero.
fn parse_id(s: &str) -> Option<u64> {
    s.trim().parse::<u64>().ok().filter(|id| *id != 0)
}

fn parse_id_list(s: &str) -> Vec<u64> {
    s.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .filter_map(parse_id)
        .collect()
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;

    pub struct InMemoryEnv(HashMap<&'static str, &'static str>);

    impl InMemoryEnv {
        pub fn new(pairs: &[(&'static str, &'static str)]) -> Self {
            Self(pairs.iter().cloned().collect())
        }
    }

    impl ReadEnv for InMemoryEnv {
        fn var(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    /// Minimal valid configuration rooted at `dir`, for tests of other modules.
    pub fn test_config(dir: &std::path::Path) -> Config {
        let mut cfg = Config::from_env(&InMemoryEnv::new(&[
            ("DISCORD_TOKEN", "token"),
            ("TASKS_PATH", "tasks.txt"),
        ]))
        .unwrap();
        cfg.data_dir = dir.to_path_buf();
        cfg.storage_path = dir.join("datastore.json");
        cfg.tasks_path = dir.join("tasks.txt");
        cfg
    }

    #[test]
    fn test_minimal_env_uses_defaults() {
        let env = InMemoryEnv::new(&[("DISCORD_TOKEN", "TOK"), ("TASKS_PATH", "/tmp/tasks")]);
        let cfg = Config::from_env(&env).unwrap();
        assert_eq!(cfg.discord_token, "TOK");
        assert_eq!(cfg.storage_path, PathBuf::from("./data/datastore.json"));
        assert_eq!(cfg.tasks_path, PathBuf::from("/tmp/tasks"));
        assert!(!cfg.init_slash_commands);
        assert_eq!(cfg.ai.provider, AiProvider::G4f);
        assert_eq!(cfg.shortlink_addr, "0.0.0.0:8787");
        assert!(cfg.protected_users.is_empty());
        assert!(cfg.developer_id.is_none());
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let env = InMemoryEnv::new(&[("TASKS_PATH", "/tmp/tasks")]);
        let err = Config::from_env(&env).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BotError>(),
            Some(BotError::Config(_))
        ));
    }

    #[test]
    fn test_missing_tasks_path_is_config_error() {
        let env = InMemoryEnv::new(&[("DISCORD_TOKEN", "TOK")]);
        assert!(Config::from_env(&env).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let env = InMemoryEnv::new(&[
            ("DISCORD_TOKEN", "TOK"),
            ("TASKS_PATH", "t"),
            ("AI_PROVIDER", "openai"),
        ]);
        assert!(Config::from_env(&env).is_err());
    }

    #[test]
    fn test_full_env() {
        let env = InMemoryEnv::new(&[
            ("DISCORD_TOKEN", "TOK"),
            ("TASKS_PATH", "t"),
            ("PROTECTED_USERS", "111, 222,,abc"),
            ("DEVELOPER_ID", "333"),
            ("INIT_SLASH_COMMANDS", "TRUE"),
            ("AI_PROVIDER", "Pollinations"),
            ("BLACKLISTED_GUILDS", "444"),
            ("SHORTLINK_BASE_URL", "https://s.example/"),
        ]);
        let cfg = Config::from_env(&env).unwrap();
        assert!(cfg.is_protected(UserId::new(111)));
        assert!(cfg.is_protected(UserId::new(222)));
        assert_eq!(cfg.protected_users.len(), 2);
        assert!(cfg.is_developer(UserId::new(333)));
        assert!(cfg.init_slash_commands);
        assert_eq!(cfg.ai.provider, AiProvider::Pollinations);
        assert_eq!(cfg.ai.base_url, "https://text.pollinations.ai/openai");
        assert!(cfg.is_blacklisted(GuildId::new(444)));
        assert_eq!(cfg.shortlink_base_url, "https://s.example");
    }

    #[test]
    fn test_invalid_developer_id() {
        let env = InMemoryEnv::new(&[
            ("DISCORD_TOKEN", "TOK"),
            ("TASKS_PATH", "t"),
            ("DEVELOPER_ID", "me"),
        ]);
        assert!(Config::from_env(&env).is_err());
    }

    #[test]
    fn test_paths() {
        let cfg = test_config(std::path::Path::new("/srv/data"));
        assert_eq!(
            cfg.command_cache_path(GuildId::new(42)),
            PathBuf::from("/srv/data/commands/42.json")
        );
        assert_eq!(
            cfg.chat_prompt_path(GuildId::new(42)),
            PathBuf::from("/srv/data/42_chat.prompt.md")
        );
    }
}
