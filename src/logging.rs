//! Logging to the terminal with colors
//!
//! The macros format a colored line and hand it to `tracing`, so `RUST_LOG` still decides what
//! gets printed.

use std::io::IsTerminal;
use std::sync::LazyLock;

const DEFAULT: &str = "\x1b[0m";
const FG_BLUE: &str = "\x1b[38;5;33m";
const FG_CYAN: &str = "\x1b[36m";
const FG_GRAY: &str = "\x1b[90m";
const FG_GREEN: &str = "\x1b[32m";
const FG_MAGENTA: &str = "\x1b[35m";
const FG_RED: &str = "\x1b[31m";
const FG_YELLOW: &str = "\x1b[33m";

pub enum Color {
    Default,
    Event,
    Internal,
    Warn,
    User,
    Channel,
    Guild,
    Glue,
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // Only print colors when printing to a terminal
        //
        // This won't change during the program's execution, so we can cache it.
        static STDOUT_IS_TERMINAL: LazyLock<bool> =
            LazyLock::new(|| std::io::stdout().is_terminal());

        if !*STDOUT_IS_TERMINAL {
            return Ok(());
        }

        write!(
            f,
            "{}",
            match self {
                Color::Default => DEFAULT,
                Color::Event => FG_YELLOW,
                Color::Internal => FG_MAGENTA,
                Color::Warn => FG_RED,
                Color::User => FG_GREEN,
                Color::Channel => FG_CYAN,
                Color::Guild => FG_BLUE,
                Color::Glue => FG_GRAY,
            }
        )
    }
}

/// Inbound Discord activity
#[macro_export]
macro_rules! log_event {
    // Case: Only format string, no arguments
    ($fmtstr:expr) => {{
        tracing::info!(
            target: "nexbot::event",
            "{}",
            format!(
                concat!("{}*{} ", $fmtstr),
                $crate::logging::Color::Event,
                $crate::logging::Color::Default
            )
        )
    }};

    // Case: Format string with arguments, with optional trailing comma
    ($fmtstr:expr, $($args:expr),* $(,)?) => {{
        tracing::info!(
            target: "nexbot::event",
            "{}",
            format!(
                concat!("{}*{} ", $fmtstr),
                $crate::logging::Color::Event,
                $crate::logging::Color::Default,
                $($args),*
            )
        )
    }};
}

/// Bot-internal progress
#[macro_export]
macro_rules! log_internal {
    ($fmtstr:expr) => {{
        tracing::info!(
            target: "nexbot::internal",
            "{}",
            format!(
                concat!("{}+{} ", $fmtstr),
                $crate::logging::Color::Internal,
                $crate::logging::Color::Default
            )
        )
    }};

    ($fmtstr:expr, $($args:expr),* $(,)?) => {{
        tracing::info!(
            target: "nexbot::internal",
            "{}",
            format!(
                concat!("{}+{} ", $fmtstr),
                $crate::logging::Color::Internal,
                $crate::logging::Color::Default,
                $($args),*
            )
        )
    }};
}

/// Recoverable failures, e.g. a background loop that will try again
#[macro_export]
macro_rules! log_warn {
    ($fmtstr:expr) => {{
        tracing::warn!(
            target: "nexbot::internal",
            "{}",
            format!(
                concat!("{}!{} ", $fmtstr),
                $crate::logging::Color::Warn,
                $crate::logging::Color::Default
            )
        )
    }};

    ($fmtstr:expr, $($args:expr),* $(,)?) => {{
        tracing::warn!(
            target: "nexbot::internal",
            "{}",
            format!(
                concat!("{}!{} ", $fmtstr),
                $crate::logging::Color::Warn,
                $crate::logging::Color::Default,
                $($args),*
            )
        )
    }};
}

#[macro_export]
macro_rules! log_error {
    ($fmtstr:expr) => {{
        tracing::error!(
            target: "nexbot::internal",
            "{}",
            format!(
                concat!("{}!{} ", $fmtstr),
                $crate::logging::Color::Warn,
                $crate::logging::Color::Default
            )
        )
    }};

    ($fmtstr:expr, $($args:expr),* $(,)?) => {{
        tracing::error!(
            target: "nexbot::internal",
            "{}",
            format!(
                concat!("{}!{} ", $fmtstr),
                $crate::logging::Color::Warn,
                $crate::logging::Color::Default,
                $($args),*
            )
        )
    }};
}

/// Install the `tracing` subscriber the macros above print through.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,serenity=warn,songbird=warn,hyper=warn,reqwest=warn,rustls=warn,tungstenite=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

pub trait PrintColor {
    fn color(&self) -> String;
}

// Field separator
pub struct Glue;
impl PrintColor for Glue {
    fn color(&self) -> String {
        format!("{}{}{}", Color::Glue, ":", Color::Default)
    }
}

impl PrintColor for serenity::all::CurrentUser {
    fn color(&self) -> String {
        format!("{}{}{}", Color::User, self.name.as_str(), Color::Default)
    }
}

impl PrintColor for serenity::all::User {
    fn color(&self) -> String {
        format!("{}{}{}", Color::User, self.name.as_str(), Color::Default)
    }
}

/// Where something happened: `guild:#channel`, or `direct-message` outside a guild
pub struct Place<'a> {
    pub guild: Option<&'a str>,
    pub channel: &'a str,
}
impl PrintColor for Place<'_> {
    fn color(&self) -> String {
        match self.guild {
            Some(guild) => format!(
                "{}{}{}{}#{}{}",
                Color::Guild,
                guild,
                Glue.color(),
                Color::Channel,
                self.channel,
                Color::Default
            ),
            None => format!("{}direct-message{}", Color::Guild, Color::Default),
        }
    }
}

/// Command names are printed in the event color so they stand out in a log line
pub struct CommandName<'a>(pub &'a str);
impl PrintColor for CommandName<'_> {
    fn color(&self) -> String {
        format!("{}/{}{}", Color::Event, self.0, Color::Default)
    }
}
