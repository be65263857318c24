//! Channel purge commands on top of [`PurgeEngine`](crate::purge::PurgeEngine)

use crate::{
    command::{embed, require_confirm, GROUP_PURGE},
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    permissions::require_bot,
    purge::{self, duration},
    registry::{Command, DiscordMeta, Invocation, Options, SlashCommand},
    respond::Respond,
    storage::{DeletionJob, DeletionMode},
};
use anyhow::Result;
use chrono::Utc;
use serenity::all::Permissions;

pub struct DelNow;
pub struct DelAuto;
pub struct DelStop;
pub struct DelJobs;

/// Only the literal string `true` asks for a public notice.
fn notify_all(options: &Options) -> bool {
    options.str("notify_all") == Some("true")
}

fn notify_option() -> OptionSpec {
    OptionSpec::string("notify_all", "Tell the whole channel")
        .required()
        .choice("Yes", "true")
        .choice("No", "false")
}

fn confirm_option() -> OptionSpec {
    OptionSpec::string("confirm", "Type yes to go ahead").required()
}

fn notice(job: &DeletionJob) -> String {
    match job.mode {
        DeletionMode::Delayed => format!(
            "Every message in <#{}> will be deleted <t:{}:R>.",
            job.channel_id,
            job.delay_until.timestamp()
        ),
        DeletionMode::Recurring => format!(
            "Messages in <#{}> older than {} will now be deleted automatically.",
            job.channel_id, job.older_than
        ),
    }
}

/// Confirm a new job, to everyone when `notify_all` was asked for.
async fn announce(ctx: &Context<'_>, inv: &Invocation<'_>, job: &DeletionJob) -> Result<()> {
    let ephemeral = !job.notify_all;
    inv.interaction()
        .reply_embed(ctx.http, embed("Channel purge", notice(job)), ephemeral)
        .await
}

/// Both scheduling commands need the bot to be able to delete messages here.
fn check_bot(inv: &Invocation<'_>) -> Result<()> {
    require_bot(inv.app_permissions(), Permissions::MANAGE_MESSAGES)
}

#[serenity::async_trait]
impl Command for DelNow {
    fn name(&self) -> &str {
        "del-now"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let options = inv.options();
        require_confirm(options)?;
        check_bot(inv)?;
        let guild_id = inv.require_guild()?;
        let delay = duration::parse(options.require_str("delay")?)?;

        let job = ctx
            .purge
            .schedule_delayed(guild_id, inv.channel_id(), delay, notify_all(options))
            .await?;
        announce(ctx, inv, &job).await
    }
}

impl SlashCommand for DelNow {
    fn definition(&self) -> CommandDef {
        CommandDef::new("del-now", "Delete every message in this channel after a delay")
            .category(Category::Moderation)
            .group(GROUP_PURGE)
            .option(
                OptionSpec::string("delay", "How long to wait")
                    .required()
                    .choice("Right away", "0s")
                    .choice("1 minute", "1m")
                    .choice("10 minutes", "10m")
                    .choice("1 hour", "1h")
                    .choice("24 hours", "24h"),
            )
            .option(notify_option())
            .option(confirm_option())
    }
}

impl DiscordMeta for DelNow {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}

#[serenity::async_trait]
impl Command for DelAuto {
    fn name(&self) -> &str {
        "del-auto"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let options = inv.options();
        require_confirm(options)?;
        check_bot(inv)?;
        let guild_id = inv.require_guild()?;
        let older_than = options.require_str("older_than")?;

        let job = ctx
            .purge
            .start_recurring(guild_id, inv.channel_id(), older_than, notify_all(options))
            .await?;
        announce(ctx, inv, &job).await
    }
}

impl SlashCommand for DelAuto {
    fn definition(&self) -> CommandDef {
        CommandDef::new("del-auto", "Keep deleting messages past a certain age")
            .category(Category::Moderation)
            .group(GROUP_PURGE)
            .option(OptionSpec::string("older_than", "Age such as 30m, 12h or 7d").required())
            .option(notify_option())
            .option(confirm_option())
    }
}

impl DiscordMeta for DelAuto {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}

#[serenity::async_trait]
impl Command for DelStop {
    fn name(&self) -> &str {
        "del-stop"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let reply = if ctx.purge.stop(guild_id, inv.channel_id()).await? {
            "Stopped the deletion job in this channel."
        } else {
            "No deletion job is running in this channel."
        };
        inv.interaction().reply_ephemeral(ctx.http, reply).await
    }
}

impl SlashCommand for DelStop {
    fn definition(&self) -> CommandDef {
        CommandDef::new("del-stop", "Stop deleting messages in this channel")
            .category(Category::Moderation)
            .group(GROUP_PURGE)
    }
}

impl DiscordMeta for DelStop {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}

#[serenity::async_trait]
impl Command for DelJobs {
    fn name(&self) -> &str {
        "del-jobs"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_meta(&self) -> Option<&dyn DiscordMeta> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let jobs = ctx.purge.jobs(guild_id).await;
        inv.interaction()
            .reply_embed(
                ctx.http,
                embed("Deletion jobs", purge::render(&jobs, Utc::now())),
                true,
            )
            .await
    }
}

impl SlashCommand for DelJobs {
    fn definition(&self) -> CommandDef {
        CommandDef::new("del-jobs", "List the deletion jobs in this server")
            .category(Category::Moderation)
            .group(GROUP_PURGE)
    }
}

impl DiscordMeta for DelJobs {
    fn required_permissions(&self) -> Permissions {
        Permissions::ADMINISTRATOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OptionValue;
    use chrono::TimeZone;
    use serenity::all::{ChannelId, GuildId};

    fn options(notify: &str) -> Options {
        Options(vec![(
            "notify_all".to_owned(),
            OptionValue::String(notify.to_owned()),
        )])
    }

    #[test]
    fn only_true_notifies() {
        assert!(notify_all(&options("true")));
        assert!(!notify_all(&options("false")));
        assert!(!notify_all(&options("TRUE")));
        assert!(!notify_all(&Options::default()));
    }

    #[test]
    fn delay_choices_parse() {
        let def = DelNow.definition();
        let delay = &def.options[0];
        assert!(!delay.choices.is_empty());
        for choice in &delay.choices {
            let crate::definition::ChoiceValue::String(value) = &choice.value else {
                panic!("delay choices are strings");
            };
            assert!(duration::parse(value).is_ok(), "{}", value);
        }
    }

    #[test]
    fn notices_describe_the_job() {
        let delayed = DeletionJob {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(2),
            mode: DeletionMode::Delayed,
            delay_until: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            older_than: String::new(),
            notify_all: true,
        };
        assert_eq!(
            notice(&delayed),
            "Every message in <#2> will be deleted <t:1700000000:R>."
        );

        let recurring = DeletionJob {
            mode: DeletionMode::Recurring,
            older_than: "7d".to_owned(),
            ..delayed
        };
        assert!(notice(&recurring).contains("older than 7d"));
    }
}
