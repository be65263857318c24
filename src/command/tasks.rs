//! Task workflow: `/task` hands out a random task, `/complete` reports how it went
//!
//! A member holds at most one pending task.  A task that outlives its deadline counts as
//! failed the next time either command touches it.

use crate::{
    command::{embed, GROUP_TASKS},
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    error::BotError,
    registry::{Command, ComponentHandler, Invocation, SlashCommand},
    respond::{update_component_message, Respond},
    storage::{ChannelSlot, RoleSlot, TaskStatus, UserTask},
};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::all::{
    ButtonStyle, ComponentInteraction, CreateActionRow, CreateButton,
    CreateInteractionResponseMessage, CreateMessage, GuildId, Member, Mentionable, RoleId, UserId,
};
use std::path::PathBuf;

/// Hours a member has to finish a task
pub const TASK_HOURS: i64 = 24;

/// Hands out tasks read from a text file, one per line
pub struct Task {
    path: PathBuf,
}

impl Task {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

pub struct Complete;

/// Task lines of a tasks file: blank lines and `#` comments are skipped.
fn parse_tasks(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

fn status_for(payload: &str) -> Result<TaskStatus> {
    match payload {
        "yes" => Ok(TaskStatus::Completed),
        "no" => Ok(TaskStatus::Failed),
        "safeword" => Ok(TaskStatus::Safeword),
        _ => Err(BotError::Protocol(format!("complete_{}", payload)).into()),
    }
}

fn outcome_line(task: &UserTask) -> String {
    let verdict = match task.status {
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Safeword => "used the safeword on",
        TaskStatus::Pending => "is still working on",
    };
    format!("{} {} their task: {}", task.user_id.mention(), verdict, task.text)
}

fn holds(member: Option<&Member>, role: Option<RoleId>) -> bool {
    match (member, role) {
        (Some(member), Some(role)) => member.roles.contains(&role),
        _ => false,
    }
}

async fn configured_role(ctx: &Context<'_>, guild_id: GuildId, slot: RoleSlot) -> Option<RoleId> {
    ctx.storage.get_role(guild_id, slot).await.ok()
}

/// Settle a task: clear it, fix up roles and report the outcome.  Role and report failures are
/// logged; the task is gone either way.
async fn finish(ctx: &Context<'_>, guild_id: GuildId, mut task: UserTask, status: TaskStatus) -> Result<String> {
    task.status = status;
    ctx.storage.clear_user_task(guild_id, task.user_id).await?;

    if let Some(role) = configured_role(ctx, guild_id, RoleSlot::Assigned).await {
        if let Err(e) = ctx
            .http
            .remove_member_role(guild_id, task.user_id, role, Some("task settled"))
            .await
        {
            crate::log_warn!("Could not remove the assigned role from {}: {}", task.user_id, e);
        }
    }
    if status == TaskStatus::Failed {
        if let Some(role) = configured_role(ctx, guild_id, RoleSlot::Victim).await {
            if let Err(e) = ctx
                .http
                .add_member_role(guild_id, task.user_id, role, Some("task failed"))
                .await
            {
                crate::log_warn!("Could not grant the victim role to {}: {}", task.user_id, e);
            }
        }
    }

    let line = outcome_line(&task);
    if let Ok(channel_id) = ctx.storage.get_channel(guild_id, ChannelSlot::Tasks).await {
        if let Err(e) = channel_id
            .send_message(ctx.cache_http, CreateMessage::new().content(&line))
            .await
        {
            crate::log_warn!("Could not post task outcome to {}: {}", channel_id, e);
        }
    }
    Ok(line)
}

/// The member's pending task, settling it as failed when its deadline has passed.
async fn pending_task(
    ctx: &Context<'_>,
    guild_id: GuildId,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Option<UserTask>> {
    let Some(task) = ctx.storage.get_user_task(guild_id, user_id).await else {
        return Ok(None);
    };
    if task.status != TaskStatus::Pending {
        ctx.storage.clear_user_task(guild_id, user_id).await?;
        return Ok(None);
    }
    if task.is_expired(now) {
        finish(ctx, guild_id, task, TaskStatus::Failed).await?;
        return Ok(None);
    }
    Ok(Some(task))
}

#[serenity::async_trait]
impl Command for Task {
    fn name(&self) -> &str {
        "task"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let caller = inv.user().id;
        let member = inv.interaction().member.as_deref();

        if let Some(tasker) = configured_role(ctx, guild_id, RoleSlot::Tasker).await {
            if !holds(member, Some(tasker)) {
                return Err(BotError::PermissionDenied(format!(
                    "You need the <@&{}> role to take tasks.",
                    tasker
                ))
                .into());
            }
        }

        let target = inv.options().user("member").unwrap_or(caller);
        if target != caller {
            let punisher = configured_role(ctx, guild_id, RoleSlot::Punisher).await;
            if !holds(member, punisher) {
                return Err(BotError::PermissionDenied(
                    "Only punishers can hand tasks to other members.".to_owned(),
                )
                .into());
            }
        }

        let now = Utc::now();
        if pending_task(ctx, guild_id, target, now).await?.is_some() {
            return Err(BotError::InvalidInput(format!(
                "{} already has a pending task. Finish it with `/complete` first.",
                target.mention()
            ))
            .into());
        }

        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading tasks from `{}`", self.path.display()))?;
        let tasks = parse_tasks(&text);
        let chosen = tasks
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| BotError::InvalidInput("There are no tasks to hand out.".to_owned()))?;

        let task = UserTask {
            user_id: target,
            text: chosen.clone(),
            assigned_at: now,
            expires_at: now + chrono::Duration::hours(TASK_HOURS),
            status: TaskStatus::Pending,
        };
        ctx.storage.set_user_task(guild_id, task.clone()).await?;

        if let Some(role) = configured_role(ctx, guild_id, RoleSlot::Assigned).await {
            ctx.http
                .add_member_role(guild_id, target, role, Some("task assigned"))
                .await?;
        }

        let description = format!(
            "{}, your task:\n**{}**\n\nDue <t:{}:R>. Report back with `/complete`.",
            target.mention(),
            task.text,
            task.expires_at.timestamp()
        );
        inv.interaction()
            .reply_embed(ctx.http, embed("New task", description), false)
            .await
    }
}

impl SlashCommand for Task {
    fn definition(&self) -> CommandDef {
        CommandDef::new("task", "Get a random task")
            .category(Category::Tasks)
            .group(GROUP_TASKS)
            .option(OptionSpec::user("member", "Give the task to someone else (punishers only)"))
    }
}

fn buttons() -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new("complete_yes")
            .label("Done")
            .style(ButtonStyle::Success),
        CreateButton::new("complete_no")
            .label("Failed")
            .style(ButtonStyle::Danger),
        CreateButton::new("complete_safeword")
            .label("Safeword")
            .style(ButtonStyle::Secondary),
    ])
}

#[serenity::async_trait]
impl Command for Complete {
    fn name(&self) -> &str {
        "complete"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_component(&self) -> Option<&dyn ComponentHandler> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let Some(task) = pending_task(ctx, guild_id, inv.user().id, Utc::now()).await? else {
            return inv
                .interaction()
                .reply_ephemeral(ctx.http, "You have no pending task.")
                .await;
        };

        inv.interaction()
            .respond(
                ctx.http,
                CreateInteractionResponseMessage::new()
                    .embed(embed("How did it go?", task.text))
                    .components(vec![buttons()])
                    .ephemeral(true),
            )
            .await
    }
}

#[serenity::async_trait]
impl ComponentHandler for Complete {
    async fn component(
        &self,
        ctx: &Context<'_>,
        interaction: &ComponentInteraction,
        payload: &str,
    ) -> Result<()> {
        let status = status_for(payload)?;
        let guild_id = interaction
            .guild_id
            .ok_or_else(|| BotError::Protocol("task button outside a server".to_owned()))?;

        let now = Utc::now();
        let Some(task) = ctx.storage.get_user_task(guild_id, interaction.user.id).await else {
            return interaction
                .reply_ephemeral(ctx.http, "You have no pending task.")
                .await;
        };
        let status = if task.is_expired(now) {
            TaskStatus::Failed
        } else {
            status
        };

        let line = finish(ctx, guild_id, task, status).await?;
        update_component_message(
            interaction,
            ctx.http,
            CreateInteractionResponseMessage::new()
                .embed(embed("Task settled", line))
                .components(Vec::new()),
        )
        .await
    }
}

impl SlashCommand for Complete {
    fn definition(&self) -> CommandDef {
        CommandDef::new("complete", "Report on your pending task")
            .category(Category::Tasks)
            .group(GROUP_TASKS)
    }
}
