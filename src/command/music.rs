use crate::{
    command::{embed, voice_channel_of, GROUP_MUSIC},
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    error::BotError,
    registry::{Command, Invocation, Options, SlashCommand},
    respond::{follow_up_text, Respond},
    voice::{
        player::Player,
        source::{self, TrackInfo, PARSERS},
    },
};
use anyhow::Result;
use serenity::all::{ChannelId, CreateMessage, GuildId, Http};
use std::{
    collections::HashMap,
    fmt::Write,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task::JoinHandle;

/// Tracks listed by `/music queue` before the rest is summarized
const QUEUE_SHOWN: usize = 10;
const HISTORY_SHOWN: usize = 3;

/// Voice playback, one player per guild
#[derive(Default)]
pub struct Music {
    /// Per guild, the text channel player statuses are posted to and the task posting them
    forwarders: Mutex<HashMap<GuildId, (ChannelId, JoinHandle<()>)>>,
}

impl Music {
    /// Post the player's statuses to `channel_id`, replacing a forwarder aimed elsewhere.
    fn forward_statuses(&self, http: Arc<Http>, guild_id: GuildId, channel_id: ChannelId, player: &Player) {
        let mut forwarders = self
            .forwarders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((current, task)) = forwarders.get(&guild_id) {
            if *current == channel_id && !task.is_finished() {
                return;
            }
            task.abort();
        }

        let mut statuses = player.status().subscribe();
        let task = tokio::spawn(async move {
            while let Some(status) = statuses.recv().await {
                let message = CreateMessage::new().content(status.to_string());
                if let Err(e) = channel_id.send_message(&*http, message).await {
                    crate::log_warn!("Could not post player status to {}: {}", channel_id, e);
                }
            }
        });
        forwarders.insert(guild_id, (channel_id, task));
    }

    fn stop_forwarding(&self, guild_id: GuildId) {
        let removed = self
            .forwarders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&guild_id);
        if let Some((_, task)) = removed {
            task.abort();
        }
    }

    async fn play(&self, ctx: &Context<'_>, inv: &Invocation<'_>, options: &Options) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let voice_channel = voice_channel_of(ctx.cache, guild_id, inv.user().id)
            .ok_or_else(|| BotError::InvalidInput("Join a voice channel first.".to_owned()))?;
        let input = options.require_str("input")?;

        Respond::defer(inv.interaction(), ctx.http, false).await?;

        let player = ctx.voice.player(guild_id);
        self.forward_statuses(ctx.http.clone(), guild_id, inv.channel_id(), &player);
        let tracks = player
            .enqueue(input, options.str("source"), options.str("parser"))
            .await?;

        let idle = player.current_track().await.is_none();
        let reply = if idle {
            match player.play_next(voice_channel).await? {
                Some(track) => format!("Starting **{}**.", track.title),
                None => "Nothing to play.".to_owned(),
            }
        } else {
            match tracks.as_slice() {
                [track] => format!("Queued **{}**.", track.title),
                tracks => format!("Queued {} tracks.", tracks.len()),
            }
        };
        follow_up_text(inv.interaction(), ctx.http, reply, false).await
    }

    async fn next(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let player = ctx.voice.existing(guild_id).ok_or_else(nothing_playing)?;
        let voice_channel = match player.voice_channel().await {
            Some(channel) => channel,
            None => voice_channel_of(ctx.cache, guild_id, inv.user().id)
                .ok_or_else(|| BotError::InvalidInput("Join a voice channel first.".to_owned()))?,
        };

        Respond::defer(inv.interaction(), ctx.http, false).await?;
        let reply = match player.play_next(voice_channel).await? {
            Some(track) => format!("Skipped. Up next: **{}**.", track.title),
            None => "Skipped. The queue is empty.".to_owned(),
        };
        follow_up_text(inv.interaction(), ctx.http, reply, false).await
    }

    async fn stop(&self, ctx: &Context<'_>, inv: &Invocation<'_>, options: &Options) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let exit = options.bool("exit").unwrap_or(false);
        ctx.voice.stop(guild_id, exit).await?;
        if exit {
            self.stop_forwarding(guild_id);
        }

        let reply = if exit {
            "Stopped and left the channel."
        } else {
            "Stopped and cleared the queue."
        };
        inv.interaction().reply(ctx.http, reply).await
    }

    async fn queue(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let guild_id = inv.require_guild()?;
        let Some(player) = ctx.voice.existing(guild_id) else {
            return inv.interaction().reply_ephemeral(ctx.http, "Nothing is queued.").await;
        };
        let current = player.current_track().await;
        let queue = player.queue().await;
        let history = player.history().await;
        inv.interaction()
            .reply_embed(
                ctx.http,
                embed("Queue", render_queue(current.as_ref(), &queue, &history)),
                true,
            )
            .await
    }
}

fn nothing_playing() -> BotError {
    BotError::InvalidInput("Nothing is playing.".to_owned())
}

fn clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
    } else {
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

fn track_line(track: &TrackInfo) -> String {
    match track.duration {
        Some(duration) => format!("{} ({})", track.title, clock(duration)),
        None => track.title.clone(),
    }
}

fn render_queue(current: Option<&TrackInfo>, queue: &[TrackInfo], history: &[TrackInfo]) -> String {
    let mut out = String::new();
    if !history.is_empty() {
        out.push_str("Recently played:\n");
        for track in history.iter().rev().take(HISTORY_SHOWN) {
            let _ = writeln!(out, "- {}", track_line(track));
        }
        out.push('\n');
    }
    match current {
        Some(track) => {
            let _ = writeln!(out, "Now: **{}**", track_line(track));
        }
        None => out.push_str("Nothing is playing.\n"),
    }
    if queue.is_empty() {
        out.push_str("The queue is empty.");
        return out;
    }

    out.push('\n');
    for (i, track) in queue.iter().take(QUEUE_SHOWN).enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, track_line(track));
    }
    if queue.len() > QUEUE_SHOWN {
        let _ = write!(out, "…and {} more", queue.len() - QUEUE_SHOWN);
    }
    out.trim_end().to_owned()
}

#[serenity::async_trait]
impl Command for Music {
    fn name(&self) -> &str {
        "music"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let (sub, options) = inv
            .options()
            .sub_command()
            .ok_or_else(|| BotError::Protocol("music without a subcommand".to_owned()))?;

        match sub {
            "play" => self.play(ctx, inv, options).await,
            "next" => self.next(ctx, inv).await,
            "stop" => self.stop(ctx, inv, options).await,
            "pause" => {
                let guild_id = inv.require_guild()?;
                let player = ctx.voice.existing(guild_id).ok_or_else(nothing_playing)?;
                player.pause().await?;
                inv.interaction().reply(ctx.http, "Paused.").await
            }
            "resume" => {
                let guild_id = inv.require_guild()?;
                let player = ctx
                    .voice
                    .existing(guild_id)
                    .ok_or_else(|| BotError::InvalidInput("Nothing is paused.".to_owned()))?;
                player.resume().await?;
                inv.interaction().reply(ctx.http, "Resumed.").await
            }
            "queue" => self.queue(ctx, inv).await,
            other => Err(BotError::Protocol(format!("music {}", other)).into()),
        }
    }
}

impl SlashCommand for Music {
    fn definition(&self) -> CommandDef {
        let mut source = OptionSpec::string("source", "Where to look");
        for name in source::source_names() {
            source = source.choice(name, name);
        }
        let mut parser = OptionSpec::string("parser", "How to fetch the audio");
        for name in PARSERS {
            parser = parser.choice(name, name);
        }

        CommandDef::new("music", "Play audio in your voice channel")
            .category(Category::Music)
            .group(GROUP_MUSIC)
            .option(
                OptionSpec::sub_command("play", "Queue a URL or search result")
                    .option(OptionSpec::string("input", "URL or search text").required())
                    .option(source)
                    .option(parser),
            )
            .option(OptionSpec::sub_command("next", "Skip to the next track"))
            .option(
                OptionSpec::sub_command("stop", "Stop playing and clear the queue")
                    .option(OptionSpec::boolean("exit", "Also leave the voice channel")),
            )
            .option(OptionSpec::sub_command("pause", "Pause the current track"))
            .option(OptionSpec::sub_command("resume", "Resume the paused track"))
            .option(OptionSpec::sub_command("queue", "Show what is queued"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, secs: Option<u64>) -> TrackInfo {
        TrackInfo {
            url: format!("https://example.com/{}", title),
            title: title.to_owned(),
            duration: secs.map(Duration::from_secs),
            source_name: "radio",
            parsers: vec![source::FFMPEG_LINK.to_owned()],
        }
    }

    #[test]
    fn clock_formats() {
        assert_eq!(clock(Duration::from_secs(65)), "1:05");
        assert_eq!(clock(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn empty_queue() {
        assert_eq!(
            render_queue(None, &[], &[]),
            "Nothing is playing.\nThe queue is empty."
        );
    }

    #[test]
    fn long_queue_is_summarized() {
        let queue: Vec<TrackInfo> = (0..12).map(|i| track(&format!("t{}", i), None)).collect();
        let current = track("now", Some(200));
        let text = render_queue(Some(&current), &queue, &[]);
        assert!(text.starts_with("Now: **now (3:20)**"));
        assert!(text.contains("1. t0"));
        assert!(text.contains("10. t9"));
        assert!(!text.contains("t10"));
        assert!(text.ends_with("…and 2 more"));
    }

    #[test]
    fn recent_tracks_come_first_newest_on_top() {
        let history: Vec<TrackInfo> = (0..5).map(|i| track(&format!("old{}", i), None)).collect();
        let text = render_queue(None, &[], &history);
        assert!(text.starts_with("Recently played:\n- old4\n- old3\n- old2\n\nNothing is playing."));
        assert!(!text.contains("old1"));
    }

    #[test]
    fn definition_offers_every_subcommand() {
        let def = Music::default().definition();
        let subs: Vec<&str> = def.options.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(subs, vec!["play", "next", "stop", "pause", "resume", "queue"]);
    }
}
