//! Per-guild music player
//!
//! Public operations are serialized by `ops`.  Playback runs in its own task that walks the
//! queue; anything that interrupts it (stop, pause, skipping) cancels the task and waits for it
//! to finish before touching the player's state.

use super::{
    frames::{self, PumpEnd},
    recovery::RecoveryStream,
    source::{self, TrackInfo},
    status::{Status, StatusChannel},
    streamer::{PcmStream, StreamerRegistry},
    transport::VoiceGateway,
};
use crate::error::BotError;
use anyhow::Result;
use serenity::all::{ChannelId, GuildId};
use std::{collections::VecDeque, mem, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Tracks kept in the history
const HISTORY_LEN: usize = 50;

struct Playback {
    stop: CancellationToken,
    /// Resolves to the position reached in the current track
    done: JoinHandle<Duration>,
}

#[derive(Default)]
struct PlayerState {
    queue: VecDeque<TrackInfo>,
    history: VecDeque<TrackInfo>,
    current: Option<TrackInfo>,
    /// Where the current track picks up when playback starts
    resume_at: Duration,
    paused: bool,
    voice_channel: Option<ChannelId>,
    playback: Option<Playback>,
    /// Bumped whenever playback is taken over, so a finished task can tell it is stale
    generation: u64,
}

impl PlayerState {
    fn retire_current(&mut self) {
        if let Some(track) = self.current.take() {
            self.history.push_back(track);
            while self.history.len() > HISTORY_LEN {
                self.history.pop_front();
            }
        }
        self.resume_at = Duration::ZERO;
    }
}

struct Outcome {
    end: PumpEnd,
    position: Duration,
    exhausted: bool,
}

pub struct Player {
    guild_id: GuildId,
    gateway: Arc<dyn VoiceGateway>,
    streamers: Arc<StreamerRegistry>,
    status: StatusChannel,
    ops: Mutex<()>,
    state: Mutex<PlayerState>,
}

impl Player {
    pub fn new(
        guild_id: GuildId,
        gateway: Arc<dyn VoiceGateway>,
        streamers: Arc<StreamerRegistry>,
    ) -> Self {
        Self {
            guild_id,
            gateway,
            streamers,
            status: StatusChannel::new(),
            ops: Mutex::new(()),
            state: Mutex::new(PlayerState::default()),
        }
    }

    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    /// Resolve `input` and append the result to the queue.
    pub async fn enqueue(
        &self,
        input: &str,
        source: Option<&str>,
        parser: Option<&str>,
    ) -> Result<Vec<TrackInfo>> {
        let mut tracks = source::resolve(input, source, parser)?;
        for track in &mut tracks {
            source::describe(track).await;
        }
        self.enqueue_tracks(tracks.clone()).await;
        Ok(tracks)
    }

    pub async fn enqueue_tracks(&self, tracks: Vec<TrackInfo>) {
        let _op = self.ops.lock().await;
        let mut state = self.state.lock().await;
        for track in tracks {
            self.status.publish(Status::Added(track.title.clone()));
            state.queue.push_back(track);
        }
    }

    /// Skip whatever is playing and start the next queued track in `voice_channel`.  Returns the
    /// track that starts, or `None` when the queue is empty.
    pub async fn play_next(self: &Arc<Self>, voice_channel: ChannelId) -> Result<Option<TrackInfo>> {
        let _op = self.ops.lock().await;

        let joined = self.state.lock().await.voice_channel;
        if joined != Some(voice_channel) {
            self.gateway.connect(self.guild_id, voice_channel).await?;
            self.state.lock().await.voice_channel = Some(voice_channel);
        }

        self.halt().await;
        let mut state = self.state.lock().await;
        state.retire_current();
        state.paused = false;
        let Some(next) = state.queue.front().cloned() else {
            return Ok(None);
        };
        self.start(&mut state);
        Ok(Some(next))
    }

    /// End playback and clear the queue; with `exit`, leave the voice channel too.
    pub async fn stop(&self, exit: bool) -> Result<()> {
        let _op = self.ops.lock().await;
        self.halt().await;

        {
            let mut state = self.state.lock().await;
            state.retire_current();
            state.queue.clear();
            state.paused = false;
        }
        if exit {
            self.gateway.leave(self.guild_id).await?;
            self.state.lock().await.voice_channel = None;
        }
        self.status.publish(Status::Stopped);
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        let _op = self.ops.lock().await;
        if !self.is_playing_locked().await {
            return Err(BotError::InvalidInput("Nothing is playing.".to_owned()).into());
        }

        let position = self.halt().await.unwrap_or_default();
        let mut state = self.state.lock().await;
        state.resume_at = position;
        state.paused = true;
        self.status.publish(Status::Paused);
        Ok(())
    }

    /// Restart the paused track from where it stopped.
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        let _op = self.ops.lock().await;
        let mut state = self.state.lock().await;
        if !state.paused || state.current.is_none() {
            return Err(BotError::InvalidInput("Nothing is paused.".to_owned()).into());
        }
        state.paused = false;
        self.start(&mut state);
        self.status.publish(Status::Resumed);
        Ok(())
    }

    pub async fn queue(&self) -> Vec<TrackInfo> {
        self.state.lock().await.queue.iter().cloned().collect()
    }

    pub async fn history(&self) -> Vec<TrackInfo> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    pub async fn is_playing(&self) -> bool {
        let _op = self.ops.lock().await;
        self.is_playing_locked().await
    }

    async fn is_playing_locked(&self) -> bool {
        let state = self.state.lock().await;
        state.playback.is_some() && !state.paused
    }

    pub async fn current_track(&self) -> Option<TrackInfo> {
        self.state.lock().await.current.clone()
    }

    pub async fn voice_channel(&self) -> Option<ChannelId> {
        self.state.lock().await.voice_channel
    }

    /// Launch the playback task.  The caller holds `ops`.
    fn start(self: &Arc<Self>, state: &mut PlayerState) {
        state.generation += 1;
        let stop = CancellationToken::new();
        let done = tokio::spawn(self.clone().playback(stop.clone(), state.generation));
        state.playback = Some(Playback { stop, done });
    }

    /// Cancel the playback task and wait for it.  Returns the position it reached.
    async fn halt(&self) -> Option<Duration> {
        let playback = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.playback.take()
        }?;
        playback.stop.cancel();
        match playback.done.await {
            Ok(position) => Some(position),
            Err(e) => {
                crate::log_error!("Playback task in {} failed: {}", self.guild_id, e);
                None
            }
        }
    }

    /// Play the current track (if resuming) and then the queue, until it runs dry or `stop`
    /// fires.
    async fn playback(self: Arc<Self>, stop: CancellationToken, generation: u64) -> Duration {
        loop {
            let (track, start) = {
                let mut state = self.state.lock().await;
                if state.generation != generation || stop.is_cancelled() {
                    return state.resume_at;
                }
                if state.current.is_none() {
                    match state.queue.pop_front() {
                        Some(track) => state.current = Some(track),
                        None => {
                            state.playback = None;
                            return Duration::ZERO;
                        }
                    }
                }
                let start = mem::take(&mut state.resume_at);
                match state.current.clone() {
                    Some(track) => (track, start),
                    None => return Duration::ZERO,
                }
            };

            self.status.publish(Status::Playing(track.title.clone()));
            crate::log_internal!("Playing {} in {}", track.url, self.guild_id);

            let position = match self.play_track(&track, start, &stop).await {
                Ok(outcome) if outcome.end == PumpEnd::Stopped => return outcome.position,
                Ok(outcome) if outcome.exhausted => {
                    self.status.publish(Status::Error(format!(
                        "lost the stream for **{}**",
                        track.title
                    )));
                    outcome.position
                }
                Ok(outcome) => outcome.position,
                Err(e) => {
                    crate::log_warn!("Could not play {}: {:#}", track.url, e);
                    self.status.publish(Status::Error(format!(
                        "could not play **{}**",
                        track.title
                    )));
                    start
                }
            };
            if stop.is_cancelled() {
                return position;
            }

            let mut state = self.state.lock().await;
            if state.generation != generation {
                return position;
            }
            state.retire_current();
        }
    }

    async fn play_track(
        &self,
        track: &TrackInfo,
        start: Duration,
        stop: &CancellationToken,
    ) -> Result<Outcome> {
        let mut stream = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                return Ok(Outcome { end: PumpEnd::Stopped, position: start, exhausted: false });
            }
            stream = RecoveryStream::open_at(self.streamers.clone(), track, start) => stream?,
        };
        let mut encoder = self.gateway.encoder()?;
        let mut sink = self.gateway.open_sink(self.guild_id).await?;

        let end = frames::pump(&mut stream, encoder.as_mut(), sink.as_mut(), stop).await;
        let position = stream.position();
        let exhausted = stream.exhausted();
        stream.close().await;
        Ok(Outcome {
            end: end?,
            position,
            exhausted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{
        frames::{BYTES_PER_SECOND, FRAME_BYTES},
        source::YTDLP_PIPE,
        streamer::{tests::FakeStream, Mode, Streamer},
        transport::tests::FakeGateway,
    };
    use std::sync::{atomic::Ordering, Mutex as StdMutex};

    const GUILD: GuildId = GuildId::new(1);
    const VOICE: ChannelId = ChannelId::new(2);

    struct Silence {
        audio: Duration,
        seeks: StdMutex<Vec<Duration>>,
    }

    #[serenity::async_trait]
    impl Streamer for Silence {
        fn supports_pipe(&self) -> bool {
            false
        }

        async fn open_link(&self, _url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
            self.seeks.lock().unwrap().push(seek);
            let remaining = self.audio.saturating_sub(seek);
            let bytes = (remaining.as_secs_f64() * BYTES_PER_SECOND as f64) as usize;
            Ok(Box::new(FakeStream::bytes(bytes, FRAME_BYTES)))
        }

        async fn open_pipe(&self, _url: &str, _seek: Duration) -> Result<Box<dyn PcmStream>> {
            unreachable!()
        }
    }

    fn setup(audio: Duration) -> (Arc<Player>, Arc<FakeGateway>, Arc<Silence>) {
        let silence = Arc::new(Silence {
            audio,
            seeks: StdMutex::new(Vec::new()),
        });
        let mut streamers = StreamerRegistry::new();
        streamers.register(YTDLP_PIPE, silence.clone(), Mode::Link);
        let gateway = Arc::new(FakeGateway::default());
        let player = Arc::new(Player::new(GUILD, gateway.clone(), Arc::new(streamers)));
        (player, gateway, silence)
    }

    fn track(name: &str, duration: Duration) -> TrackInfo {
        TrackInfo {
            url: format!("https://youtu.be/{}", name),
            title: name.to_owned(),
            duration: Some(duration),
            source_name: "youtube",
            parsers: vec![YTDLP_PIPE.to_owned()],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plays_through_the_queue() {
        let (player, gateway, _) = setup(Duration::from_secs(1));
        let mut status = player.status().subscribe();
        player
            .enqueue_tracks(vec![
                track("a", Duration::from_secs(1)),
                track("b", Duration::from_secs(1)),
            ])
            .await;

        let first = player.play_next(VOICE).await.unwrap().unwrap();
        assert_eq!(first.title, "a");
        assert!(player.is_playing().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!player.is_playing().await);
        let played: Vec<_> = player.history().await.into_iter().map(|t| t.title).collect();
        assert_eq!(played, vec!["a", "b"]);
        // 50 frames per second of audio
        assert_eq!(gateway.frames.load(Ordering::SeqCst), 100);
        // Finishing the queue keeps the connection
        assert_eq!(player.voice_channel().await, Some(VOICE));

        let mut seen = Vec::new();
        while let Ok(s) = status.try_recv() {
            seen.push(s);
        }
        assert!(seen.contains(&Status::Playing("a".to_owned())));
        assert!(seen.contains(&Status::Playing("b".to_owned())));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_exit_leaves_nothing_behind() {
        let (player, gateway, _) = setup(Duration::from_secs(60));
        player
            .enqueue_tracks(vec![
                track("a", Duration::from_secs(60)),
                track("b", Duration::from_secs(60)),
            ])
            .await;
        player.play_next(VOICE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(player.is_playing().await);

        player.stop(true).await.unwrap();

        assert!(!player.is_playing().await);
        assert!(player.queue().await.is_empty());
        assert!(player.current_track().await.is_none());
        assert!(player.voice_channel().await.is_none());
        assert!(gateway.connected.lock().unwrap().is_none());

        // Nothing keeps sending after stop returns
        let sent = gateway.frames.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.frames.load(Ordering::SeqCst), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn next_skips_the_current_track() {
        let (player, _, _) = setup(Duration::from_secs(60));
        player
            .enqueue_tracks(vec![
                track("a", Duration::from_secs(60)),
                track("b", Duration::from_secs(60)),
            ])
            .await;
        player.play_next(VOICE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let next = player.play_next(VOICE).await.unwrap().unwrap();
        assert_eq!(next.title, "b");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(player.current_track().await.unwrap().title, "b");
        assert_eq!(player.history().await[0].title, "a");
        assert!(player.queue().await.is_empty());

        player.stop(false).await.unwrap();
        assert_eq!(player.voice_channel().await, Some(VOICE));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_continues_from_pause_position() {
        let (player, _, silence) = setup(Duration::from_secs(60));
        let mut status = player.status().subscribe();
        player
            .enqueue_tracks(vec![track("a", Duration::from_secs(60))])
            .await;
        player.play_next(VOICE).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        player.pause().await.unwrap();
        assert!(!player.is_playing().await);
        assert_eq!(player.current_track().await.unwrap().title, "a");
        assert!(player.pause().await.is_err());

        player.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(player.is_playing().await);

        let seeks = silence.seeks.lock().unwrap().clone();
        assert_eq!(seeks.len(), 2);
        assert_eq!(seeks[0], Duration::ZERO);
        assert!(seeks[1] > Duration::from_millis(1500) && seeks[1] < Duration::from_millis(2500));

        let mut seen = Vec::new();
        while let Ok(s) = status.try_recv() {
            seen.push(s);
        }
        assert!(seen.contains(&Status::Paused));
        assert!(seen.contains(&Status::Resumed));
        player.stop(true).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_duration_finishes_without_error() {
        let (player, _, silence) = setup(Duration::from_secs(1));
        let mut status = player.status().subscribe();
        let mut a = track("a", Duration::from_secs(1));
        a.duration = None;
        player.enqueue_tracks(vec![a]).await;
        player.play_next(VOICE).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!player.is_playing().await);
        assert_eq!(player.history().await[0].title, "a");

        // One reopen finds nothing left, and that is the end
        let seeks = silence.seeks.lock().unwrap().clone();
        assert_eq!(seeks, vec![Duration::ZERO, Duration::from_secs(1)]);

        let mut seen = Vec::new();
        while let Ok(s) = status.try_recv() {
            seen.push(s);
        }
        assert!(!seen.iter().any(|s| matches!(s, Status::Error(_))), "{:?}", seen);
    }

    #[tokio::test]
    async fn resume_without_pause_is_rejected() {
        let (player, _, _) = setup(Duration::from_secs(1));
        assert!(player.resume().await.is_err());
        assert!(player.pause().await.is_err());
        assert_eq!(player.play_next(VOICE).await.unwrap(), None);
    }
}
