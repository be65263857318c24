//! A PCM stream that survives its source dying early
//!
//! Downloaders and CDNs drop connections mid-track.  When that happens the stream is reopened at
//! the position reached so far: up to `MAX_RETRIES` times with the same parser, then with each
//! remaining parser of the track in turn.  Without a known duration, a reopened stream that ends
//! before producing anything means the track really is over.

use super::{
    frames::BYTES_PER_SECOND,
    source::TrackInfo,
    streamer::{PcmStream, StreamerRegistry},
};
use anyhow::{anyhow, Result};
use std::{sync::Arc, time::Duration};

/// Reopenings allowed per parser after its first open
pub const MAX_RETRIES: u32 = 3;
/// An end of stream this close to the known duration is the real end.
const END_SLACK: Duration = Duration::from_secs(2);

pub struct RecoveryStream {
    streamers: Arc<StreamerRegistry>,
    url: String,
    duration: Option<Duration>,
    parsers: Vec<String>,
    parser: usize,
    retries: u32,
    bytes: u64,
    /// Reopened after a cut-off and nothing read since
    resumed: bool,
    current: Option<Box<dyn PcmStream>>,
    exhausted: bool,
}

impl RecoveryStream {
    pub async fn open(streamers: Arc<StreamerRegistry>, track: &TrackInfo) -> Result<Self> {
        Self::open_at(streamers, track, Duration::ZERO).await
    }

    /// Open `track` with playback starting at `start`.
    pub async fn open_at(
        streamers: Arc<StreamerRegistry>,
        track: &TrackInfo,
        start: Duration,
    ) -> Result<Self> {
        if track.parsers.is_empty() {
            return Err(anyhow!("track {} has no parsers", track.url));
        }
        let mut stream = Self {
            streamers,
            url: track.url.clone(),
            duration: track.duration,
            parsers: track.parsers.clone(),
            parser: 0,
            retries: 0,
            bytes: (start.as_secs_f64() * BYTES_PER_SECOND as f64) as u64,
            resumed: false,
            current: None,
            exhausted: false,
        };
        if !stream.reopen().await {
            return Err(anyhow!("no parser could open {}", track.url));
        }
        Ok(stream)
    }

    /// Approximate playback position from the bytes read so far
    pub fn position(&self) -> Duration {
        Duration::from_secs_f64(self.bytes as f64 / BYTES_PER_SECOND as f64)
    }

    /// Every parser gave up
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    fn premature(&self) -> bool {
        match self.duration {
            Some(duration) => self.position() + END_SLACK < duration,
            None => !self.resumed,
        }
    }

    /// Step to the next attempt: same parser while retries remain, else the next parser.
    fn advance(&mut self) -> bool {
        if self.retries < MAX_RETRIES {
            self.retries += 1;
        } else {
            self.parser += 1;
            self.retries = 0;
        }
        if self.parser >= self.parsers.len() {
            self.exhausted = true;
        }
        !self.exhausted
    }

    /// Open the current attempt, advancing past attempts that fail to open.
    async fn reopen(&mut self) -> bool {
        loop {
            let parser = &self.parsers[self.parser];
            let seek = self.position();
            match self.streamers.open(parser, &self.url, seek).await {
                Ok(stream) => {
                    if self.bytes > 0 || self.parser > 0 {
                        crate::log_internal!(
                            "Resumed {} with {} at {:.1}s",
                            self.url,
                            parser,
                            seek.as_secs_f64()
                        );
                    }
                    self.current = Some(stream);
                    return true;
                }
                Err(e) => {
                    crate::log_warn!("Could not open {} with {}: {:#}", self.url, parser, e);
                    if !self.advance() {
                        return false;
                    }
                }
            }
        }
    }
}

#[serenity::async_trait]
impl PcmStream for RecoveryStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let Some(stream) = self.current.as_mut() else {
                return Ok(0);
            };

            match stream.read(buf).await {
                Ok(0) if !self.premature() => return Ok(0),
                Ok(0) => {
                    crate::log_warn!(
                        "{} ended early at {:.1}s",
                        self.url,
                        self.position().as_secs_f64()
                    );
                }
                Ok(n) => {
                    self.resumed = false;
                    self.bytes += n as u64;
                    return Ok(n);
                }
                Err(e) => crate::log_warn!("Reading {} failed: {:#}", self.url, e),
            }

            if let Some(mut dead) = self.current.take() {
                dead.close().await;
            }
            if !self.advance() || !self.reopen().await {
                return Ok(0);
            }
            self.resumed = true;
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.current.take() {
            stream.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{
        frames::FRAME_BYTES,
        streamer::{tests::FakeStream, Mode, Streamer},
    };
    use std::sync::Mutex;

    /// Serves `audio` worth of silence per open and records every seek it was asked for.
    struct Scripted {
        audio: Duration,
        /// Serve `audio` minus the seek, instead of `audio` on every open
        tail_only: bool,
        fail_open: bool,
        seeks: Mutex<Vec<Duration>>,
    }

    impl Scripted {
        fn new(audio: Duration) -> Arc<Self> {
            Arc::new(Self {
                audio,
                tail_only: false,
                fail_open: false,
                seeks: Mutex::new(Vec::new()),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                audio: Duration::ZERO,
                tail_only: false,
                fail_open: true,
                seeks: Mutex::new(Vec::new()),
            })
        }

        fn tail_only(self: Arc<Self>) -> Arc<Self> {
            Arc::new(Self {
                audio: self.audio,
                tail_only: true,
                fail_open: self.fail_open,
                seeks: Mutex::new(Vec::new()),
            })
        }

        fn seek_secs(&self) -> Vec<u64> {
            self.seeks
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.as_secs_f64().round() as u64)
                .collect()
        }
    }

    #[serenity::async_trait]
    impl Streamer for Scripted {
        fn supports_pipe(&self) -> bool {
            false
        }

        async fn open_link(&self, _url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
            self.seeks.lock().unwrap().push(seek);
            if self.fail_open {
                return Err(anyhow!("403"));
            }
            let audio = if self.tail_only {
                self.audio.saturating_sub(seek)
            } else {
                self.audio
            };
            let bytes = (audio.as_secs_f64() * BYTES_PER_SECOND as f64) as usize;
            Ok(Box::new(FakeStream::bytes(bytes, FRAME_BYTES)))
        }

        async fn open_pipe(&self, _url: &str, _seek: Duration) -> Result<Box<dyn PcmStream>> {
            unreachable!()
        }
    }

    fn setup(a: Arc<Scripted>, b: Arc<Scripted>) -> Arc<StreamerRegistry> {
        let mut registry = StreamerRegistry::new();
        registry.register("A", a, Mode::Link);
        registry.register("B", b, Mode::Link);
        Arc::new(registry)
    }

    fn track(duration: Option<Duration>) -> TrackInfo {
        TrackInfo {
            url: "https://cdn/track".to_owned(),
            title: "track".to_owned(),
            duration,
            source_name: "youtube",
            parsers: vec!["A".to_owned(), "B".to_owned()],
        }
    }

    async fn drain(stream: &mut RecoveryStream) -> u64 {
        let mut buf = vec![0u8; FRAME_BYTES];
        let mut total = 0;
        loop {
            match stream.read(&mut buf).await.unwrap() {
                0 => return total,
                n => total += n as u64,
            }
        }
    }

    #[tokio::test]
    async fn fails_over_after_three_retries_and_resumes_at_position() {
        let a = Scripted::new(Duration::from_secs(1));
        let b = Scripted::new(Duration::from_secs(2));
        let registry = setup(a.clone(), b.clone());

        let mut stream = RecoveryStream::open(registry, &track(Some(Duration::from_secs(6))))
            .await
            .unwrap();
        let total = drain(&mut stream).await;

        // First open plus three retries, each at the accumulated seek
        assert_eq!(a.seek_secs(), vec![0, 1, 2, 3]);
        assert_eq!(b.seek_secs(), vec![4]);
        assert_eq!(total, 6 * BYTES_PER_SECOND);
        assert!(!stream.exhausted());
    }

    #[tokio::test]
    async fn eof_only_after_every_parser_is_exhausted() {
        let a = Scripted::new(Duration::from_secs(1));
        let b = Scripted::new(Duration::from_secs(1));
        let registry = setup(a.clone(), b.clone());

        let mut stream = RecoveryStream::open(registry, &track(None)).await.unwrap();
        let total = drain(&mut stream).await;

        assert_eq!(a.seek_secs().len(), 1 + MAX_RETRIES as usize);
        assert_eq!(b.seek_secs().len(), 1 + MAX_RETRIES as usize);
        assert_eq!(total, 8 * BYTES_PER_SECOND);
        assert!(stream.exhausted());

        // Stays at end of stream
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn end_near_known_duration_is_not_retried() {
        let a = Scripted::new(Duration::from_secs(3));
        let b = Scripted::new(Duration::from_secs(3));
        let registry = setup(a.clone(), b.clone());

        let mut stream = RecoveryStream::open(registry, &track(Some(Duration::from_secs(4))))
            .await
            .unwrap();
        drain(&mut stream).await;

        assert_eq!(a.seek_secs(), vec![0]);
        assert!(b.seek_secs().is_empty());
    }

    #[tokio::test]
    async fn unknown_duration_ends_when_reopen_has_nothing_left() {
        // Each open serves only what is left after the seek, like a finished file.
        let a = Scripted::new(Duration::from_secs(2)).tail_only();
        let b = Scripted::new(Duration::from_secs(2));
        let registry = setup(a.clone(), b.clone());

        let mut stream = RecoveryStream::open(registry, &track(None)).await.unwrap();
        let total = drain(&mut stream).await;

        assert_eq!(total, 2 * BYTES_PER_SECOND);
        assert_eq!(a.seek_secs(), vec![0, 2]);
        assert!(b.seek_secs().is_empty());
        assert!(!stream.exhausted());
    }

    #[tokio::test]
    async fn open_failures_fall_through_to_next_parser() {
        let a = Scripted::broken();
        let b = Scripted::new(Duration::from_secs(5));
        let registry = setup(a.clone(), b.clone());

        let mut stream = RecoveryStream::open(registry, &track(Some(Duration::from_secs(5))))
            .await
            .unwrap();
        assert_eq!(a.seek_secs().len(), 1 + MAX_RETRIES as usize);
        assert_eq!(drain(&mut stream).await, 5 * BYTES_PER_SECOND);
    }

    #[tokio::test]
    async fn nothing_opens() {
        let registry = setup(Scripted::broken(), Scripted::broken());
        assert!(RecoveryStream::open(registry, &track(None)).await.is_err());
    }
}
