//! External processes that turn a media URL into s16le 48 kHz stereo PCM
//!
//! Every parser ends in the same ffmpeg decoder.  In link mode ffmpeg fetches the media itself
//! (the parser only finds the direct URL); in pipe mode a downloader writes the media to ffmpeg's
//! stdin.

use super::{
    frames::{CHANNELS, SAMPLE_RATE},
    source,
};
use anyhow::{anyhow, Context as _, Result};
use std::{collections::HashMap, process::Stdio, sync::Arc, time::Duration};
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
};

/// A readable PCM stream
#[serenity::async_trait]
pub trait PcmStream: Send {
    /// Like `AsyncRead::read`; `Ok(0)` is end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn close(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Link,
    Pipe,
}

#[serenity::async_trait]
pub trait Streamer: Send + Sync {
    fn supports_pipe(&self) -> bool;
    async fn open_link(&self, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>>;
    async fn open_pipe(&self, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>>;
}

/// Parser name → streamer and mode
#[derive(Default)]
pub struct StreamerRegistry {
    parsers: HashMap<String, (Arc<dyn Streamer>, Mode)>,
}

impl StreamerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The downloaders and decoder the bot ships with
    pub fn with_defaults() -> Self {
        let ytdlp: Arc<dyn Streamer> = Arc::new(YtDlp);
        let kkdai: Arc<dyn Streamer> = Arc::new(Kkdai);
        let mut registry = Self::new();
        registry.register(source::YTDLP_PIPE, ytdlp.clone(), Mode::Pipe);
        registry.register(source::YTDLP_LINK, ytdlp, Mode::Link);
        registry.register(source::KKDAI_PIPE, kkdai.clone(), Mode::Pipe);
        registry.register(source::KKDAI_LINK, kkdai, Mode::Link);
        registry.register(source::FFMPEG_LINK, Arc::new(FfmpegOnly), Mode::Link);
        registry
    }

    pub fn register(&mut self, parser: &str, streamer: Arc<dyn Streamer>, mode: Mode) {
        self.parsers.insert(parser.to_owned(), (streamer, mode));
    }

    pub async fn open(&self, parser: &str, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
        let (streamer, mode) = self
            .parsers
            .get(parser)
            .ok_or_else(|| anyhow!("no streamer for parser `{}`", parser))?;

        match mode {
            Mode::Link => streamer.open_link(url, seek).await,
            Mode::Pipe if streamer.supports_pipe() => streamer.open_pipe(url, seek).await,
            Mode::Pipe => Err(anyhow!("parser `{}` cannot pipe", parser)),
        }
    }
}

/// ffmpeg arguments decoding `input` (a URL, or stdin when `None`) to PCM on stdout
pub fn decoder_args(input: Option<&str>, seek: Duration) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let seek = format!("{:.3}", seek.as_secs_f64());

    match input {
        Some(url) => {
            args.extend(
                [
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                    "-ss",
                    &seek,
                    "-i",
                    url,
                ]
                .iter()
                .map(|s| s.to_string()),
            );
        }
        // Pipes cannot seek, so skip decoded output instead.
        None => {
            args.retain(|a| a != "-nostdin");
            args.extend(["-i", "pipe:0", "-ss", &seek].iter().map(|s| s.to_string()));
        }
    }

    args.extend(
        [
            "-f".to_owned(),
            "s16le".to_owned(),
            "-ar".to_owned(),
            SAMPLE_RATE.to_string(),
            "-ac".to_owned(),
            CHANNELS.to_string(),
            "pipe:1".to_owned(),
        ]
        .into_iter(),
    );
    args
}

/// ffmpeg's stdout, plus the downloader feeding its stdin in pipe mode
struct ProcessStream {
    decoder: Child,
    stdout: ChildStdout,
    feeder: Option<(Child, JoinHandle<()>)>,
}

#[serenity::async_trait]
impl PcmStream for ProcessStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stdout.read(buf).await?)
    }

    async fn close(&mut self) {
        if let Some((mut downloader, copy)) = self.feeder.take() {
            copy.abort();
            let _ = downloader.kill().await;
        }
        let _ = self.decoder.kill().await;
    }
}

fn spawn_decoder(input: Option<&str>, seek: Duration) -> Result<(Child, ChildStdout)> {
    let mut decoder = Command::new("ffmpeg")
        .args(decoder_args(input, seek))
        .stdin(if input.is_some() {
            Stdio::null()
        } else {
            Stdio::piped()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("Could not start ffmpeg")?;
    let stdout = decoder
        .stdout
        .take()
        .ok_or_else(|| anyhow!("ffmpeg has no stdout"))?;
    Ok((decoder, stdout))
}

/// Decode a URL ffmpeg can fetch itself.
fn open_remote(url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
    let (decoder, stdout) = spawn_decoder(Some(url), seek)?;
    Ok(Box::new(ProcessStream {
        decoder,
        stdout,
        feeder: None,
    }))
}

/// Decode whatever `downloader` writes to its stdout.
fn open_piped(mut downloader: Command, seek: Duration) -> Result<Box<dyn PcmStream>> {
    let mut downloader = downloader
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("Could not start downloader")?;
    let mut media = downloader
        .stdout
        .take()
        .ok_or_else(|| anyhow!("downloader has no stdout"))?;

    let (mut decoder, stdout) = spawn_decoder(None, seek)?;
    let mut decoder_stdin = decoder
        .stdin
        .take()
        .ok_or_else(|| anyhow!("ffmpeg has no stdin"))?;

    // Ends when either side closes.
    let copy = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut media, &mut decoder_stdin).await;
    });

    Ok(Box::new(ProcessStream {
        decoder,
        stdout,
        feeder: Some((downloader, copy)),
    }))
}

/// First line of a command's stdout
async fn first_line(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Could not run {}", program))?;
    if !output.status.success() {
        return Err(anyhow!("{} exited with {}", program, output.status));
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("{} printed nothing", program))
}

/// yt-dlp
struct YtDlp;

#[serenity::async_trait]
impl Streamer for YtDlp {
    fn supports_pipe(&self) -> bool {
        true
    }

    async fn open_link(&self, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
        let direct = first_line(
            "yt-dlp",
            &["-f", "bestaudio/best", "--no-playlist", "--get-url", url],
        )
        .await?;
        open_remote(&direct, seek)
    }

    async fn open_pipe(&self, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
        let mut downloader = Command::new("yt-dlp");
        downloader.args(["-f", "bestaudio/best", "--no-playlist", "-q", "-o", "-", url]);
        open_piped(downloader, seek)
    }
}

/// kkdai/youtube's `youtubedr`
struct Kkdai;

#[serenity::async_trait]
impl Streamer for Kkdai {
    fn supports_pipe(&self) -> bool {
        true
    }

    async fn open_link(&self, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
        let direct = first_line("youtubedr", &["url", url]).await?;
        open_remote(&direct, seek)
    }

    async fn open_pipe(&self, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
        let mut downloader = Command::new("youtubedr");
        downloader.args(["download", "-q", "medium", "-o", "-", url]);
        open_piped(downloader, seek)
    }
}

/// ffmpeg alone, for direct stream URLs
struct FfmpegOnly;

#[serenity::async_trait]
impl Streamer for FfmpegOnly {
    fn supports_pipe(&self) -> bool {
        false
    }

    async fn open_link(&self, url: &str, seek: Duration) -> Result<Box<dyn PcmStream>> {
        open_remote(url, seek)
    }

    async fn open_pipe(&self, _url: &str, _seek: Duration) -> Result<Box<dyn PcmStream>> {
        Err(anyhow!("ffmpeg-only streams cannot pipe"))
    }
}
