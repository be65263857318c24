//! Voice connections
//!
//! With the `voice` feature, songbird owns the voice gateway and UDP connection.  The player
//! still does its own framing and Opus encoding: each track's frames are handed to songbird as
//! a live DCA stream, which it forwards without re-encoding.

use super::frames::{FrameEncoder, FrameSink};
use crate::error::BotError;
use anyhow::Result;
use serenity::all::{ChannelId, ClientBuilder, GuildId};

#[serenity::async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()>;

    /// Frame sink for one track on an existing connection
    async fn open_sink(&self, guild_id: GuildId) -> Result<Box<dyn FrameSink>>;

    async fn leave(&self, guild_id: GuildId) -> Result<()>;

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>>;

    /// Hook the gateway into the Discord client before it starts.
    fn register(&self, builder: ClientBuilder) -> ClientBuilder {
        builder
    }
}

fn unavailable() -> anyhow::Error {
    BotError::InvalidInput("Voice support is not available in this build.".to_owned()).into()
}

/// Stand-in when the bot is built without voice support
pub struct Unsupported;

#[serenity::async_trait]
impl VoiceGateway for Unsupported {
    async fn connect(&self, _guild_id: GuildId, _channel_id: ChannelId) -> Result<()> {
        Err(unavailable())
    }

    async fn open_sink(&self, _guild_id: GuildId) -> Result<Box<dyn FrameSink>> {
        Err(unavailable())
    }

    async fn leave(&self, _guild_id: GuildId) -> Result<()> {
        Ok(())
    }

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>> {
        Err(unavailable())
    }
}

#[cfg(feature = "voice")]
pub use songbird_gateway::SongbirdGateway;

#[cfg(feature = "voice")]
mod songbird_gateway {
    use super::*;
    use crate::voice::frames::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};
    use anyhow::{anyhow, Context as _};
    use audiopus::{coder::Encoder, Application, Channels, SampleRate};
    use songbird::{
        input::{
            core::io::{MediaSource, ReadOnlySource},
            AudioStream, Input, LiveInput,
        },
        serenity::SerenityInit,
        Songbird,
    };
    use std::{io::Read, sync::Arc};
    use tokio::sync::mpsc;

    /// Frames buffered between the player and songbird
    const FRAME_BACKLOG: usize = 50;

    pub struct SongbirdGateway {
        manager: Arc<Songbird>,
    }

    impl SongbirdGateway {
        pub fn new() -> Self {
            Self {
                manager: Songbird::serenity(),
            }
        }
    }

    struct OpusEncoder(Encoder);

    impl FrameEncoder for OpusEncoder {
        fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize> {
            Ok(self.0.encode(pcm, out)?)
        }
    }

    struct DcaSink(mpsc::Sender<Vec<u8>>);

    #[serenity::async_trait]
    impl FrameSink for DcaSink {
        async fn send(&mut self, opus: &[u8]) -> Result<()> {
            let len = i16::try_from(opus.len())?;
            let mut frame = Vec::with_capacity(opus.len() + 2);
            frame.extend_from_slice(&len.to_le_bytes());
            frame.extend_from_slice(opus);
            self.0
                .send(frame)
                .await
                .map_err(|_| anyhow!("voice track was closed"))
        }
    }

    /// Blocking reader songbird pulls the DCA stream from
    struct DcaReader {
        pending: Vec<u8>,
        offset: usize,
        frames: mpsc::Receiver<Vec<u8>>,
    }

    impl DcaReader {
        fn new(frames: mpsc::Receiver<Vec<u8>>) -> Self {
            let metadata = serde_json::json!({
                "dca": { "version": 1, "tool": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") } },
                "opus": {
                    "mode": "music",
                    "sample_rate": SAMPLE_RATE,
                    "frame_size": FRAME_SAMPLES,
                    "abr": null,
                    "vbr": true,
                    "channels": CHANNELS,
                },
            })
            .to_string();

            let mut header = b"DCA1".to_vec();
            header.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
            header.extend_from_slice(metadata.as_bytes());
            Self {
                pending: header,
                offset: 0,
                frames,
            }
        }
    }

    impl Read for DcaReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.offset == self.pending.len() {
                match self.frames.blocking_recv() {
                    Some(frame) => {
                        self.pending = frame;
                        self.offset = 0;
                    }
                    None => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len() - self.offset);
            buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
            self.offset += n;
            Ok(n)
        }
    }

    #[serenity::async_trait]
    impl VoiceGateway for SongbirdGateway {
        async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
            self.manager
                .join(guild_id, channel_id)
                .await
                .with_context(|| format!("Could not join voice channel {}", channel_id))?;
            Ok(())
        }

        async fn open_sink(&self, guild_id: GuildId) -> Result<Box<dyn FrameSink>> {
            let call = self
                .manager
                .get(guild_id)
                .ok_or_else(|| anyhow!("not connected to voice in {}", guild_id))?;

            let (tx, rx) = mpsc::channel(FRAME_BACKLOG);
            let source: Box<dyn MediaSource> = Box::new(ReadOnlySource::new(DcaReader::new(rx)));
            let input = Input::Live(
                LiveInput::Raw(AudioStream {
                    input: source,
                    hint: None,
                }),
                None,
            );
            call.lock().await.play_only_input(input);
            Ok(Box::new(DcaSink(tx)))
        }

        async fn leave(&self, guild_id: GuildId) -> Result<()> {
            if self.manager.get(guild_id).is_some() {
                self.manager.remove(guild_id).await?;
            }
            Ok(())
        }

        fn encoder(&self) -> Result<Box<dyn FrameEncoder>> {
            let encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
            Ok(Box::new(OpusEncoder(encoder)))
        }

        fn register(&self, builder: ClientBuilder) -> ClientBuilder {
            builder.register_songbird_with(self.manager.clone())
        }
    }
}
