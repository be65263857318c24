//! PCM framing and Opus frame emission

use super::streamer::PcmStream;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub const SAMPLE_RATE: u64 = 48_000;
pub const CHANNELS: u64 = 2;
pub const BYTES_PER_SAMPLE: u64 = 2;
pub const BYTES_PER_SECOND: u64 = SAMPLE_RATE * CHANNELS * BYTES_PER_SAMPLE;
/// 20 ms per channel
pub const FRAME_SAMPLES: usize = 960;
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS as usize * BYTES_PER_SAMPLE as usize;
/// Upper bound for one encoded Opus frame
pub const MAX_OPUS_FRAME: usize = 4000;

/// Turns interleaved s16 PCM frames into Opus packets
pub trait FrameEncoder: Send {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize>;
}

/// Where encoded frames go
#[serenity::async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, opus: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The stream ran out
    Finished,
    Stopped,
}

/// Fill `frame` from the stream.  Returns `false` at end of stream; a trailing partial frame is
/// padded with silence.
pub async fn read_frame(stream: &mut dyn PcmStream, frame: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < frame.len() {
        let n = stream.read(&mut frame[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            frame[filled..].fill(0);
            break;
        }
        filled += n;
    }
    Ok(true)
}

/// Read, encode, and send frames until the stream ends or `stop` fires.
pub async fn pump(
    stream: &mut dyn PcmStream,
    encoder: &mut dyn FrameEncoder,
    sink: &mut dyn FrameSink,
    stop: &CancellationToken,
) -> Result<PumpEnd> {
    let mut frame = vec![0u8; FRAME_BYTES];
    let mut samples = vec![0i16; FRAME_BYTES / 2];
    let mut opus = vec![0u8; MAX_OPUS_FRAME];

    loop {
        let more = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(PumpEnd::Stopped),
            more = read_frame(stream, &mut frame) => more?,
        };
        if !more {
            return Ok(PumpEnd::Finished);
        }

        for (sample, bytes) in samples.iter_mut().zip(frame.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        let len = encoder.encode(&samples, &mut opus)?;

        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(PumpEnd::Stopped),
            sent = sink.send(&opus[..len]) => sent?,
        }
    }
}
