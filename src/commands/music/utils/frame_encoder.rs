//! Splits a raw PCM byte stream into 20ms frames and compresses each one into a voice packet.

use audiopus::{Application, Channels, SampleRate, coder::Encoder as OpusEncoder};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::music_manager::{MusicError, MusicResult};

/// Output sample rate expected by the voice transport.
pub const SAMPLE_RATE: u32 = 48_000;
/// Interleaved channel count of the PCM stream.
pub const CHANNELS: usize = 2;
/// Samples per channel in one 20ms frame.
pub const FRAME_SAMPLES: usize = 960;
/// Bytes of s16le PCM that make up one frame.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;
/// Upper bound on the size of a single encoded packet.
pub const MAX_PACKET_BYTES: usize = 5760;

/// Compresses one frame of interleaved PCM into a packet.
pub trait PacketCodec: Send {
    /// `pcm` holds at most `FRAME_SAMPLES * CHANNELS` samples; the final frame of a stream
    /// may be shorter.
    fn encode(&mut self, pcm: &[i16]) -> MusicResult<Vec<u8>>;
}

/// Builds a fresh codec for every playback session.
pub type CodecFactory = dyn Fn() -> MusicResult<Box<dyn PacketCodec>> + Send + Sync;

/// Opus codec at 48kHz stereo with the music-oriented application profile.
pub struct OpusCodec {
    encoder: OpusEncoder,
    frame: Vec<i16>,
    out: Vec<u8>,
}

impl OpusCodec {
    pub fn new() -> MusicResult<Self> {
        let encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| MusicError::Transcode(format!("Failed to create Opus encoder: {}", e)))?;

        Ok(Self {
            encoder,
            frame: vec![0; FRAME_SAMPLES * CHANNELS],
            out: vec![0; MAX_PACKET_BYTES],
        })
    }

    /// Factory suitable for `PlayerDeps::codec`.
    pub fn factory() -> Arc<CodecFactory> {
        Arc::new(|| Ok(Box::new(OpusCodec::new()?) as Box<dyn PacketCodec>))
    }
}

impl PacketCodec for OpusCodec {
    fn encode(&mut self, pcm: &[i16]) -> MusicResult<Vec<u8>> {
        // Opus only accepts whole frame durations, so a short tail is padded with silence.
        let pcm = if pcm.len() < self.frame.len() {
            self.frame[..pcm.len()].copy_from_slice(pcm);
            self.frame[pcm.len()..].fill(0);
            &self.frame[..]
        } else {
            pcm
        };

        let written = self
            .encoder
            .encode(pcm, &mut self.out)
            .map_err(|e| MusicError::Transcode(format!("Failed to encode PCM frame: {}", e)))?;

        Ok(self.out[..written].to_vec())
    }
}

/// Reads PCM frames from `reader` and hands each to `codec`.
///
/// Once the reader reports end-of-stream (or any error is returned) the encoder is exhausted
/// and every further call yields `None`.
pub struct FrameEncoder<R> {
    reader: R,
    codec: Box<dyn PacketCodec>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FrameEncoder<R> {
    pub fn new(reader: R, codec: Box<dyn PacketCodec>) -> Self {
        Self {
            reader,
            codec,
            buf: vec![0; FRAME_BYTES],
            done: false,
        }
    }

    /// Encodes the next frame, or returns `None` once the stream has ended.
    pub async fn next_packet(&mut self) -> MusicResult<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }

        let filled = match self.fill_frame().await {
            Ok(filled) => filled,
            Err(err) => {
                self.done = true;
                return Err(err);
            }
        };

        if filled < FRAME_BYTES {
            self.done = true;
        }
        if filled == 0 {
            return Ok(None);
        }

        let pcm: Vec<i16> = self.buf[..filled]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        match self.codec.encode(&pcm) {
            Ok(packet) => Ok(Some(packet)),
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    /// Turns the encoder into a lazy stream of packets that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = MusicResult<Vec<u8>>> {
        stream::try_unfold(self, |mut encoder| async move {
            let packet = encoder.next_packet().await?;
            Ok(packet.map(|packet| (packet, encoder)))
        })
    }

    /// Reads until the frame buffer is full or the reader hits end-of-stream.
    async fn fill_frame(&mut self) -> MusicResult<usize> {
        let mut filled = 0;
        while filled < FRAME_BYTES {
            let n = self
                .reader
                .read(&mut self.buf[filled..])
                .await
                .map_err(|e| MusicError::Transcode(format!("Failed to read PCM stream: {}", e)))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}
