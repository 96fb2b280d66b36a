//! Voice transport: joining channels and pushing encoded packets to the voice gateway.
//!
//! The pipeline only sees the [`VoiceConnector`] and [`VoiceLink`] traits. The songbird-backed
//! implementation wraps the outbound packet channel in a DCA stream that songbird plays as a
//! live input, passing the Opus frames straight through to the UDP sender.

use poise::serenity_prelude as serenity;
use ::serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use serenity::prelude::Mutex as SerenityMutex;
use songbird::input::{AudioStream, Input, LiveInput};
use songbird::{Call, Songbird};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::frame_encoder::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};
use super::music_manager::{MusicError, MusicResult};

/// Sending half of a link's outbound packet channel.
/// Bounded, so a slow transport throttles the sender.
pub type PacketSender = mpsc::Sender<Vec<u8>>;

/// Establishes voice connections.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId)
    -> MusicResult<Arc<dyn VoiceLink>>;
}

/// A live voice connection for one guild.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// The voice channel this link was opened for.
    fn channel_id(&self) -> ChannelId;

    /// Whether the connection is still usable.
    async fn is_connected(&self) -> bool;

    /// Opens a fresh outbound channel for one stream of packets, replacing any previous one.
    /// Dropping the sender ends the stream.
    async fn open_outbound(&self, capacity: usize) -> MusicResult<PacketSender>;

    /// Releases the voice connection.
    async fn disconnect(&self) -> MusicResult<()>;
}

/// Joins voice channels through the songbird manager registered with the client.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> MusicResult<Arc<dyn VoiceLink>> {
        info!("Joining voice channel {} in guild {}", channel_id, guild_id);

        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Join(e.to_string()))?;

        Ok(Arc::new(SongbirdLink {
            manager: self.manager.clone(),
            guild_id,
            channel_id,
            call,
        }))
    }
}

struct SongbirdLink {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<SerenityMutex<Call>>,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_connected(&self) -> bool {
        let call = self.call.lock().await;
        call.current_channel()
            .is_some_and(|current| current.0.get() == self.channel_id.get())
    }

    async fn open_outbound(&self, capacity: usize) -> MusicResult<PacketSender> {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let mut hint = Hint::new();
        hint.with_extension("dca");
        let source: Box<dyn MediaSource> = Box::new(DcaPacketSource::new(rx));
        let input = Input::Live(
            LiveInput::Raw(AudioStream {
                input: source,
                hint: Some(hint),
            }),
            None,
        );

        let mut call = self.call.lock().await;
        call.play_only_input(input);
        debug!("Opened outbound packet stream for guild {}", self.guild_id);

        Ok(tx)
    }

    async fn disconnect(&self) -> MusicResult<()> {
        info!("Leaving voice channel in guild {}", self.guild_id);
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| MusicError::Transport(format!("Failed to leave voice channel: {}", e)))
    }
}

/// Presents a channel of Opus packets as a DCA1 byte stream.
///
/// Reads block on the channel, which is fine: songbird drives inputs from its own threads.
pub(crate) struct DcaPacketSource {
    packets: Mutex<mpsc::Receiver<Vec<u8>>>,
    pending: Cursor<Vec<u8>>,
}

impl DcaPacketSource {
    pub(crate) fn new(packets: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            packets: Mutex::new(packets),
            pending: Cursor::new(dca_header()),
        }
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let packets = self.packets.get_mut().unwrap_or_else(|e| e.into_inner());
        let packet = packets.blocking_recv()?;

        let mut frame = Vec::with_capacity(packet.len() + 2);
        frame.extend_from_slice(&(packet.len() as i16).to_le_bytes());
        frame.extend_from_slice(&packet);
        Some(frame)
    }
}

/// `DCA1` magic, metadata length and JSON metadata describing the Opus stream.
fn dca_header() -> Vec<u8> {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": FRAME_SAMPLES,
            "abr": null,
            "vbr": true,
            "channels": CHANNELS,
        },
        "info": null,
        "origin": null,
        "extra": null,
    })
    .to_string();

    let mut header = Vec::with_capacity(8 + metadata.len());
    header.extend_from_slice(b"DCA1");
    header.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    header.extend_from_slice(metadata.as_bytes());
    header
}

impl Read for DcaPacketSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.pending.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            match self.next_frame() {
                Some(frame) => self.pending = Cursor::new(frame),
                None => return Ok(0),
            }
        }
    }
}

impl Seek for DcaPacketSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live packet stream is not seekable",
        ))
    }
}

impl MediaSource for DcaPacketSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
