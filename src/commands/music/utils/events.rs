//! Player lifecycle events and the best-effort chat notifications sent while playing.

use poise::serenity_prelude as serenity;
use ::serenity::async_trait;
use serenity::model::id::GuildId;
use std::fmt;
use std::sync::Arc;

use super::music_manager::{MusicError, MusicResult};
use super::queue_manager::QueueEntry;

/// States a single play cycle moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Joining,
    Downloading,
    Streaming,
    Idle,
    Disconnecting,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Joining => "joining",
            SessionState::Downloading => "downloading",
            SessionState::Streaming => "streaming",
            SessionState::Idle => "idle",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Something observable happened in a guild's player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEvent {
    pub guild_id: GuildId,
    pub kind: PlayerEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEventKind {
    /// An entry was appended; `position` is its 1-based place among pending entries.
    Queued { locator: String, position: usize },
    /// The driver popped an entry and started a session for it.
    SessionStarted { locator: String },
    /// A session (or the idle connection it left behind) changed state.
    StateChanged {
        locator: String,
        state: SessionState,
    },
    /// The idle window elapsed and the voice connection was released.
    Disconnected,
}

/// Fire-and-forget chat notifications. Errors are logged by the caller and never fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn now_playing(&self, entry: &QueueEntry) -> MusicResult<()>;
}

/// Posts notifications into the text channel a request came from.
pub struct ChannelNotifier {
    http: Arc<serenity::Http>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn now_playing(&self, entry: &QueueEntry) -> MusicResult<()> {
        entry
            .text_channel_id
            .say(&self.http, format!("Now playing: {}", entry.media_locator))
            .await
            .map(|_| ())
            .map_err(|e| MusicError::Notify(e.to_string()))
    }
}

/// Notifier that drops everything, for headless use.
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn now_playing(&self, _entry: &QueueEntry) -> MusicResult<()> {
        Ok(())
    }
}
