use dashmap::DashMap;
use futures::{Stream, StreamExt};
use poise::serenity_prelude as serenity;
use serenity::client::Context;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::commands::music::audio_sources::MediaTools;
use crate::commands::music::audio_sources::youtube::{ResolutionError, ResolutionResult};
use crate::config::PlaybackSettings;

use super::events::{Notifier, PlayerEvent};
use super::frame_encoder::CodecFactory;
use super::queue_manager::{GuildPlayer, PlayerCommand, QueueEntry};
use super::voice::VoiceConnector;

/// Capacity of the lifecycle event channel; slow subscribers miss the oldest events.
const EVENT_BUFFER: usize = 256;

/// Errors that can occur during music operations
#[derive(Error, Debug)]
pub enum MusicError {
    #[error("Not in a guild")]
    NotInGuild,

    #[error("User is not in a voice channel")]
    UserNotInVoiceChannel,

    #[error("Failed to get voice manager")]
    NoVoiceManager,

    #[error("Player for this guild is not running")]
    PlayerUnavailable,

    #[error("Couldn't resolve request: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Failed to join voice channel: {0}")]
    Join(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Transcoding failed: {0}")]
    Transcode(String),

    #[error("Voice transport error: {0}")]
    Transport(String),

    #[error("Notification failed: {0}")]
    Notify(String),
}

/// Result type for music operations
pub type MusicResult<T> = Result<T, MusicError>;

/// Everything a player needs to run sessions, shared by all guilds.
pub struct PlayerDeps {
    pub connector: Arc<dyn VoiceConnector>,
    pub tools: Arc<dyn MediaTools>,
    pub notifier: Arc<dyn Notifier>,
    pub codec: Arc<CodecFactory>,
    pub settings: PlaybackSettings,
}

/// Registry of per-guild players.
///
/// Each guild gets its own queue, voice connection and idle timer, created on its first request.
pub struct Jukebox {
    players: DashMap<GuildId, mpsc::UnboundedSender<PlayerCommand>>,
    deps: Arc<PlayerDeps>,
    events: broadcast::Sender<PlayerEvent>,
}

impl Jukebox {
    pub fn new(deps: PlayerDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            players: DashMap::new(),
            deps: Arc::new(deps),
            events,
        }
    }

    /// Subscribes to lifecycle events from every guild.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Appends an entry to its guild's queue, starting playback if the guild is idle.
    pub fn enqueue(&self, entry: QueueEntry) -> MusicResult<()> {
        let guild_id = entry.guild_id;
        let mut command = PlayerCommand::Enqueue(entry);

        // A player whose task has died is replaced once.
        for _ in 0..2 {
            let player = self.player(guild_id);
            match player.send(command) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    warn!("Player for guild {} is gone, restarting it", guild_id);
                    self.players
                        .remove_if(&guild_id, |_, current| current.same_channel(&player));
                    command = returned;
                }
            }
        }

        Err(MusicError::PlayerUnavailable)
    }

    /// Shuffles a guild's pending entries and returns how many there were.
    pub async fn shuffle(&self, guild_id: GuildId) -> MusicResult<usize> {
        let Some(player) = self.existing_player(guild_id) else {
            return Ok(0);
        };
        let (reply, rx) = oneshot::channel();
        player
            .send(PlayerCommand::Shuffle(reply))
            .map_err(|_| MusicError::PlayerUnavailable)?;
        rx.await.map_err(|_| MusicError::PlayerUnavailable)
    }

    /// The entries still waiting to play in a guild, in order.
    pub async fn pending(&self, guild_id: GuildId) -> MusicResult<Vec<QueueEntry>> {
        let Some(player) = self.existing_player(guild_id) else {
            return Ok(Vec::new());
        };
        let (reply, rx) = oneshot::channel();
        player
            .send(PlayerCommand::Pending(reply))
            .map_err(|_| MusicError::PlayerUnavailable)?;
        rx.await.map_err(|_| MusicError::PlayerUnavailable)
    }

    fn player(&self, guild_id: GuildId) -> mpsc::UnboundedSender<PlayerCommand> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("Creating player for guild {}", guild_id);
                GuildPlayer::spawn(guild_id, self.deps.clone(), self.events.clone())
            })
            .clone()
    }

    fn existing_player(&self, guild_id: GuildId) -> Option<mpsc::UnboundedSender<PlayerCommand>> {
        self.players.get(&guild_id).map(|player| player.clone())
    }
}

/// Outcome of queueing every locator a request resolved to.
#[derive(Debug, Default)]
pub struct EnqueueSummary {
    pub queued: usize,
    /// The error that stopped the fan-out early, if any. Entries queued before it stay queued.
    pub error: Option<MusicError>,
}

/// Feeds resolved locators to `enqueue` in order, stopping at the first failure.
pub async fn enqueue_locators<S>(
    locators: S,
    mut enqueue: impl FnMut(String) -> MusicResult<()>,
) -> EnqueueSummary
where
    S: Stream<Item = ResolutionResult<String>>,
{
    let mut locators = pin!(locators);
    let mut summary = EnqueueSummary::default();

    while let Some(next) = locators.next().await {
        match next.map_err(MusicError::from).and_then(&mut enqueue) {
            Ok(()) => summary.queued += 1,
            Err(err) => {
                summary.error = Some(err);
                break;
            }
        }
    }

    summary
}

/// Get the voice channel the user is currently connected to
pub fn get_user_voice_channel(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> MusicResult<ChannelId> {
    let guild = ctx.cache.guild(guild_id).ok_or(MusicError::NotInGuild)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(MusicError::UserNotInVoiceChannel)
}
