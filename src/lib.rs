//! A Discord jukebox: queue songs by search text or playlist link and stream them into voice.

pub mod commands;
pub mod config;

use std::sync::Arc;

use commands::music::{play::*, queue::*, shuffle::*};

pub use commands::music::audio_sources::youtube::{Request, ResolutionError, YoutubeCatalog};
pub use commands::music::audio_sources::{ExternalTools, MediaTools, PcmStream, TempArtifact};
pub use commands::music::utils::disconnect_timer::DisconnectTimer;
pub use commands::music::utils::events::{
    ChannelNotifier, Notifier, PlayerEvent, PlayerEventKind, SessionState, SilentNotifier,
};
pub use commands::music::utils::frame_encoder::{
    CodecFactory, FRAME_BYTES, FrameEncoder, MAX_PACKET_BYTES, OpusCodec, PacketCodec,
};
pub use commands::music::utils::music_manager::{
    EnqueueSummary, Jukebox, MusicError, MusicResult, PlayerDeps, enqueue_locators,
};
pub use commands::music::utils::playback_session::{PlaybackSession, SessionReport};
pub use commands::music::utils::queue_manager::{QueueEntry, SongQueue};
pub use commands::music::utils::voice::{
    PacketSender, SongbirdConnector, VoiceConnector, VoiceLink,
};
pub use config::{CatalogSettings, Config, ConfigError, PlaybackSettings};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
pub type CommandResult = Result<(), Error>;

/// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub jukebox: Arc<Jukebox>,
    pub catalog: YoutubeCatalog,
}

#[poise::command(prefix_command, slash_command, category = "General")]
async fn help(
    ctx: Context<'_>,
    #[description = "Specific command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> CommandResult {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            show_context_menu_commands: true,
            ..Default::default()
        },
    )
    .await
    .map_err(|e| e.into())
}

#[poise::command(prefix_command, hide_in_help)]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx)
        .await
        .map_err(|e| e.into())
}

/// Every command the bot serves.
pub fn commands() -> Vec<poise::Command<Data, Error>> {
    vec![
        // Default commands
        register(),
        help(),
        // Music commands
        play(),
        shuffle(),
        queue(),
    ]
}
