use poise::serenity_prelude as serenity;
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jukebox::{
    ChannelNotifier, Config, Data, Error, ExternalTools, Jukebox, OpusCodec, PlayerDeps,
    PlayerEvent, SongbirdConnector, YoutubeCatalog,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize logging with debug level for our crate
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jukebox=debug,warn")),
        )
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true)
        .with_ansi(true)
        .pretty()
        .init();

    let config = Config::load()?;

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: jukebox::commands(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.bot_prefix.clone()),
                ..Default::default()
            },
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup({
            let songbird = songbird.clone();
            let config = config.clone();
            move |ctx, ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    info!("Logged in as {}", ready.user.name);

                    let deps = PlayerDeps {
                        connector: Arc::new(SongbirdConnector::new(songbird)),
                        tools: Arc::new(ExternalTools::from_settings(&config.playback)),
                        notifier: Arc::new(ChannelNotifier::new(ctx.http.clone())),
                        codec: OpusCodec::factory(),
                        settings: config.playback.clone(),
                    };
                    let jukebox = Arc::new(Jukebox::new(deps));
                    tokio::spawn(log_events(jukebox.subscribe()));

                    Ok(Data {
                        jukebox,
                        catalog: YoutubeCatalog::new(&config.catalog, config.youtube_api_key),
                    })
                })
            }
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await.map_err(Into::into)
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Command {} failed: {}", ctx.command().name, error);
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

/// Mirrors player lifecycle events into the log.
async fn log_events(mut events: broadcast::Receiver<PlayerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!("Guild {}: {:?}", event.guild_id, event.kind),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event log fell behind, skipped {} events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
