use futures::stream;
use poise::CreateReply;
use poise::serenity_prelude::CreateEmbed;
use tracing::{info, warn};

use super::audio_sources::youtube::Request;
use super::reply_error;
use super::utils::music_manager::{enqueue_locators, get_user_voice_channel};
use super::utils::queue_manager::QueueEntry;
use crate::{CommandResult, Context};

/// Queue a song by search text, or every video of a YouTube playlist link
#[poise::command(prefix_command, slash_command, guild_only, category = "Music")]
pub async fn play(
    ctx: Context<'_>,
    #[description = "Search text or playlist link"]
    #[rest]
    query: String,
) -> CommandResult {
    info!("Received play command with query: {}", query);
    let Some(guild_id) = ctx.guild_id() else {
        return reply_error(ctx, "This command only works in a server").await;
    };
    if query.trim().is_empty() {
        return reply_error(ctx, "Tell me what to play").await;
    }

    let voice_channel_id =
        match get_user_voice_channel(ctx.serenity_context(), guild_id, ctx.author().id) {
            Ok(channel_id) => channel_id,
            Err(err) => {
                return reply_error(ctx, format!("You need to be in a voice channel: {}", err))
                    .await;
            }
        };

    // Playlists can take several API round trips
    ctx.defer().await?;

    let text_channel_id = ctx.channel_id();
    let data = ctx.data();
    let enqueue = |locator: String| {
        data.jukebox.enqueue(QueueEntry::new(
            guild_id,
            voice_channel_id,
            text_channel_id,
            locator,
        ))
    };

    let summary = match Request::classify(&query) {
        Request::Search(text) => {
            enqueue_locators(stream::once(data.catalog.search(&text)), enqueue).await
        }
        Request::Playlist(link) => enqueue_locators(data.catalog.playlist(&link), enqueue).await,
    };

    match (summary.queued, summary.error) {
        (0, Some(err)) => {
            warn!("Nothing queued for {}: {}", query, err);
            reply_error(ctx, format!("Couldn't queue that: {}", err)).await
        }
        (queued, error) => {
            let mut description = match queued {
                1 => "Queued 1 track".to_string(),
                n => format!("Queued {} tracks", n),
            };
            if let Some(err) = error {
                warn!("Playlist fan-out for {} stopped early: {}", query, err);
                description.push_str(&format!("\nStopped early: {}", err));
            }

            ctx.send(
                CreateReply::default().embed(
                    CreateEmbed::new()
                        .title("🎵 Added to queue")
                        .description(description)
                        .color(0x00ff00),
                ),
            )
            .await?;
            Ok(())
        }
    }
}
