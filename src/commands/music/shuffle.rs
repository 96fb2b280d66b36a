use tracing::info;

use super::reply_error;
use crate::{CommandResult, Context};

/// Shuffle the songs waiting in the queue
#[poise::command(prefix_command, slash_command, guild_only, category = "Music")]
pub async fn shuffle(ctx: Context<'_>) -> CommandResult {
    let Some(guild_id) = ctx.guild_id() else {
        return reply_error(ctx, "This command only works in a server").await;
    };

    match ctx.data().jukebox.shuffle(guild_id).await {
        Ok(count) => {
            info!("Shuffled {} songs in guild {}", count, guild_id);
            ctx.say("Song queue has been shuffled.").await?;
            Ok(())
        }
        Err(err) => reply_error(ctx, format!("Couldn't shuffle the queue: {}", err)).await,
    }
}
