pub(crate) mod play;
pub(crate) mod queue;
pub(crate) mod shuffle;

pub mod audio_sources;
pub mod utils;

use crate::{CommandResult, Context};
use poise::CreateReply;
use poise::serenity_prelude::CreateEmbed;

/// Replies with a red error embed.
async fn reply_error(ctx: Context<'_>, message: impl Into<String>) -> CommandResult {
    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::new()
                .title("❌ Error")
                .description(message)
                .color(0xff0000),
        ),
    )
    .await?;
    Ok(())
}
