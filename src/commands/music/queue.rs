use poise::CreateReply;
use poise::serenity_prelude::CreateEmbed;

use super::reply_error;
use crate::{CommandResult, Context};

/// Entries listed before the rest are summarized
const MAX_LISTED: usize = 10;

/// View the songs waiting to play
#[poise::command(prefix_command, slash_command, guild_only, category = "Music")]
pub async fn queue(ctx: Context<'_>) -> CommandResult {
    let Some(guild_id) = ctx.guild_id() else {
        return reply_error(ctx, "This command only works in a server").await;
    };

    let pending = match ctx.data().jukebox.pending(guild_id).await {
        Ok(pending) => pending,
        Err(err) => return reply_error(ctx, format!("Couldn't read the queue: {}", err)).await,
    };

    let locators: Vec<&str> = pending.iter().map(|e| e.media_locator.as_str()).collect();

    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::new()
                .title("🎵 Music Queue")
                .description(describe_queue(&locators))
                .color(0x00ff00),
        ),
    )
    .await?;

    Ok(())
}

fn describe_queue(locators: &[&str]) -> String {
    if locators.is_empty() {
        return "The queue is currently empty".to_string();
    }

    let mut lines: Vec<String> = locators
        .iter()
        .take(MAX_LISTED)
        .enumerate()
        .map(|(i, locator)| format!("{}. {}", i + 1, locator))
        .collect();
    if locators.len() > MAX_LISTED {
        lines.push(format!("...and {} more", locators.len() - MAX_LISTED));
    }
    lines.join("\n")
}
