//! This module aggregates all the command modules for the bot.

/// Music playback commands and the pipeline behind them.
pub mod music;
