//! Bot configuration: an optional JSON file, overridden by environment variables.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_PATH_VAR: &str = "JUKEBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "./config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Couldn't read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
///
/// Keys of the legacy `config.json` (`token`, `botPrefix`, `APIKey`) are accepted as-is.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "token")]
    pub discord_token: String,
    #[serde(rename = "botPrefix")]
    pub bot_prefix: String,
    #[serde(rename = "APIKey")]
    pub youtube_api_key: Option<String>,
    pub playback: PlaybackSettings,
    pub catalog: CatalogSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            bot_prefix: "&".to_string(),
            youtube_api_key: None,
            playback: PlaybackSettings::default(),
            catalog: CatalogSettings::default(),
        }
    }
}

/// Tuning for the playback pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// How long a voice connection may sit with nothing queued before it is released.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Upper bound on a single download.
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
    /// Longest wait for the transcoder to produce one frame.
    #[serde(with = "humantime_serde")]
    pub stall_timeout: Duration,
    /// Directory holding the per-guild temporary audio file.
    pub artifact_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// Encoded packets allowed to queue ahead of the voice transport.
    pub outbound_buffer: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            download_timeout: Duration::from_secs(10 * 60),
            stall_timeout: Duration::from_secs(30),
            artifact_dir: env::temp_dir(),
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),
            outbound_buffer: 8,
        }
    }
}

impl PlaybackSettings {
    /// The deterministic temporary file used for a guild's current download.
    pub fn artifact_path(&self, guild_id: u64) -> PathBuf {
        self.artifact_dir.join(format!("jukebox-{}.mp3", guild_id))
    }
}

/// YouTube Data API settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub base_url: String,
    /// Items requested per playlist page.
    pub page_size: u32,
    /// Results requested per search; only the first is used.
    pub search_results: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com".to_string(),
            page_size: 50,
            search_results: 5,
        }
    }
}

impl Config {
    /// Loads `.env`, the JSON file (if present) and environment overrides, then validates.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;

        info!("Configuration loaded successfully.");
        Ok(config)
    }

    /// Reads the JSON file at `path`; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Applies `DISCORD_TOKEN`, `BOT_PREFIX` and `YOUTUBE_API_KEY` from `lookup`
    /// over the file values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("DISCORD_TOKEN") {
            self.discord_token = token;
        }
        if let Some(prefix) = lookup("BOT_PREFIX") {
            self.bot_prefix = prefix;
        }
        if let Some(key) = lookup("YOUTUBE_API_KEY") {
            self.youtube_api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord_token.trim().is_empty() {
            return Err(ConfigError::Invalid("missing Discord token".into()));
        }
        if self.bot_prefix.is_empty() {
            return Err(ConfigError::Invalid("bot prefix must not be empty".into()));
        }

        let playback = &self.playback;
        for (name, value) in [
            ("idle_timeout", playback.idle_timeout),
            ("download_timeout", playback.download_timeout),
            ("stall_timeout", playback.stall_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }
        if playback.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("outbound_buffer must be at least 1".into()));
        }
        if self.catalog.page_size == 0 || self.catalog.search_results == 0 {
            return Err(ConfigError::Invalid("catalog sizes must be at least 1".into()));
        }

        Ok(())
    }
}
