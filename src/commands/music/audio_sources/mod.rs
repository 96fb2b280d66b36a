//! Media acquisition for the playback pipeline.
//!
//! A locator is fetched and decoded to a temporary audio file by one external tool, then a
//! second tool resamples that file to raw 48kHz stereo s16le PCM on its standard output.

/// Submodule resolving search text and playlist links to media locators.
pub mod youtube;

use crate::commands::music::utils::music_manager::{MusicError, MusicResult};
use crate::config::PlaybackSettings;
use serenity::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// The two external steps a play cycle runs, in order.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Fetches `locator` and writes decoded audio to `artifact`.
    async fn download(&self, locator: &str, artifact: &Path) -> MusicResult<()>;

    /// Starts converting `artifact` to raw PCM and returns the running stream.
    async fn transcode(&self, artifact: &Path) -> MusicResult<PcmStream>;
}

/// A raw PCM byte stream, optionally backed by the child process producing it.
///
/// The child is killed if the stream is dropped before [`PcmStream::finish`] reaps it.
pub struct PcmStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<Child>,
}

impl PcmStream {
    /// Wraps an in-process reader, with no process to supervise.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
        }
    }

    fn from_child(child: Child, stdout: ChildStdout) -> Self {
        Self {
            reader: Box::new(stdout),
            child: Some(child),
        }
    }

    /// Waits for the producing process after end-of-stream and checks that it exited cleanly.
    pub async fn finish(mut self) -> MusicResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().await.map_err(|e| {
            MusicError::Transcode(format!("Failed to wait for transcoder: {}", e))
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(MusicError::Transcode(format!(
                "Transcoder exited with {}",
                status
            )))
        }
    }
}

impl AsyncRead for PcmStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl Drop for PcmStream {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("Transcoder already gone on drop: {}", e);
            }
        }
    }
}

/// Removes the temporary audio file, and the downloader's scratch files next to it, when dropped.
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn new(path: PathBuf) -> Self {
        // A previous cycle that was killed mid-write may have left files behind.
        leftover_paths(&path).iter().for_each(|p| remove_quietly(p));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        leftover_paths(&self.path).iter().for_each(|p| remove_quietly(p));
    }
}

/// The artifact plus every scratch file the downloader writes beside it: the in-progress
/// `<name>.part`, and the `<stem>.orig.<ext>` / `<stem>.temp.<ext>` pair used while
/// extracting audio.
fn leftover_paths(path: &Path) -> Vec<PathBuf> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let mut paths = vec![path.to_path_buf(), PathBuf::from(partial)];

    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp3");
        for marker in ["orig", "temp"] {
            paths.push(path.with_file_name(format!("{}.{}.{}", stem, marker, ext)));
        }
    }

    paths
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed temporary file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}

/// Runs `yt-dlp` to download and `ffmpeg` to resample.
pub struct ExternalTools {
    ytdlp_path: PathBuf,
    ffmpeg_path: PathBuf,
}

impl ExternalTools {
    pub fn new(ytdlp_path: impl Into<PathBuf>, ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn from_settings(settings: &PlaybackSettings) -> Self {
        Self::new(&settings.ytdlp_path, &settings.ffmpeg_path)
    }

    fn download_command(&self, locator: &str, artifact: &Path) -> Command {
        let mut cmd = Command::new(&self.ytdlp_path);
        cmd.args(["-x", "--audio-format", "mp3", "--no-playlist", "-o"])
            .arg(artifact)
            .arg("--")
            .arg(locator);
        cmd
    }

    fn transcode_command(&self, artifact: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(artifact)
            .args(["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]);
        cmd
    }
}

#[async_trait]
impl MediaTools for ExternalTools {
    async fn download(&self, locator: &str, artifact: &Path) -> MusicResult<()> {
        debug!("Downloading {} to {}", locator, artifact.display());

        let output = self
            .download_command(locator, artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MusicError::Download(format!("Failed to run downloader: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MusicError::Download(format!(
                "Downloader exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if !artifact.exists() {
            return Err(MusicError::Download(
                "Downloader finished without producing audio".to_string(),
            ));
        }

        Ok(())
    }

    async fn transcode(&self, artifact: &Path) -> MusicResult<PcmStream> {
        debug!("Transcoding {}", artifact.display());

        let mut child = self
            .transcode_command(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MusicError::Transcode(format!("Failed to start transcoder: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MusicError::Transcode("Transcoder has no stdout pipe".to_string())
        })?;

        Ok(PcmStream::from_child(child, stdout))
    }
}
