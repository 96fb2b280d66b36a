//! Fake pipeline dependencies that record how they were driven.

use async_trait::async_trait;
use jukebox::{
    MusicError, MusicResult, PacketCodec, PacketSender, PcmStream, VoiceConnector, VoiceLink,
};
use poise::serenity_prelude::{ChannelId, GuildId};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Counters shared by a connector and every link it hands out.
#[derive(Debug, Default)]
pub struct VoiceStats {
    pub joins: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub packets: AtomicUsize,
}

impl VoiceStats {
    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn packets(&self) -> usize {
        self.packets.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub stats: Arc<VoiceStats>,
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    async fn join(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> MusicResult<Arc<dyn VoiceLink>> {
        self.stats.joins.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeLink {
            channel_id,
            connected: AtomicBool::new(true),
            stats: self.stats.clone(),
        }))
    }
}

/// A link whose outbound packets are drained and counted by a background task.
pub struct FakeLink {
    channel_id: ChannelId,
    connected: AtomicBool,
    stats: Arc<VoiceStats>,
}

#[async_trait]
impl VoiceLink for FakeLink {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_outbound(&self, capacity: usize) -> MusicResult<PacketSender> {
        let (tx, mut rx) = mpsc::channel(capacity);
        let stats = self.stats.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                stats.packets.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(tx)
    }

    async fn disconnect(&self) -> MusicResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks how many sessions hold media at once.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    active: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Media tools that never touch the network.
///
/// Locators starting with `bad` write a partial artifact and fail the download; locators
/// starting with `panic` panic inside it. Anything else yields `frames` frames of silence.
pub struct FakeTools {
    pub frames: usize,
    pub delay: Duration,
    pub downloads: Mutex<Vec<String>>,
    pub artifacts: Mutex<Vec<PathBuf>>,
    pub tracker: Arc<ConcurrencyTracker>,
}

impl FakeTools {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            delay: Duration::from_secs(2),
            downloads: Mutex::new(Vec::new()),
            artifacts: Mutex::new(Vec::new()),
            tracker: Arc::new(ConcurrencyTracker::default()),
        }
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.artifacts.lock().unwrap().clone()
    }
}

#[async_trait]
impl jukebox::MediaTools for FakeTools {
    async fn download(&self, locator: &str, artifact: &Path) -> MusicResult<()> {
        self.tracker.enter();
        self.downloads.lock().unwrap().push(locator.to_string());
        self.artifacts.lock().unwrap().push(artifact.to_path_buf());
        tokio::time::sleep(self.delay).await;

        std::fs::write(artifact, b"partial audio").unwrap();
        if locator.starts_with("bad") {
            self.tracker.exit();
            return Err(MusicError::Download("video unavailable".into()));
        }
        if locator.starts_with("panic") {
            self.tracker.exit();
            panic!("downloader blew up");
        }
        Ok(())
    }

    async fn transcode(&self, artifact: &Path) -> MusicResult<PcmStream> {
        assert!(artifact.exists(), "transcode started without a downloaded artifact");
        let pcm = vec![0u8; self.frames * jukebox::FRAME_BYTES];
        Ok(PcmStream::from_reader(TrackedReader {
            inner: Cursor::new(pcm),
            tracker: self.tracker.clone(),
        }))
    }
}

/// Leaves the tracker when the session drops its PCM stream.
struct TrackedReader {
    inner: Cursor<Vec<u8>>,
    tracker: Arc<ConcurrencyTracker>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.tracker.exit();
    }
}

/// Emits a one-byte packet per frame.
pub struct TinyCodec;

impl PacketCodec for TinyCodec {
    fn encode(&mut self, _pcm: &[i16]) -> MusicResult<Vec<u8>> {
        Ok(vec![0xf8])
    }
}
