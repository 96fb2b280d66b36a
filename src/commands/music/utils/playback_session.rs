//! One play cycle: join voice, download, transcode and stream a single queue entry.

use futures::StreamExt;
use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::commands::music::audio_sources::TempArtifact;

use super::events::{PlayerEvent, PlayerEventKind, SessionState};
use super::frame_encoder::{FrameEncoder, PacketCodec};
use super::music_manager::{MusicError, MusicResult, PlayerDeps};
use super::queue_manager::QueueEntry;
use super::voice::{PacketSender, VoiceLink};

/// What a finished session hands back to its driver.
pub struct SessionReport {
    pub entry: QueueEntry,
    /// The voice connection the guild should keep using, if one is open.
    pub link: Option<Arc<dyn VoiceLink>>,
    pub outcome: MusicResult<()>,
}

/// The voice link a session currently holds.
///
/// Readable by the driver even if the session task dies before reporting.
#[derive(Clone, Default)]
pub struct LinkTracker(Arc<Mutex<Option<Arc<dyn VoiceLink>>>>);

impl LinkTracker {
    fn set(&self, link: Option<Arc<dyn VoiceLink>>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = link;
    }

    pub fn current(&self) -> Option<Arc<dyn VoiceLink>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct PlaybackSession {
    entry: QueueEntry,
    deps: Arc<PlayerDeps>,
    events: broadcast::Sender<PlayerEvent>,
    state: SessionState,
    tracker: LinkTracker,
}

impl PlaybackSession {
    pub fn new(
        entry: QueueEntry,
        deps: Arc<PlayerDeps>,
        events: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        Self {
            entry,
            deps,
            events,
            state: SessionState::Joining,
            tracker: LinkTracker::default(),
        }
    }

    /// Handle on the link this session holds.
    pub fn tracker(&self) -> LinkTracker {
        self.tracker.clone()
    }

    /// Runs the session to completion, reusing `existing` when it still serves the entry's channel.
    pub async fn run(mut self, existing: Option<Arc<dyn VoiceLink>>) -> SessionReport {
        self.tracker.set(existing.clone());
        self.transition(SessionState::Joining);

        let link = match self.join(existing.clone()).await {
            Ok(link) => link,
            Err(err) => return self.fail(err, existing),
        };
        self.tracker.set(Some(link.clone()));

        match self.play(&link).await {
            Ok(()) => {
                self.transition(SessionState::Idle);
                SessionReport {
                    entry: self.entry,
                    link: Some(link),
                    outcome: Ok(()),
                }
            }
            Err(err) => self.fail(err, Some(link)),
        }
    }

    async fn join(
        &self,
        existing: Option<Arc<dyn VoiceLink>>,
    ) -> MusicResult<Arc<dyn VoiceLink>> {
        if let Some(link) = existing {
            if link.channel_id() == self.entry.voice_channel_id && link.is_connected().await {
                debug!("Reusing voice connection in guild {}", self.entry.guild_id);
                return Ok(link);
            }
        }

        self.deps
            .connector
            .join(self.entry.guild_id, self.entry.voice_channel_id)
            .await
    }

    async fn play(&mut self, link: &Arc<dyn VoiceLink>) -> MusicResult<()> {
        let deps = self.deps.clone();
        let settings = &deps.settings;
        let locator = self.entry.media_locator.clone();

        self.transition(SessionState::Downloading);
        let artifact = TempArtifact::new(settings.artifact_path(self.entry.guild_id.get()));
        tokio::time::timeout(
            settings.download_timeout,
            deps.tools.download(&locator, artifact.path()),
        )
        .await
        .map_err(|_| {
            MusicError::Download(format!(
                "Download timed out after {:?}",
                settings.download_timeout
            ))
        })??;

        self.transition(SessionState::Streaming);
        let notifier = deps.notifier.clone();
        let entry = self.entry.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.now_playing(&entry).await {
                warn!("Failed to send now-playing notice: {}", e);
            }
        });

        let mut pcm = deps.tools.transcode(artifact.path()).await?;
        let outbound = link.open_outbound(settings.outbound_buffer).await?;
        let codec = (deps.codec)()?;

        let sent = stream_packets(&mut pcm, codec, &outbound, settings.stall_timeout).await?;
        drop(outbound);
        pcm.finish().await?;
        drop(artifact);

        info!("Finished streaming {} ({} packets)", locator, sent);
        Ok(())
    }

    fn fail(mut self, err: MusicError, link: Option<Arc<dyn VoiceLink>>) -> SessionReport {
        warn!(
            "Playback of {} failed while {}: {}",
            self.entry.media_locator, self.state, err
        );
        self.transition(SessionState::Failed);
        SessionReport {
            entry: self.entry,
            link,
            outcome: Err(err),
        }
    }

    fn transition(&mut self, state: SessionState) {
        debug!(
            "Session for {} in guild {}: {} -> {}",
            self.entry.media_locator, self.entry.guild_id, self.state, state
        );
        self.state = state;
        let _ = self.events.send(PlayerEvent {
            guild_id: self.entry.guild_id,
            kind: PlayerEventKind::StateChanged {
                locator: self.entry.media_locator.clone(),
                state,
            },
        });
    }
}

/// Encodes `pcm` frame by frame and hands each packet to the transport,
/// waiting whenever it is full.
async fn stream_packets<R: AsyncRead + Unpin>(
    pcm: R,
    codec: Box<dyn PacketCodec>,
    outbound: &PacketSender,
    stall_timeout: Duration,
) -> MusicResult<usize> {
    let mut packets = pin!(FrameEncoder::new(pcm, codec).into_stream());
    let mut sent = 0;

    loop {
        let next = tokio::time::timeout(stall_timeout, packets.next())
            .await
            .map_err(|_| {
                MusicError::Transcode(format!("No audio received for {:?}", stall_timeout))
            })?;
        let Some(packet) = next else {
            break;
        };

        outbound
            .send(packet?)
            .await
            .map_err(|_| {
                MusicError::Transport("Voice transport closed the packet channel".into())
            })?;
        sent += 1;
    }

    Ok(sent)
}
