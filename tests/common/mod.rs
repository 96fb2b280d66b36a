//! Common test utilities, fixtures, and mocks
//! This module contains shared functionality used across different test categories

pub mod mocks;

use jukebox::{
    Jukebox, PacketCodec, PlaybackSettings, PlayerDeps, PlayerEvent, PlayerEventKind,
    SessionState, SilentNotifier,
};
use mocks::{FakeConnector, FakeTools, TinyCodec, VoiceStats};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Longest a test waits for the next player event before giving up.
const EVENT_WAIT: Duration = Duration::from_secs(60 * 60);

/// A jukebox wired to fakes, plus handles on everything the fakes record.
pub struct Harness {
    pub jukebox: Jukebox,
    pub tools: Arc<FakeTools>,
    pub voice: Arc<VoiceStats>,
    pub events: broadcast::Receiver<PlayerEvent>,
    pub settings: PlaybackSettings,
    _artifact_dir: TempDir,
}

impl Harness {
    pub fn new(tools: FakeTools) -> Self {
        let artifact_dir = tempfile::tempdir().expect("Failed to create artifact dir");
        let settings = PlaybackSettings {
            artifact_dir: artifact_dir.path().to_path_buf(),
            ..PlaybackSettings::default()
        };
        let connector = FakeConnector::default();
        let voice = connector.stats.clone();
        let tools = Arc::new(tools);

        let jukebox = Jukebox::new(PlayerDeps {
            connector: Arc::new(connector),
            tools: tools.clone(),
            notifier: Arc::new(SilentNotifier),
            codec: Arc::new(|| Ok(Box::new(TinyCodec) as Box<dyn PacketCodec>)),
            settings: settings.clone(),
        });
        let events = jukebox.subscribe();

        Self {
            jukebox,
            tools,
            voice,
            events,
            settings,
            _artifact_dir: artifact_dir,
        }
    }

    /// Waits for the next event matching `pred`, skipping everything else.
    pub async fn wait_for(
        &mut self,
        pred: impl Fn(&PlayerEventKind) -> bool,
    ) -> PlayerEventKind {
        loop {
            let event = tokio::time::timeout(EVENT_WAIT, self.events.recv())
                .await
                .expect("Timed out waiting for a player event")
                .expect("Player event channel closed");
            if pred(&event.kind) {
                return event.kind;
            }
        }
    }

    /// Waits for `count` sessions to end and returns their locators with their final state.
    pub async fn finished_sessions(&mut self, count: usize) -> Vec<(String, SessionState)> {
        let mut finished = Vec::with_capacity(count);
        while finished.len() < count {
            let kind = self
                .wait_for(|kind| {
                    matches!(
                        kind,
                        PlayerEventKind::StateChanged {
                            state: SessionState::Idle | SessionState::Failed,
                            ..
                        }
                    )
                })
                .await;
            if let PlayerEventKind::StateChanged { locator, state } = kind {
                finished.push((locator, state));
            }
        }
        finished
    }

    pub async fn disconnected(&mut self) {
        self.wait_for(|kind| matches!(kind, PlayerEventKind::Disconnected))
            .await;
    }
}
