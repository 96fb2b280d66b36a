use poise::serenity_prelude as serenity;
use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::disconnect_timer::DisconnectTimer;
use super::events::{PlayerEvent, PlayerEventKind, SessionState};
use super::music_manager::{MusicError, PlayerDeps};
use super::playback_session::{PlaybackSession, SessionReport};
use super::voice::VoiceLink;

/// Consecutive failed sessions after which every further failure is logged as an error.
const FAILURE_STREAK_ALERT: u32 = 3;

/// One resolved play request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub guild_id: GuildId,
    pub voice_channel_id: ChannelId,
    /// Text channel the request was made in; "now playing" notices go here.
    pub text_channel_id: ChannelId,
    pub media_locator: String,
}

impl QueueEntry {
    pub fn new(
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        text_channel_id: ChannelId,
        media_locator: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            voice_channel_id,
            text_channel_id,
            media_locator: media_locator.into(),
        }
    }
}

/// FIFO of pending entries. Appends go to the tail, removals come from the head.
#[derive(Debug, Default)]
pub struct SongQueue {
    entries: VecDeque<QueueEntry>,
}

impl SongQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its 1-based position.
    pub fn push(&mut self, entry: QueueEntry) -> usize {
        self.entries.push_back(entry);
        self.entries.len()
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Randomly permutes the pending entries and returns how many there were.
    pub fn shuffle(&mut self) -> usize {
        self.entries.make_contiguous().shuffle(&mut rand::rng());
        self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Counts back-to-back failed sessions.
#[derive(Debug, Default)]
pub(crate) struct FailureStreak {
    count: u32,
}

impl FailureStreak {
    /// Records a session outcome and returns the streak length once it reaches the alert level.
    pub(crate) fn record(&mut self, succeeded: bool) -> Option<u32> {
        if succeeded {
            self.count = 0;
            return None;
        }
        self.count += 1;
        (self.count >= FAILURE_STREAK_ALERT).then_some(self.count)
    }
}

/// Messages accepted by a guild's player task.
pub(crate) enum PlayerCommand {
    Enqueue(QueueEntry),
    Shuffle(oneshot::Sender<usize>),
    Pending(oneshot::Sender<Vec<QueueEntry>>),
    SessionFinished(SessionReport),
    IdleTimeout(u64),
}

/// Drives playback for one guild.
///
/// The task exclusively owns the queue, the playing flag, the voice link and the idle timer;
/// everything else talks to it through its mailbox, so all mutations are serialized.
pub(crate) struct GuildPlayer {
    guild_id: GuildId,
    queue: SongQueue,
    playing_active: bool,
    link: Option<Arc<dyn VoiceLink>>,
    idle_locator: Option<String>,
    timer: DisconnectTimer,
    failures: FailureStreak,
    deps: Arc<PlayerDeps>,
    events: broadcast::Sender<PlayerEvent>,
    mailbox: mpsc::UnboundedReceiver<PlayerCommand>,
    mailbox_tx: mpsc::WeakUnboundedSender<PlayerCommand>,
}

impl GuildPlayer {
    /// Starts the player task and returns its mailbox.
    pub(crate) fn spawn(
        guild_id: GuildId,
        deps: Arc<PlayerDeps>,
        events: broadcast::Sender<PlayerEvent>,
    ) -> mpsc::UnboundedSender<PlayerCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = Self {
            guild_id,
            queue: SongQueue::new(),
            playing_active: false,
            link: None,
            idle_locator: None,
            timer: DisconnectTimer::new(),
            failures: FailureStreak::default(),
            deps,
            events,
            mailbox: rx,
            mailbox_tx: tx.downgrade(),
        };

        info!("Starting player for guild {}", guild_id);
        tokio::spawn(player.run());
        tx
    }

    async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            match command {
                PlayerCommand::Enqueue(entry) => self.enqueue(entry),
                PlayerCommand::Shuffle(reply) => {
                    let shuffled = self.queue.shuffle();
                    info!("Shuffled {} pending entries for guild {}", shuffled, self.guild_id);
                    let _ = reply.send(shuffled);
                }
                PlayerCommand::Pending(reply) => {
                    let _ = reply.send(self.queue.snapshot());
                }
                PlayerCommand::SessionFinished(report) => self.session_finished(report),
                PlayerCommand::IdleTimeout(generation) => self.idle_timeout(generation).await,
            }
        }

        debug!("Player for guild {} stopped", self.guild_id);
    }

    fn enqueue(&mut self, entry: QueueEntry) {
        let locator = entry.media_locator.clone();
        let position = self.queue.push(entry);
        debug!("Queued {} at position {} in guild {}", locator, position, self.guild_id);
        self.emit(PlayerEventKind::Queued { locator, position });
        self.run_if_idle();
    }

    /// Starts a session for the head of the queue unless one is already running.
    fn run_if_idle(&mut self) {
        if self.playing_active {
            return;
        }
        if self.queue.is_empty() {
            debug!("Queue drained for guild {}", self.guild_id);
            return;
        }
        let Some(reply) = self.mailbox_tx.upgrade() else {
            return;
        };
        let Some(entry) = self.queue.pop() else {
            return;
        };

        self.playing_active = true;
        self.timer.cancel();
        self.idle_locator = None;
        info!("Playing {} in guild {}", entry.media_locator, self.guild_id);
        self.emit(PlayerEventKind::SessionStarted {
            locator: entry.media_locator.clone(),
        });

        let link = self.link.clone();
        let session = PlaybackSession::new(entry.clone(), self.deps.clone(), self.events.clone());
        let tracker = session.tracker();

        tokio::spawn(async move {
            let report = match tokio::spawn(session.run(link)).await {
                Ok(report) => report,
                // Keep whatever connection the session had opened so it is still released.
                Err(e) => SessionReport {
                    entry,
                    link: tracker.current(),
                    outcome: Err(MusicError::Transport(format!(
                        "Session task aborted: {}",
                        e
                    ))),
                },
            };
            let _ = reply.send(PlayerCommand::SessionFinished(report));
        });
    }

    fn session_finished(&mut self, report: SessionReport) {
        self.playing_active = false;
        self.link = report.link;
        let locator = report.entry.media_locator;

        if let Err(err) = &report.outcome {
            warn!("Skipping {} in guild {}: {}", locator, self.guild_id, err);
        }
        if let Some(streak) = self.failures.record(report.outcome.is_ok()) {
            error!(
                "{} consecutive playback failures in guild {}",
                streak, self.guild_id
            );
        }

        if self.link.is_some() {
            self.arm_idle_timer();
            self.idle_locator = Some(locator);
        }

        self.run_if_idle();
    }

    fn arm_idle_timer(&mut self) {
        let mailbox = self.mailbox_tx.clone();
        self.timer
            .arm(self.deps.settings.idle_timeout, move |generation| async move {
                if let Some(tx) = mailbox.upgrade() {
                    let _ = tx.send(PlayerCommand::IdleTimeout(generation));
                }
            });
    }

    async fn idle_timeout(&mut self, generation: u64) {
        if self.playing_active || !self.timer.is_current(generation) {
            debug!("Ignoring stale idle timer #{} in guild {}", generation, self.guild_id);
            return;
        }
        self.timer.clear();

        let Some(link) = self.link.take() else {
            return;
        };
        let locator = self.idle_locator.take().unwrap_or_default();

        info!("Idle window elapsed in guild {}, disconnecting", self.guild_id);
        self.emit(PlayerEventKind::StateChanged {
            locator: locator.clone(),
            state: SessionState::Disconnecting,
        });
        if let Err(e) = link.disconnect().await {
            warn!("Failed to disconnect from channel in guild {}: {}", self.guild_id, e);
        }
        self.emit(PlayerEventKind::StateChanged {
            locator,
            state: SessionState::Closed,
        });
        self.emit(PlayerEventKind::Disconnected);
    }

    fn emit(&self, kind: PlayerEventKind) {
        let _ = self.events.send(PlayerEvent {
            guild_id: self.guild_id,
            kind,
        });
    }
}
