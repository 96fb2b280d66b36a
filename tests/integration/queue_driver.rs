use crate::common::Harness;
use crate::common::fixtures::{entry, guild, playlist_page};
use crate::common::mocks::FakeTools;
use crate::test_utils;
use jukebox::{CatalogSettings, QueueEntry, SessionState, YoutubeCatalog, enqueue_locators};
use poise::serenity_prelude::{ChannelId, GuildId};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::Instant;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IDLE: Duration = Duration::from_secs(15 * 60);

fn finished(items: &[(&str, SessionState)]) -> Vec<(String, SessionState)> {
    items
        .iter()
        .map(|(locator, state)| (locator.to_string(), *state))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn plays_entries_in_order_one_at_a_time() {
    test_utils::init();
    let mut h = Harness::new(FakeTools::new(3));

    for locator in ["a", "b", "c"] {
        h.jukebox.enqueue(entry(locator)).unwrap();
    }

    assert_eq!(
        h.finished_sessions(3).await,
        finished(&[
            ("a", SessionState::Idle),
            ("b", SessionState::Idle),
            ("c", SessionState::Idle)
        ])
    );
    assert_eq!(h.tools.downloads(), vec!["a", "b", "c"]);
    assert_eq!(h.tools.tracker.max(), 1);
    assert_eq!(h.voice.joins(), 1);

    // Let the fake transport drain what is still buffered.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.voice.packets(), 9);
}

#[tokio::test(start_paused = true)]
async fn pending_lists_entries_behind_the_playing_one() {
    let h = Harness::new(FakeTools::new(1));

    for locator in ["a", "b", "c"] {
        h.jukebox.enqueue(entry(locator)).unwrap();
    }
    let pending: Vec<String> = h
        .jukebox
        .pending(guild())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.media_locator)
        .collect();

    assert_eq!(pending, vec!["b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn shuffle_only_touches_pending_entries() {
    let mut h = Harness::new(FakeTools::new(1));

    h.jukebox.enqueue(entry("first")).unwrap();
    for i in 0..20 {
        h.jukebox.enqueue(entry(&i.to_string())).unwrap();
    }
    assert_eq!(h.jukebox.shuffle(guild()).await.unwrap(), 20);

    let mut pending: Vec<u32> = h
        .jukebox
        .pending(guild())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.media_locator.parse().unwrap())
        .collect();
    pending.sort();
    assert_eq!(pending, (0..20).collect::<Vec<_>>());

    let sessions = h.finished_sessions(21).await;
    assert_eq!(sessions[0].0, "first");
    assert_eq!(h.tools.tracker.max(), 1);
}

#[tokio::test(start_paused = true)]
async fn shuffle_and_pending_without_a_player_are_empty() {
    let h = Harness::new(FakeTools::new(1));

    assert_eq!(h.jukebox.shuffle(GuildId::new(404)).await.unwrap(), 0);
    assert!(h.jukebox.pending(GuildId::new(404)).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_entry_does_not_block_the_next_one() {
    test_utils::init();
    let mut h = Harness::new(FakeTools::new(2));

    h.jukebox.enqueue(entry("bad-video")).unwrap();
    h.jukebox.enqueue(entry("good-video")).unwrap();

    assert_eq!(
        h.finished_sessions(2).await,
        finished(&[
            ("bad-video", SessionState::Failed),
            ("good-video", SessionState::Idle)
        ])
    );
    // The connection made for the failed entry is reused.
    assert_eq!(h.voice.joins(), 1);
    for artifact in h.tools.artifacts() {
        assert_eq!(artifact, h.settings.artifact_path(guild().get()));
        assert!(!artifact.exists(), "{} was left behind", artifact.display());
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_session_does_not_stall_the_queue() {
    let mut h = Harness::new(FakeTools::new(1));

    h.jukebox.enqueue(entry("panic-video")).unwrap();
    h.jukebox.enqueue(entry("after")).unwrap();

    assert_eq!(
        h.finished_sessions(1).await,
        finished(&[("after", SessionState::Idle)])
    );
    // The connection opened before the panic carries over.
    assert_eq!(h.voice.joins(), 1);
    assert!(!h.settings.artifact_path(guild().get()).exists());
}

#[tokio::test(start_paused = true)]
async fn connection_is_released_after_a_session_panics() {
    let mut h = Harness::new(FakeTools::new(1));

    h.jukebox.enqueue(entry("panic-video")).unwrap();
    h.disconnected().await;

    assert_eq!(h.voice.joins(), 1);
    assert_eq!(h.voice.disconnects(), 1);
    assert!(h.jukebox.pending(guild()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_connection_is_reused_then_released_after_the_window() {
    test_utils::init();
    let mut h = Harness::new(FakeTools::new(1));

    h.jukebox.enqueue(entry("a")).unwrap();
    h.finished_sessions(1).await;

    // Come back well inside the idle window.
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    assert_eq!(h.voice.disconnects(), 0);

    h.jukebox.enqueue(entry("b")).unwrap();
    h.finished_sessions(1).await;
    let last_session_ended = Instant::now();
    assert_eq!(h.voice.joins(), 1);

    h.disconnected().await;
    let waited = last_session_ended.elapsed();
    assert!(
        waited >= IDLE && waited < IDLE + Duration::from_secs(1),
        "disconnected after {:?}",
        waited
    );
    assert_eq!(h.voice.disconnects(), 1);

    // The timer armed after the first session must never fire.
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(h.voice.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn request_after_disconnect_joins_again() {
    let mut h = Harness::new(FakeTools::new(1));

    h.jukebox.enqueue(entry("a")).unwrap();
    h.finished_sessions(1).await;
    h.disconnected().await;

    h.jukebox.enqueue(entry("b")).unwrap();
    h.finished_sessions(1).await;

    assert_eq!(h.voice.joins(), 2);
}

#[tokio::test(start_paused = true)]
async fn guilds_play_independently() {
    let mut h = Harness::new(FakeTools::new(1));
    let other = QueueEntry::new(
        GuildId::new(2),
        ChannelId::new(20),
        ChannelId::new(21),
        "elsewhere",
    );

    h.jukebox.enqueue(entry("here")).unwrap();
    h.jukebox.enqueue(other).unwrap();

    let mut sessions = h.finished_sessions(2).await;
    sessions.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        sessions,
        finished(&[
            ("elsewhere", SessionState::Idle),
            ("here", SessionState::Idle)
        ])
    );
    assert_eq!(h.tools.tracker.max(), 2);
    assert_eq!(h.voice.joins(), 2);
}

#[tokio::test]
async fn playlist_entries_are_queued_in_playlist_order() {
    test_utils::init();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/playlistItems"))
        .and(query_param("playlistId", "PLmix"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(playlist_page(&["one", "two"], Some("p2"))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/playlistItems"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(playlist_page(&["three"], None)))
        .mount(&server)
        .await;

    let catalog = YoutubeCatalog::new(
        &CatalogSettings {
            base_url: server.uri(),
            ..CatalogSettings::default()
        },
        Some("test-key".to_string()),
    );
    let mut tools = FakeTools::new(1);
    tools.delay = Duration::from_millis(10);
    let mut h = Harness::new(tools);

    let summary = enqueue_locators(
        catalog.playlist("https://www.youtube.com/playlist?list=PLmix"),
        |locator| h.jukebox.enqueue(entry(&locator)),
    )
    .await;

    assert_eq!(summary.queued, 3);
    assert!(summary.error.is_none());
    let played: Vec<String> = h
        .finished_sessions(3)
        .await
        .into_iter()
        .map(|(locator, _)| locator)
        .collect();
    assert_eq!(
        played,
        vec![
            "https://www.youtube.com/watch?v=one",
            "https://www.youtube.com/watch?v=two",
            "https://www.youtube.com/watch?v=three"
        ]
    );
}
