//! End-to-end scenarios spanning config, room scheduling, listener
//! classification, and recorder lifecycle together, rather than one
//! module in isolation.

use std::sync::Arc;
use std::time::Duration;

use roomwatch_core::adapter::test_support::{PlaceholderAdapter, StubAdapter};
use roomwatch_core::adapter::{AdapterError, RoomAdapter, RoomInfo};
use roomwatch_core::config::{Config, OverridableConfig, PlatformOverrideConfig, RoomConfig};
use roomwatch_core::event_bus::{Event, EventBus};
use roomwatch_core::ids::RoomId;
use roomwatch_core::rate_limiter::RateLimiter;
use roomwatch_core::recorder::test_support::MockDownloader;
use roomwatch_core::recorder::{new_manager as new_recorder_manager, RecorderManager};
use roomwatch_core::reconciler::{AdapterFactory, Reconciler};
use roomwatch_core::room::{new_registry, RoomRegistry};

use base::shutdown;

struct SingleAdapterFactory {
    adapter: std::sync::Mutex<Option<Arc<dyn RoomAdapter>>>,
}

impl AdapterFactory for SingleAdapterFactory {
    fn create(&self, platform_key: &str, _room: &RoomConfig) -> Arc<dyn RoomAdapter> {
        self.adapter
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Arc::new(PlaceholderAdapter::new(platform_key)))
    }
}

fn harness(
    adapter: Arc<dyn RoomAdapter>,
) -> (Reconciler, Arc<RoomRegistry>, Arc<RecorderManager>, Arc<EventBus>, shutdown::Sender) {
    let rooms = new_registry();
    let recorders = new_recorder_manager();
    let rate_limiter = Arc::new(RateLimiter::new());
    let event_bus = Arc::new(EventBus::default());
    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let factory = Arc::new(SingleAdapterFactory {
        adapter: std::sync::Mutex::new(Some(adapter)),
    });
    let reconciler = Reconciler::new(
        rooms.clone(),
        recorders.clone(),
        rate_limiter,
        event_bus.clone(),
        factory,
        Arc::new(MockDownloader::success()),
        shutdown_rx,
    );
    (reconciler, rooms, recorders, event_bus, shutdown_tx)
}

fn offline_info() -> RoomInfo {
    RoomInfo {
        is_live: false,
        ..Default::default()
    }
}

fn live_info(room_name: &str) -> RoomInfo {
    RoomInfo {
        is_live: true,
        room_name: room_name.to_string(),
        available_streams_at: 1,
        available_streams: vec![roomwatch_core::adapter::StreamVariant {
            url: "https://cdn.example.com/stream.flv".to_string(),
            is_placeholder: false,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Scenario 1: single-room happy path. An adapter stub offline for a
/// while, then live, should yield exactly one `LiveStatusChanged` to
/// `Live` and a recording start.
#[tokio::test(start_paused = true)]
async fn single_room_happy_path_starts_exactly_one_recording() {
    let mut script: Vec<Result<RoomInfo, AdapterError>> = (0..5).map(|_| Ok(offline_info())).collect();
    script.push(Ok(live_info("R")));
    let adapter = Arc::new(StubAdapter::new("bilibili", script));

    let (reconciler, rooms, recorders, event_bus, _shutdown_tx) = harness(adapter);
    let reconciler = Arc::new(reconciler);

    let mut platform_overrides = std::collections::HashMap::new();
    platform_overrides.insert(
        "bilibili".to_string(),
        PlatformOverrideConfig {
            overrides: OverridableConfig::default(),
            min_access_interval_sec: Some(1),
        },
    );
    let config = Config {
        version: 1,
        platform_overrides,
        rooms: vec![RoomConfig {
            url: "https://live.bilibili.com/123".to_string(),
            listening: true,
            quality: None,
            audio_only: false,
            nick: None,
            overrides: OverridableConfig {
                interval_sec: Some(1),
                ..Default::default()
            },
        }],
        ..Default::default()
    };
    let (_config_tx, config_rx) = tokio::sync::watch::channel(Arc::new(config));

    let mut events = event_bus.subscribe();
    let run_handle = tokio::spawn(reconciler.clone().run(config_rx));

    let mut live_transitions = 0;
    let mut recording_starts = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        tokio::time::advance(Duration::from_millis(500)).await;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::LiveStatusChanged { to, .. } if to == roomwatch_core::listener::LiveStatus::Live => {
                    live_transitions += 1;
                }
                Event::RecordingStarted { .. } => recording_starts += 1,
                _ => {}
            }
        }
        if recording_starts > 0 {
            break;
        }
    }

    assert_eq!(live_transitions, 1, "room should go live exactly once");
    assert_eq!(recording_starts, 1, "recording should start exactly once");
    assert_eq!(rooms.len(), 1);
    assert_eq!(recorders.len(), 1);

    run_handle.abort();
}

/// Scenario 3: two concurrent CAS updates against the same base version
/// produce exactly one success and one conflict; a following
/// `update_with_retry` still succeeds.
#[tokio::test]
async fn concurrent_cas_updates_yield_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(roomwatch_core::config::ConfigStore::init(dir.path().join("config.yaml")).unwrap());
    let base_version = store.current().version;

    let store_a = store.clone();
    let store_b = store.clone();
    let a = tokio::spawn(async move {
        store_a
            .update_cas(base_version, |c| {
                c.rooms.push(RoomConfig {
                    url: "https://live.bilibili.com/1".to_string(),
                    listening: true,
                    quality: None,
                    audio_only: false,
                    nick: None,
                    overrides: OverridableConfig::default(),
                })
            })
            .await
    });
    let b = tokio::spawn(async move {
        store_b
            .update_cas(base_version, |c| {
                c.rooms.push(RoomConfig {
                    url: "https://www.douyu.com/2".to_string(),
                    listening: true,
                    quality: None,
                    audio_only: false,
                    nick: None,
                    overrides: OverridableConfig::default(),
                })
            })
            .await
    });

    let (a, b) = tokio::join!(a, b);
    let results = [a.unwrap(), b.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);

    let winner = results.into_iter().find_map(|r| r.ok()).unwrap();
    assert_eq!(winner.version, base_version + 1);
    assert_eq!(winner.rooms.len(), 1);

    let published = store
        .update_with_retry(5, |c| {
            c.rooms.push(RoomConfig {
                url: "https://www.huya.com/3".to_string(),
                listening: true,
                quality: None,
                audio_only: false,
                nick: None,
                overrides: OverridableConfig::default(),
            })
        })
        .await
        .unwrap();
    assert_eq!(published.version, base_version + 2);
    assert_eq!(published.rooms.len(), 2);
}

/// Scenario 4: a room first registered under its URL-derived id gets
/// re-keyed to the platform-native id its adapter reports on the first
/// successful poll, with no duplicate entry left behind.
#[tokio::test(start_paused = true)]
async fn room_is_rekeyed_to_native_id_after_first_poll() {
    let info = RoomInfo {
        is_live: false,
        room_id: "custom_live_id".to_string(),
        ..Default::default()
    };
    let script: Vec<Result<RoomInfo, AdapterError>> = (0..10).map(|_| Ok(info.clone())).collect();
    let adapter = Arc::new(StubAdapter::new("bilibili", script));
    let (reconciler, rooms, _recorders, _event_bus, _shutdown_tx) = harness(adapter);
    let reconciler = Arc::new(reconciler);

    let url_id = RoomId::from_url("https://live.bilibili.com/1").unwrap();
    let config = Config {
        version: 1,
        rooms: vec![RoomConfig {
            url: "https://live.bilibili.com/1".to_string(),
            listening: true,
            quality: None,
            audio_only: false,
            nick: None,
            overrides: OverridableConfig {
                interval_sec: Some(1),
                ..Default::default()
            },
        }],
        ..Default::default()
    };
    let (config_tx, config_rx) = tokio::sync::watch::channel(Arc::new(config.clone()));

    let run_handle = tokio::spawn(reconciler.clone().run(config_rx));
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;

    let native_id = RoomId::native("custom_live_id");
    assert!(rooms.contains(&native_id), "room should be filed under its native id");
    assert!(!rooms.contains(&url_id), "url-derived id should no longer be a live key");
    assert_eq!(rooms.len(), 1, "rekeying must not leave a duplicate entry");

    // Reconciling the same config snapshot again (as a config-change
    // event would trigger) must not re-register the room a second time
    // under its original url-derived id.
    config_tx.send(Arc::new(config)).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert_eq!(rooms.len(), 1, "reconciling again must stay idempotent after a rekey");

    run_handle.abort();
}

/// Scenario 6: removing a room from config while its scheduler is
/// mid-poll should tear it down promptly, with no dangling registry
/// entry.
#[tokio::test(start_paused = true)]
async fn room_removed_during_poll_is_torn_down() {
    let script: Vec<Result<RoomInfo, AdapterError>> = (0..20).map(|_| Ok(offline_info())).collect();
    let adapter = Arc::new(StubAdapter::new("bilibili", script));
    let (reconciler, rooms, _recorders, _event_bus, _shutdown_tx) = harness(adapter);
    let reconciler = Arc::new(reconciler);

    let config = Config {
        version: 1,
        rooms: vec![RoomConfig {
            url: "https://live.bilibili.com/1".to_string(),
            listening: true,
            quality: None,
            audio_only: false,
            nick: None,
            overrides: OverridableConfig {
                interval_sec: Some(1),
                ..Default::default()
            },
        }],
        ..Default::default()
    };
    let (config_tx, config_rx) = tokio::sync::watch::channel(Arc::new(config));

    let run_handle = tokio::spawn(reconciler.clone().run(config_rx));
    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(rooms.len(), 1);

    config_tx.send(Arc::new(Config::default())).unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(600)).await;
    tokio::task::yield_now().await;

    assert_eq!(rooms.len(), 0, "room should be removed once no longer in config");
    run_handle.abort();
}
