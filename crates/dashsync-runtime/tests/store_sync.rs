mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingRemote;
use dashsync_layout::{
    GridAction, GridView, UpdateSource, WidgetEntry, WidgetId, WidgetRegistry, WidgetTypeInfo,
};
use dashsync_runtime::store::{
    FileCache, KeyedStore, MemoryCache, OutboundQueue, RemotePush, RemoteValue, StoreChange,
    SyncWorker, LAYOUT_KEY,
};
use dashsync_runtime::{ManualClock, SyncConfig, SyncError};
use parking_lot::Mutex;
use serde_json::json;
use smol_str::SmolStr;

fn open(session: &str, clock: &ManualClock) -> (KeyedStore, OutboundQueue) {
    KeyedStore::open(session, MemoryCache::new(), clock.clone())
}

fn record(store: &KeyedStore) -> (dashsync_runtime::Subscription, Arc<Mutex<Vec<StoreChange>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = store.subscribe(move |change| sink.lock().push(change.clone()));
    (subscription, seen)
}

#[tokio::test(flavor = "current_thread")]
async fn theme_survives_older_remote_push() {
    let clock = ManualClock::new(10_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let mut worker = SyncWorker::new(&store, queue, remote.clone());

    store.set("theme", "ocean").expect("set");
    assert_eq!(store.get("theme", String::new()), "ocean");
    assert_eq!(worker.flush().await, 1);
    assert_eq!(remote.value("theme"), Some(json!("ocean")));

    let older = RemotePush::keys(vec![RemoteValue::new("theme", json!("slate"), 9_000)]);
    assert_eq!(store.apply_remote(older), None);
    assert_eq!(store.get("theme", String::new()), "ocean");
}

#[tokio::test(flavor = "current_thread")]
async fn newer_foreign_push_cancels_queued_local_write() {
    let clock = ManualClock::new(1_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let mut worker = SyncWorker::new(&store, queue, remote.clone());

    store.set("theme", "ocean").expect("set");
    store.set("privacy", &true).expect("set");
    let newer = remote.external_write("theme", json!("slate"), 2_000);
    let older = remote.external_write("privacy", json!(false), 500);
    store.apply_remote(newer).expect("theme replaced");
    assert_eq!(store.apply_remote(older), None);
    assert_eq!(store.get("theme", String::new()), "slate");
    assert_eq!(store.pending_keys(), vec![SmolStr::from("privacy")]);

    assert_eq!(worker.flush().await, 1);
    let keys: Vec<SmolStr> = remote.writes().into_iter().map(|write| write.key).collect();
    assert_eq!(keys, vec![SmolStr::from("privacy")]);
    assert_eq!(remote.value("theme"), Some(json!("slate")));
    assert_eq!(remote.value("privacy"), Some(json!(true)));
    assert!(store.pending_keys().is_empty());
    assert!(store.failed_keys().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn echo_of_local_write_fires_no_notification() {
    let clock = ManualClock::new(10_000);
    let (store, queue) = open("tab-a", &clock);
    let mut worker = SyncWorker::new(&store, queue, RecordingRemote::new());
    let (_subscription, seen) = record(&store);

    store.set("privacy", &true).expect("set");
    worker.flush().await;
    let echo = RemotePush::keys(vec![RemoteValue::new("privacy", json!(true), 10_000)]);
    assert_eq!(store.apply_remote(echo), None);

    let changes = seen.lock().clone();
    assert_eq!(changes.len(), 1);
    assert!(!changes[0].is_remote);
    assert!(store.pending_keys().is_empty());
}

#[test]
fn last_writer_wins_regardless_of_arrival_order() {
    let first = RemoteValue::new("theme", json!("slate"), 100);
    let second = RemoteValue::new("theme", json!("rose"), 200);
    for order in [[&first, &second], [&second, &first]] {
        let clock = ManualClock::new(0);
        let (store, _queue) = open("tab-a", &clock);
        for value in order {
            store.apply_remote(RemotePush::keys(vec![value.clone()]));
        }
        assert_eq!(store.get("theme", String::new()), "rose");
    }
}

#[test]
fn foreign_push_notifies_with_changed_keys() {
    let clock = ManualClock::new(0);
    let (store, _queue) = open("tab-a", &clock);
    let (_subscription, seen) = record(&store);
    let push = RecordingRemote::new().external_write("theme", json!("rose"), 50);
    let change = store.apply_remote(push).expect("change");
    assert!(change.is_remote);
    assert_eq!(change.changed_keys, Some(vec![SmolStr::from("theme")]));
    assert_eq!(seen.lock().as_slice(), &[change]);
    assert_eq!(store.remote_version(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn queued_writes_for_one_key_coalesce() {
    let clock = ManualClock::new(1_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let mut worker = SyncWorker::new(&store, queue, remote.clone());

    store.set("theme", "slate").expect("set");
    clock.advance(5);
    store.set("privacy", &false).expect("set");
    store.set("theme", "rose").expect("set");
    store.set("theme", "ocean").expect("set");

    assert_eq!(worker.flush().await, 2);
    let writes = remote.writes();
    let keys: Vec<&str> = writes.iter().map(|write| write.key.as_str()).collect();
    assert_eq!(keys, vec!["theme", "privacy"]);
    assert_eq!(writes[0].value, Some(json!("ocean")));
    assert!(store.pending_keys().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn failed_write_keeps_local_value_and_retries() {
    let clock = ManualClock::new(1_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let mut worker = SyncWorker::new(&store, queue, remote.clone());
    let mut failures = store.failures();

    remote.fail_next(SyncError::Network("timeout".into()));
    store.set("theme", "ocean").expect("set");
    worker.flush().await;
    assert_eq!(store.get("theme", String::new()), "ocean");
    assert_eq!(store.failed_keys(), vec![SmolStr::from("theme")]);
    let failure = failures.try_recv().expect("failure notice");
    assert_eq!(failure.error, SyncError::Network("timeout".into()));

    assert_eq!(store.retry_failed(), 1);
    worker.flush().await;
    assert!(store.failed_keys().is_empty());
    assert_eq!(remote.value("theme"), Some(json!("ocean")));
}

#[tokio::test(flavor = "current_thread")]
async fn next_write_to_failed_key_supersedes_the_failure() {
    let clock = ManualClock::new(1_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let mut worker = SyncWorker::new(&store, queue, remote.clone());

    remote.fail_next(SyncError::Network("timeout".into()));
    store.set("theme", "ocean").expect("set");
    worker.flush().await;
    store.set("theme", "rose").expect("set");
    assert!(store.failed_keys().is_empty());
    worker.flush().await;
    assert_eq!(remote.value("theme"), Some(json!("rose")));
}

#[tokio::test(flavor = "current_thread")]
async fn conflict_merges_snapshot_then_resends() {
    let clock = ManualClock::new(1_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let mut worker = SyncWorker::new(&store, queue, remote.clone());

    store.set("theme", "ocean").expect("set");
    worker.flush().await;
    let _unseen = remote.external_write("privacy", json!(true), 1_500);

    clock.advance(1_000);
    store.set("theme", "rose").expect("set");
    worker.flush().await;

    assert_eq!(remote.snapshots_served(), 1);
    assert_eq!(remote.base_versions(), vec![0, 1, 2]);
    assert_eq!(remote.value("theme"), Some(json!("rose")));
    assert_eq!(store.get_value("privacy"), Some(json!(true)));
    assert_eq!(store.remote_version(), remote.version());
    assert!(store.pending_keys().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn reset_deletes_remotely() {
    let clock = ManualClock::new(1_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let mut worker = SyncWorker::new(&store, queue, remote.clone());
    store.set("widget.note:a", &json!({"text": "hi"})).expect("set");
    worker.flush().await;
    store.reset("widget.note:a");
    worker.flush().await;
    assert_eq!(remote.value("widget.note:a"), None);
    assert_eq!(store.get_value("widget.note:a"), None);
}

#[tokio::test(flavor = "current_thread")]
async fn worker_applies_inbound_pushes_and_stops_with_the_store() {
    let clock = ManualClock::new(1_000);
    let (store, queue) = open("tab-a", &clock);
    let remote = RecordingRemote::new();
    let (push_tx, push_rx) = tokio::sync::mpsc::unbounded_channel();
    let worker = SyncWorker::new(&store, queue, remote.clone()).with_inbound(push_rx);
    let task = tokio::spawn(worker.run());

    push_tx
        .send(remote.external_write("theme", json!("rose"), 2_000))
        .expect("push");
    store.set("privacy", &true).expect("set");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.get("theme", String::new()), "rose");
    assert_eq!(remote.value("privacy"), Some(json!(true)));

    drop(store);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("worker stops")
        .expect("worker task");
}

fn registry() -> WidgetRegistry {
    let mut registry = WidgetRegistry::new();
    registry
        .register(WidgetTypeInfo::singleton("clock").with_size(3, 2).enabled_by_default())
        .expect("clock");
    registry
        .register(WidgetTypeInfo::multi("note", Some(3)).with_size(4, 2))
        .expect("note");
    registry
}

#[test]
fn initial_load_repairs_and_persists_stored_layout() {
    let clock = ManualClock::new(1_000);
    let (store, _queue) = open("tab-a", &clock);
    store
        .set(
            LAYOUT_KEY,
            &json!([
                {"id": "clock:stray", "x": 0, "y": 0, "w": 1, "h": 1},
                {"id": "clock", "x": 4, "y": 0, "w": 3, "h": 2},
                {"id": "retired", "x": 0, "y": 2, "w": 2, "h": 2}
            ]),
        )
        .expect("seed");

    let update = store.initial_layout_update(&registry());
    assert_eq!(update.source(), UpdateSource::InitialLoad);
    assert_eq!(update.session_id(), Some("tab-a"));
    let ids: Vec<&str> = update.layout().iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, vec!["clock"]);
    assert_eq!(update.layout()[0].w, 2);

    let stored: Vec<WidgetEntry> = store.get(LAYOUT_KEY, Vec::new());
    assert_eq!(stored.as_slice(), update.layout());
}

#[test]
fn initial_load_without_layout_uses_registry_default() {
    let clock = ManualClock::new(1_000);
    let (store, _queue) = open("tab-a", &clock);
    let update = store.initial_layout_update(&registry());
    assert_eq!(update.layout().len(), 1);
    assert!(store.get_value(LAYOUT_KEY).is_some());
}

#[test]
fn grid_trusts_local_moves_and_reloads_on_remote_additions() {
    let clock = ManualClock::new(1_000);
    let (store, _queue) = open("tab-a", &clock);
    let registry = registry();
    let initial = store.initial_layout_update(&registry);
    let mut grid = GridView::default();
    assert!(matches!(grid.react(&initial), GridAction::Reload(_)));

    let mut moved = grid.layout().to_vec();
    moved[0].x = 6;
    grid.commit_local(moved.clone());
    let local = store
        .commit_layout(moved, UpdateSource::LocalInteraction)
        .expect("commit");
    assert_eq!(grid.react(&local), GridAction::KeepLocal);

    let mut remote_layout = grid.layout().to_vec();
    remote_layout.push(WidgetEntry::new(WidgetId::new("note:x1"), 0, 2, 4, 2));
    clock.advance(1_000);
    store.apply_remote(RemotePush::keys(vec![RemoteValue::new(
        LAYOUT_KEY,
        serde_json::to_value(&remote_layout).expect("json"),
        clock.advance(1),
    )]));
    let update = store.current_layout_update(&registry, UpdateSource::RemoteSync);
    let GridAction::Reload(change) = grid.react(&update) else {
        panic!("expected reload");
    };
    assert_eq!(change.added_ids, vec![WidgetId::new("note:x1")]);
    assert_eq!(grid.layout().len(), 2);
}

#[test]
fn file_cache_feeds_the_next_session() {
    let dir = std::env::temp_dir().join(format!(
        "dashsync-store-{}-{:x}",
        std::process::id(),
        rand::random::<u32>()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("prefs.json");
    let clock = ManualClock::new(1_000);
    {
        let (store, _queue) = KeyedStore::open("tab-a", FileCache::new(&path), clock.clone());
        store.set("theme", "ocean").expect("set");
    }
    let (store, _queue) = KeyedStore::open("tab-b", FileCache::new(&path), clock);
    assert_eq!(store.get("theme", String::new()), "ocean");
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn configured_store_uses_session_and_cache_path() {
    let dir = std::env::temp_dir().join(format!(
        "dashsync-config-{}-{:x}",
        std::process::id(),
        rand::random::<u32>()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("prefs.json");
    let text = format!(
        "[store]\nsession_id = \"tab-7\"\ncache_path = {:?}\n",
        path.display().to_string()
    );
    let config = SyncConfig::from_toml_str(&text).expect("config");
    let clock = ManualClock::new(1_000);
    {
        let (store, mut queue) = KeyedStore::from_config(&config, clock.clone());
        assert_eq!(store.session_id(), "tab-7");
        store.set("theme", "ocean").expect("set");
        assert_eq!(queue.try_next().expect("queued").session_id, "tab-7");
    }
    assert!(path.exists());
    let (store, _queue) = KeyedStore::from_config(&config, clock.clone());
    assert_eq!(store.get("theme", String::new()), "ocean");

    let in_memory = SyncConfig::from_toml_str("").expect("config");
    let (store, _queue) = KeyedStore::from_config(&in_memory, clock);
    assert!(store.keys().is_empty());
    assert_eq!(store.session_id(), in_memory.session_id.as_str());
    std::fs::remove_dir_all(dir).ok();
}
