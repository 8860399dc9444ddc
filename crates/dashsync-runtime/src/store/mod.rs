//! Keyed preference store.
//!
//! A [`KeyedStore`] is a cloned handle over one process-wide cache of JSON values.
//! Local writes apply immediately, persist to the [`CachePersistence`] backend,
//! notify subscribers synchronously and queue a write for the [`SyncWorker`].
//! Remote pushes are merged with last-writer-wins; a push that matches the cached
//! value, or that echoes this session's own write, changes nothing and notifies
//! nobody.
//!
//! Writes that have been queued but not acknowledged are tracked per key with the
//! timestamp of the newest queued write. That set replaces any time-based "just
//! saved" window: an echo acknowledges by timestamp, and a snapshot push never
//! removes a key whose local write is still in flight or failed.

#![allow(missing_docs)]

pub mod entry;
pub mod persist;
pub mod remote;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashsync_layout::layout::{default_layout, repair};
use dashsync_layout::{LayoutUpdate, UpdateSource, WidgetEntry, WidgetRegistry};
use indexmap::IndexSet;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use smol_str::SmolStr;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::SyncError;

pub use entry::{Origin, PreferenceEntry};
pub use persist::{CachePersistence, CachedEntries, FileCache, MemoryCache};
pub use remote::{
    OutboundWrite, PushScope, RemoteChannel, RemotePush, RemoteSnapshot, RemoteValue,
};
pub use worker::{OutboundQueue, SyncWorker};

use entry::local_write_timestamp;

/// Key holding the dashboard layout.
pub const LAYOUT_KEY: &str = "dashboard_layout";
/// Key holding the saved preset slots.
pub const PRESETS_KEY: &str = "dashboard_presets";

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub is_remote: bool,
    /// Keys touched; `None` after a full snapshot push.
    pub changed_keys: Option<Vec<SmolStr>>,
}

impl StoreChange {
    /// Whether `key` may have changed.
    #[must_use]
    pub fn touches(&self, key: &str) -> bool {
        self.changed_keys
            .as_ref()
            .is_none_or(|keys| keys.iter().any(|changed| changed == key))
    }
}

/// A remote write that did not land. The local value stays in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub key: SmolStr,
    pub error: SyncError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Callback = Arc<dyn Fn(&StoreChange) + Send + Sync>;

struct StoreState {
    entries: CachedEntries,
    /// Reset timestamps, so older pushes cannot resurrect a deleted key.
    tombstones: FxHashMap<SmolStr, u64>,
    /// Newest queued-but-unacknowledged write per key.
    ack_pending: FxHashMap<SmolStr, u64>,
    failed: IndexSet<SmolStr>,
    remote_version: u64,
    subscribers: Vec<(SubscriberId, Callback)>,
    next_subscriber: u64,
    persistence: Box<dyn CachePersistence>,
}

impl StoreState {
    fn persist(&self) {
        if let Err(err) = self.persistence.store(&self.entries) {
            warn!(error = %err, "failed to persist preference cache");
        }
    }

    fn callbacks(&self, exclude: Option<SubscriberId>) -> Vec<Callback> {
        self.subscribers
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    fn acknowledge(&mut self, key: &str, updated_at: u64) {
        if self
            .ack_pending
            .get(key)
            .is_some_and(|pending| *pending <= updated_at)
        {
            self.ack_pending.remove(key);
        }
    }

    /// The write that would bring the remote up to date with `key`, if the local
    /// copy was written at `updated_at`.
    fn write_for(&self, key: &str, updated_at: u64, session_id: &SmolStr) -> Option<OutboundWrite> {
        let value = match self.entries.get(key) {
            Some(entry) if entry.updated_at == updated_at && entry.origin == Origin::Local => {
                Some(entry.value.clone())
            }
            Some(_) => return None,
            None if self.tombstones.get(key) == Some(&updated_at) => None,
            None => return None,
        };
        Some(OutboundWrite {
            key: SmolStr::new(key),
            value,
            updated_at,
            session_id: session_id.clone(),
        })
    }

    fn local_timestamp(&self, key: &str) -> Option<u64> {
        self.entries
            .get(key)
            .map(|entry| entry.updated_at)
            .or_else(|| self.tombstones.get(key).copied())
    }
}

struct Shared {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    session_id: SmolStr,
    outbound: mpsc::UnboundedSender<OutboundWrite>,
    failures: broadcast::Sender<WriteFailure>,
    layout_sequence: AtomicU64,
}

/// Handle to the process-wide preference store. Clones share state.
#[derive(Clone)]
pub struct KeyedStore {
    shared: Arc<Shared>,
}

/// Non-owning store reference held by the sync worker.
#[derive(Clone)]
pub(crate) struct WeakStore {
    shared: Weak<Shared>,
}

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<KeyedStore> {
        self.shared.upgrade().map(|shared| KeyedStore { shared })
    }
}

impl fmt::Debug for KeyedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("KeyedStore")
            .field("session_id", &self.shared.session_id)
            .field("entries", &state.entries.len())
            .field("ack_pending", &state.ack_pending.len())
            .field("failed", &state.failed.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl KeyedStore {
    /// Load the persisted cache and create the store plus its outbound queue.
    ///
    /// An unreadable cache is logged and replaced by an empty one.
    pub fn open(
        session_id: impl Into<SmolStr>,
        persistence: impl CachePersistence + 'static,
        clock: impl Clock,
    ) -> (Self, OutboundQueue) {
        let entries = persistence.load().unwrap_or_else(|err| {
            warn!(error = %err, "discarding unreadable preference cache");
            CachedEntries::default()
        });
        debug!(entries = entries.len(), "loaded preference cache");
        let (outbound, rx) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let state = StoreState {
            entries,
            tombstones: FxHashMap::default(),
            ack_pending: FxHashMap::default(),
            failed: IndexSet::new(),
            remote_version: 0,
            subscribers: Vec::new(),
            next_subscriber: 0,
            persistence: Box::new(persistence),
        };
        let store = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                clock: Arc::new(clock),
                session_id: session_id.into(),
                outbound,
                failures,
                layout_sequence: AtomicU64::new(0),
            }),
        };
        (store, OutboundQueue::new(rx))
    }

    /// Open the store a [`SyncConfig`] describes: its session id, and a
    /// [`FileCache`] at `cache_path` or a [`MemoryCache`] when none is set.
    pub fn from_config(config: &SyncConfig, clock: impl Clock) -> (Self, OutboundQueue) {
        let session_id = config.session_id.clone();
        match &config.cache_path {
            Some(path) => Self::open(session_id, FileCache::new(path), clock),
            None => Self::open(session_id, MemoryCache::new(), clock),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore {
            shared: Arc::downgrade(&self.shared),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Cached value for `key`, or `default` when absent or not a `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_value(key)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(default)
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.shared
            .state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    #[must_use]
    pub fn entry(&self, key: &str) -> Option<PreferenceEntry> {
        self.shared.state.lock().entries.get(key).cloned()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<SmolStr> {
        self.shared.state.lock().entries.keys().cloned().collect()
    }

    /// Serialize and store `value`. Only serialization can fail.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: impl Into<SmolStr>,
        value: &T,
    ) -> Result<(), SyncError> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn set_value(&self, key: impl Into<SmolStr>, value: Value) {
        self.commit_local(vec![(key.into(), Some(value))], None);
    }

    /// Delete `key` locally and remotely.
    pub fn reset(&self, key: impl Into<SmolStr>) {
        self.commit_local(vec![(key.into(), None)], None);
    }

    /// Delete several keys with a single notification.
    pub fn reset_many<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<SmolStr>,
    {
        let changes = keys.into_iter().map(|key| (key.into(), None)).collect();
        self.commit_local(changes, None);
    }

    /// Register `callback` for every local commit and every effective remote push.
    pub fn subscribe(
        &self,
        callback: impl Fn(&StoreChange) + Send + Sync + 'static,
    ) -> Subscription {
        let mut state = self.shared.state.lock();
        let id = SubscriberId(state.next_subscriber);
        state.next_subscriber += 1;
        state.subscribers.push((id, Arc::new(callback)));
        Subscription {
            store: self.clone(),
            id,
        }
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.shared
            .state
            .lock()
            .subscribers
            .retain(|(subscriber, _)| *subscriber != id);
    }

    fn commit_local(&self, changes: Vec<(SmolStr, Option<Value>)>, exclude: Option<SubscriberId>) {
        if changes.is_empty() {
            return;
        }
        let mut changed_keys = Vec::with_capacity(changes.len());
        let callbacks = {
            let mut state = self.shared.state.lock();
            let now = self.shared.clock.now_ms();
            for (key, value) in changes {
                let updated_at = local_write_timestamp(now, state.local_timestamp(&key));
                match &value {
                    Some(value) => {
                        state.tombstones.remove(&key);
                        state
                            .entries
                            .insert(key.clone(), PreferenceEntry::local(value.clone(), updated_at));
                    }
                    None => {
                        state.entries.shift_remove(&key);
                        state.tombstones.insert(key.clone(), updated_at);
                    }
                }
                state.ack_pending.insert(key.clone(), updated_at);
                state.failed.shift_remove(&key);
                let write = OutboundWrite {
                    key: key.clone(),
                    value,
                    updated_at,
                    session_id: self.shared.session_id.clone(),
                };
                if self.shared.outbound.send(write).is_err() {
                    warn!(key = %key, "sync worker stopped; write kept locally");
                    state.ack_pending.remove(&key);
                    state.failed.insert(key.clone());
                }
                changed_keys.push(key);
            }
            state.persist();
            state.callbacks(exclude)
        };
        let change = StoreChange {
            is_remote: false,
            changed_keys: Some(changed_keys),
        };
        for callback in callbacks {
            callback(&change);
        }
    }

    /// Merge a remote push and notify subscribers of the effective change.
    ///
    /// Returns the notification that was delivered, if any.
    pub fn apply_remote(&self, push: RemotePush) -> Option<StoreChange> {
        let own_echo = push.origin_session.as_deref() == Some(self.session_id());
        let (change, callbacks) = {
            let mut state = self.shared.state.lock();
            if let Some(version) = push.version {
                state.remote_version = state.remote_version.max(version);
            }
            let mut changed = Vec::new();
            let mut listed = FxHashSet::default();
            for remote in push.entries {
                listed.insert(remote.key.clone());
                if own_echo {
                    debug!(key = %remote.key, "own write echoed back");
                    state.acknowledge(&remote.key, remote.updated_at);
                    continue;
                }
                let key = remote.key.clone();
                if merge_remote(&mut state, remote) {
                    changed.push(key);
                } else {
                    debug!(key = %key, "remote push changed nothing");
                }
            }
            let mut removed = false;
            if push.scope == PushScope::Snapshot && !own_echo {
                let absent: Vec<SmolStr> = state
                    .entries
                    .keys()
                    .filter(|key| {
                        !listed.contains(*key)
                            && !state.ack_pending.contains_key(*key)
                            && !state.failed.contains(*key)
                    })
                    .cloned()
                    .collect();
                for key in absent {
                    debug!(key = %key, "key absent from remote snapshot");
                    state.entries.shift_remove(&key);
                    removed = true;
                }
            }
            if changed.is_empty() && !removed {
                return None;
            }
            state.persist();
            let changed_keys = match push.scope {
                PushScope::Keys => Some(changed),
                PushScope::Snapshot => None,
            };
            let change = StoreChange {
                is_remote: true,
                changed_keys,
            };
            (change, state.callbacks(None))
        };
        for callback in callbacks {
            callback(&change);
        }
        Some(change)
    }

    /// Document version last reported by the remote.
    #[must_use]
    pub fn remote_version(&self) -> u64 {
        self.shared.state.lock().remote_version
    }

    /// Keys whose last remote write failed and has not been superseded.
    #[must_use]
    pub fn failed_keys(&self) -> Vec<SmolStr> {
        self.shared.state.lock().failed.iter().cloned().collect()
    }

    /// Keys with a write queued or in flight.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<SmolStr> {
        let state = self.shared.state.lock();
        let mut keys: Vec<SmolStr> = state.ack_pending.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Re-queue the current value of every failed key. Returns how many were queued.
    pub fn retry_failed(&self) -> usize {
        let mut state = self.shared.state.lock();
        let failed = std::mem::take(&mut state.failed);
        let mut queued = 0;
        for key in failed {
            let Some(updated_at) = state.local_timestamp(&key) else {
                continue;
            };
            let Some(write) = state.write_for(&key, updated_at, &self.shared.session_id) else {
                continue;
            };
            if self.shared.outbound.send(write).is_err() {
                state.failed.insert(key);
                continue;
            }
            state.ack_pending.insert(key, updated_at);
            queued += 1;
        }
        queued
    }

    /// Receiver for non-fatal write failures.
    #[must_use]
    pub fn failures(&self) -> broadcast::Receiver<WriteFailure> {
        self.shared.failures.subscribe()
    }

    pub(crate) fn acknowledge(&self, key: &str, updated_at: u64, version: u64) {
        let mut state = self.shared.state.lock();
        state.remote_version = state.remote_version.max(version);
        state.acknowledge(key, updated_at);
        if !state.ack_pending.contains_key(key) {
            state.failed.shift_remove(key);
        }
    }

    /// Newest local write for `key` that the remote still lacks.
    pub(crate) fn pending_write(&self, key: &str) -> Option<OutboundWrite> {
        let state = self.shared.state.lock();
        let updated_at = *state.ack_pending.get(key)?;
        state.write_for(key, updated_at, &self.shared.session_id)
    }

    pub(crate) fn record_failure(&self, write: &OutboundWrite, error: SyncError) {
        warn!(key = %write.key, error = %error, "remote write failed; keeping local value");
        {
            let mut state = self.shared.state.lock();
            if state.ack_pending.get(&write.key) == Some(&write.updated_at) {
                state.ack_pending.remove(&write.key);
                state.failed.insert(write.key.clone());
            }
        }
        let _ = self.shared.failures.send(WriteFailure {
            key: write.key.clone(),
            error,
        });
    }

    /// Layout update for process start, built from the persisted layout.
    ///
    /// A missing or unreadable layout is replaced by the registry default; a layout
    /// that needed repair is written back.
    pub fn initial_layout_update(&self, registry: &WidgetRegistry) -> LayoutUpdate {
        let layout = match self.get_value(LAYOUT_KEY) {
            None => {
                let layout = default_layout(registry);
                self.store_layout(&layout);
                layout
            }
            Some(value) => match serde_json::from_value::<Vec<WidgetEntry>>(value) {
                Ok(stored) => {
                    let report = repair(&stored, registry);
                    if !report.is_clean() {
                        warn!(
                            dropped = report.dropped.len(),
                            stripped = report.stripped.len(),
                            minted = report.minted.len(),
                            renamed = report.renamed.len(),
                            resized = report.resized.len(),
                            duplicates = report.duplicates.len(),
                            "repaired stored layout"
                        );
                        self.store_layout(&report.layout);
                    }
                    report.layout
                }
                Err(err) => {
                    warn!(error = %err, "stored layout unreadable; using default layout");
                    let layout = default_layout(registry);
                    self.store_layout(&layout);
                    layout
                }
            },
        };
        self.layout_update(layout, UpdateSource::InitialLoad)
    }

    /// Tagged update carrying the stored layout, validated but not written back.
    pub fn current_layout_update(
        &self,
        registry: &WidgetRegistry,
        source: UpdateSource,
    ) -> LayoutUpdate {
        let stored: Vec<WidgetEntry> = self.get(LAYOUT_KEY, Vec::new());
        self.layout_update(repair(&stored, registry).layout, source)
    }

    /// Store a layout produced by a local action and tag it with `source`.
    pub fn commit_layout(
        &self,
        layout: Vec<WidgetEntry>,
        source: UpdateSource,
    ) -> Result<LayoutUpdate, SyncError> {
        self.set(LAYOUT_KEY, &layout)?;
        Ok(self.layout_update(layout, source))
    }

    fn store_layout(&self, layout: &[WidgetEntry]) {
        if let Err(err) = self.set(LAYOUT_KEY, layout) {
            warn!(error = %err, "failed to store layout");
        }
    }

    fn layout_update(&self, layout: Vec<WidgetEntry>, source: UpdateSource) -> LayoutUpdate {
        let sequence = self.shared.layout_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        LayoutUpdate::new(
            layout,
            source,
            self.shared.clock.now_ms(),
            Some(self.shared.session_id.clone()),
            sequence,
        )
    }
}

/// Apply one remote value under last-writer-wins. Returns whether the cache changed.
fn merge_remote(state: &mut StoreState, remote: RemoteValue) -> bool {
    let RemoteValue {
        key,
        value,
        updated_at,
    } = remote;
    let Some(value) = value else {
        let Some(current) = state.entries.get(&key) else {
            return false;
        };
        if !PreferenceEntry::remote(Value::Null, updated_at).supersedes(current) {
            return false;
        }
        state.entries.shift_remove(&key);
        state.tombstones.insert(key.clone(), updated_at);
        state.ack_pending.remove(&key);
        state.failed.shift_remove(&key);
        return true;
    };
    match state.entries.get_mut(&key) {
        Some(current) if current.value == value => {
            current.updated_at = current.updated_at.max(updated_at);
            state.acknowledge(&key, updated_at);
            if !state.ack_pending.contains_key(&key) {
                state.failed.shift_remove(&key);
            }
            false
        }
        Some(current) => {
            let incoming = PreferenceEntry::remote(value, updated_at);
            if !incoming.supersedes(current) {
                return false;
            }
            *current = incoming;
            state.ack_pending.remove(&key);
            state.failed.shift_remove(&key);
            true
        }
        None => {
            if state
                .tombstones
                .get(&key)
                .is_some_and(|deleted_at| *deleted_at >= updated_at)
            {
                return false;
            }
            state.tombstones.remove(&key);
            state
                .entries
                .insert(key, PreferenceEntry::remote(value, updated_at));
            true
        }
    }
}

/// Live registration with a [`KeyedStore`]; dropping it unsubscribes.
///
/// Writes made through the subscription do not notify its own callback.
pub struct Subscription {
    store: KeyedStore,
    id: SubscriberId,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: impl Into<SmolStr>,
        value: &T,
    ) -> Result<(), SyncError> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn set_value(&self, key: impl Into<SmolStr>, value: Value) {
        self.store
            .commit_local(vec![(key.into(), Some(value))], Some(self.id));
    }

    pub fn reset(&self, key: impl Into<SmolStr>) {
        self.store.commit_local(vec![(key.into(), None)], Some(self.id));
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}
