//! Overlay handle and the worker that talks to the device API.

#![allow(missing_docs)]

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::OverlayConfig;
use crate::error::SyncError;
use crate::overlay::debounce::{DueWrite, WriteCoalescer};
use crate::overlay::state::{OptimisticOverlay, Settings};

/// Device control API an overlay writes through.
pub trait DeviceApi<K>: Send + Sync + 'static {
    fn write_settings(
        &self,
        key: K,
        patch: Settings,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Read every entity. `force` bypasses any read cache.
    fn fetch_all(&self, force: bool)
        -> impl Future<Output = Result<Vec<(K, Settings)>, SyncError>> + Send;
}

/// Key types an overlay can be indexed by.
pub trait OverlayKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static> OverlayKey for T {}

enum Command<K> {
    Update {
        key: K,
        patch: Settings,
        done: oneshot::Sender<bool>,
    },
    Refresh {
        force: bool,
    },
}

struct Shared<K> {
    overlay: Mutex<OptimisticOverlay<K>>,
    version: watch::Sender<u64>,
}

impl<K: OverlayKey> Shared<K> {
    fn publish(&self, version: u64) {
        self.version.send_replace(version);
    }

    fn with_overlay<T>(&self, action: impl FnOnce(&mut OptimisticOverlay<K>) -> T) -> T {
        let (result, version) = {
            let mut overlay = self.overlay.lock();
            let result = action(&mut overlay);
            (result, overlay.version())
        };
        self.publish(version);
        result
    }
}

/// Cloneable front end used by controls.
pub struct OverlayHandle<K> {
    shared: Arc<Shared<K>>,
    commands: mpsc::UnboundedSender<Command<K>>,
}

impl<K> Clone for OverlayHandle<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            commands: self.commands.clone(),
        }
    }
}

impl<K: OverlayKey> OverlayHandle<K> {
    /// Apply `patch` optimistically and queue it for a debounced write.
    ///
    /// The override is visible before this returns. The future resolves to whether
    /// the coalesced write carrying this patch was accepted.
    pub fn update_setting(&self, key: K, patch: Settings) -> impl Future<Output = bool> + Send {
        let now = Instant::now();
        self.shared
            .with_overlay(|overlay| overlay.apply_local_override(key.clone(), patch.clone(), now));
        let (done, result) = oneshot::channel();
        let queued = self
            .commands
            .send(Command::Update { key, patch, done })
            .is_ok();
        async move { queued && result.await.unwrap_or(false) }
    }

    #[must_use]
    pub fn effective_state(&self, key: &K) -> Option<Settings> {
        self.shared.overlay.lock().effective_state(key)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        *self.shared.version.borrow()
    }

    /// Receiver that changes whenever effective state may have changed.
    #[must_use]
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// Ask the worker for a full read.
    pub fn request_refresh(&self, force: bool) -> Result<(), SyncError> {
        self.commands
            .send(Command::Refresh { force })
            .map_err(|_| SyncError::ChannelClosed("overlay worker stopped".into()))
    }
}

struct WriteOutcome<K> {
    write: DueWrite<K>,
    result: Result<(), SyncError>,
}

enum Event<K> {
    Command(Option<Command<K>>),
    Outcome(Option<WriteOutcome<K>>),
    Timer,
}

/// Worker owning the debounce timers and device I/O for one overlay.
///
/// Writes run as spawned tasks so a slow device does not hold back timers for
/// other entities; writes for one entity never overlap.
pub struct OverlayWorker<K, A> {
    shared: Arc<Shared<K>>,
    commands: mpsc::UnboundedReceiver<Command<K>>,
    outcomes_tx: mpsc::UnboundedSender<WriteOutcome<K>>,
    outcomes: mpsc::UnboundedReceiver<WriteOutcome<K>>,
    coalescer: WriteCoalescer<K>,
    api: Arc<A>,
    config: OverlayConfig,
    refresh_at: Option<Instant>,
}

impl<K: OverlayKey, A: DeviceApi<K>> OverlayWorker<K, A> {
    pub fn new(api: A, config: OverlayConfig) -> (OverlayHandle<K>, Self) {
        let (version, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            overlay: Mutex::new(OptimisticOverlay::new(config.grace_period)),
            version,
        });
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
        let handle = OverlayHandle {
            shared: Arc::clone(&shared),
            commands: commands_tx,
        };
        let worker = Self {
            shared,
            commands,
            outcomes_tx,
            outcomes,
            coalescer: WriteCoalescer::new(config.debounce),
            api: Arc::new(api),
            config,
            refresh_at: None,
        };
        (handle, worker)
    }

    /// Run until every handle is dropped and all pending writes have settled.
    pub async fn run(mut self) {
        self.refresh(false).await;
        let mut closing = false;
        loop {
            if closing && self.coalescer.is_idle() {
                break;
            }
            let deadline = match (self.coalescer.next_deadline(), self.refresh_at) {
                (Some(write), Some(refresh)) => Some(write.min(refresh)),
                (write, refresh) => write.or(refresh),
            };
            let event = tokio::select! {
                command = self.commands.recv(), if !closing => Event::Command(command),
                outcome = self.outcomes.recv() => Event::Outcome(outcome),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Event::Timer,
            };
            match event {
                Event::Command(Some(Command::Update { key, patch, done })) => {
                    self.coalescer.push(key, patch, Instant::now(), Some(done));
                }
                Event::Command(Some(Command::Refresh { force })) => self.refresh(force).await,
                Event::Command(None) => closing = true,
                Event::Outcome(Some(outcome)) => self.settle(outcome).await,
                Event::Outcome(None) => break,
                Event::Timer => self.fire(Instant::now()).await,
            }
        }
        debug!("overlay worker stopped");
    }

    async fn fire(&mut self, now: Instant) {
        for write in self.coalescer.take_due(now) {
            debug!(key = ?write.key, fields = write.patch.len(), "dispatching coalesced write");
            let api = Arc::clone(&self.api);
            let outcomes = self.outcomes_tx.clone();
            tokio::spawn(async move {
                let result = api.write_settings(write.key.clone(), write.patch.clone()).await;
                let _ = outcomes.send(WriteOutcome { write, result });
            });
        }
        if self.refresh_at.is_some_and(|at| at <= now) {
            self.refresh_at = None;
            self.refresh(false).await;
        }
    }

    async fn settle(&mut self, outcome: WriteOutcome<K>) {
        let WriteOutcome { write, result } = outcome;
        self.coalescer.complete(&write.key);
        match result {
            Ok(()) => {
                let confirm_at = Instant::now() + self.config.confirm_refresh;
                self.refresh_at.get_or_insert(confirm_at);
                write.resolve(true);
            }
            Err(err) => {
                warn!(key = ?write.key, error = %err, "device write failed; reverting override");
                let key = write.key.clone();
                write.resolve(false);
                let still_pending = self.coalescer.pending_patch(&key).cloned();
                self.shared.with_overlay(|overlay| {
                    overlay.discard_override(&key);
                    if let Some(patch) = still_pending {
                        overlay.apply_local_override(key.clone(), patch, Instant::now());
                    }
                });
                self.refresh(true).await;
            }
        }
    }

    async fn refresh(&mut self, force: bool) {
        match self.api.fetch_all(force).await {
            Ok(states) => {
                let now = Instant::now();
                let expired = self
                    .shared
                    .with_overlay(|overlay| overlay.replace_server_state(states, now));
                debug!(force, expired, "device state refreshed");
            }
            Err(err) => warn!(force, error = %err, "device refresh failed"),
        }
    }
}
