//! Outbound write dispatch.

use indexmap::IndexMap;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::store::remote::{OutboundWrite, RemoteChannel, RemotePush};
use crate::store::WeakStore;

/// Snapshot-and-resend rounds attempted for one write before giving up.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Receiving end of a store's outbound write queue.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<OutboundWrite>,
}

impl OutboundQueue {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<OutboundWrite>) -> Self {
        Self { rx }
    }

    /// Next queued write without waiting.
    pub fn try_next(&mut self) -> Option<OutboundWrite> {
        self.rx.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<OutboundWrite> {
        self.rx.recv().await
    }

    /// Collect everything queued, keeping only the newest write per key.
    fn coalesce(&mut self, first: OutboundWrite) -> IndexMap<SmolStr, OutboundWrite> {
        let mut batch = IndexMap::new();
        batch.insert(first.key.clone(), first);
        while let Some(write) = self.try_next() {
            match batch.get_mut(&write.key) {
                Some(queued) if queued.updated_at <= write.updated_at => {
                    debug!(key = %write.key, "coalescing queued write");
                    *queued = write;
                }
                Some(_) => {}
                None => {
                    batch.insert(write.key.clone(), write);
                }
            }
        }
        batch
    }
}

enum Event {
    Write(Option<OutboundWrite>),
    Push(Option<RemotePush>),
}

/// Drives a store's outbound queue against a [`RemoteChannel`], and optionally
/// feeds pushes from the channel back into the store.
///
/// The worker only holds a weak reference, so it stops once every
/// [`KeyedStore`](crate::store::KeyedStore) handle is gone.
pub struct SyncWorker<R> {
    store: WeakStore,
    queue: OutboundQueue,
    inbound: Option<mpsc::UnboundedReceiver<RemotePush>>,
    remote: R,
}

impl<R: RemoteChannel> SyncWorker<R> {
    pub fn new(store: &crate::store::KeyedStore, queue: OutboundQueue, remote: R) -> Self {
        Self {
            store: store.downgrade(),
            queue,
            inbound: None,
            remote,
        }
    }

    #[must_use]
    pub fn with_inbound(mut self, inbound: mpsc::UnboundedReceiver<RemotePush>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Run until every store handle is dropped.
    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                push = next_push(&mut self.inbound) => Event::Push(push),
                write = self.queue.next() => Event::Write(write),
            };
            match event {
                Event::Push(Some(push)) => {
                    let Some(store) = self.store.upgrade() else {
                        break;
                    };
                    store.apply_remote(push);
                }
                Event::Push(None) => {
                    debug!("remote push stream closed");
                    self.inbound = None;
                }
                Event::Write(Some(write)) => {
                    let batch = self.queue.coalesce(write);
                    let sent = self.dispatch(batch).await;
                    debug!(sent, "dispatched queued writes");
                }
                Event::Write(None) => break,
            }
        }
        debug!("sync worker stopped");
    }

    /// Dispatch everything currently queued. Returns the number of writes sent;
    /// queued writes the cache has since superseded are dropped unsent.
    pub async fn flush(&mut self) -> usize {
        let Some(first) = self.queue.try_next() else {
            return 0;
        };
        let batch = self.queue.coalesce(first);
        self.dispatch(batch).await
    }

    async fn dispatch(&self, batch: IndexMap<SmolStr, OutboundWrite>) -> usize {
        let mut sent = 0;
        for write in batch.into_values() {
            if self.send(write).await {
                sent += 1;
            }
        }
        sent
    }

    /// Returns whether the write went out to the remote.
    async fn send(&self, write: OutboundWrite) -> bool {
        let Some(store) = self.store.upgrade() else {
            return false;
        };
        // The queue may lag the cache: a remote push or a later local write can
        // have replaced the queued value since it was enqueued.
        let mut write = match store.pending_write(&write.key) {
            Some(current) if current.updated_at == write.updated_at => current,
            Some(_) => {
                debug!(key = %write.key, "queued write replaced by a newer local write");
                return false;
            }
            None => {
                debug!(key = %write.key, "queued write superseded; not sending");
                return false;
            }
        };
        let mut conflict = SyncError::Conflict {
            expected: 0,
            actual: 0,
        };
        for _ in 0..=MAX_CONFLICT_RETRIES {
            let base_version = store.remote_version();
            match self.remote.write(write.clone(), base_version).await {
                Ok(version) => {
                    debug!(key = %write.key, version, "remote write acknowledged");
                    store.acknowledge(&write.key, write.updated_at, version);
                    return true;
                }
                Err(err @ SyncError::Conflict { expected, actual }) => {
                    debug!(key = %write.key, expected, actual, "write conflict; merging remote snapshot");
                    conflict = err;
                    match self.remote.snapshot().await {
                        Ok(snapshot) => {
                            store.apply_remote(RemotePush::snapshot(snapshot));
                        }
                        Err(err) => {
                            store.record_failure(&write, err);
                            return true;
                        }
                    }
                    let Some(next) = store.pending_write(&write.key) else {
                        debug!(key = %write.key, "local write superseded by remote value");
                        return true;
                    };
                    write = next;
                }
                Err(err) => {
                    store.record_failure(&write, err);
                    return true;
                }
            }
        }
        warn!(key = %write.key, "giving up after repeated version conflicts");
        store.record_failure(&write, conflict);
        true
    }
}

async fn next_push(inbound: &mut Option<mpsc::UnboundedReceiver<RemotePush>>) -> Option<RemotePush> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
