//! Per-entity write debouncing.

#![allow(missing_docs)]

use std::hash::Hash;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::overlay::state::Settings;

#[derive(Debug)]
struct PendingWrite {
    patch: Settings,
    deadline: Instant,
    waiters: Vec<oneshot::Sender<bool>>,
}

/// A coalesced write ready to send.
#[derive(Debug)]
pub struct DueWrite<K> {
    pub key: K,
    pub patch: Settings,
    pub waiters: Vec<oneshot::Sender<bool>>,
}

impl<K> DueWrite<K> {
    /// Resolve every caller that contributed to this write.
    pub fn resolve(self, ok: bool) {
        for waiter in self.waiters {
            let _ = waiter.send(ok);
        }
    }
}

/// Accumulates patches per entity and releases them once the entity has been
/// quiet for the debounce window.
///
/// Each push restarts that entity's window. An entity with a write in flight is
/// never released again until [`complete`](Self::complete) is called.
#[derive(Debug)]
pub struct WriteCoalescer<K> {
    pending: FxHashMap<K, PendingWrite>,
    in_flight: FxHashSet<K>,
    debounce: Duration,
}

impl<K: Eq + Hash + Clone> WriteCoalescer<K> {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: FxHashMap::default(),
            in_flight: FxHashSet::default(),
            debounce,
        }
    }

    pub fn push(
        &mut self,
        key: K,
        patch: Settings,
        now: Instant,
        waiter: Option<oneshot::Sender<bool>>,
    ) {
        let deadline = now + self.debounce;
        let pending = self.pending.entry(key).or_insert_with(|| PendingWrite {
            patch: Settings::new(),
            deadline,
            waiters: Vec::new(),
        });
        pending.patch.extend(patch);
        pending.deadline = deadline;
        pending.waiters.extend(waiter);
    }

    /// Earliest deadline among entities that may be released.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|(key, _)| !self.in_flight.contains(*key))
            .map(|(_, pending)| pending.deadline)
            .min()
    }

    /// Release every write whose window has elapsed, marking it in flight.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueWrite<K>> {
        let due: Vec<K> = self
            .pending
            .iter()
            .filter(|(key, pending)| pending.deadline <= now && !self.in_flight.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();
        due.into_iter()
            .filter_map(|key| {
                let pending = self.pending.remove(&key)?;
                self.in_flight.insert(key.clone());
                Some(DueWrite {
                    key,
                    patch: pending.patch,
                    waiters: pending.waiters,
                })
            })
            .collect()
    }

    pub fn complete(&mut self, key: &K) {
        self.in_flight.remove(key);
    }

    /// Patch accumulated for `key` but not yet released.
    #[must_use]
    pub fn pending_patch(&self, key: &K) -> Option<&Settings> {
        self.pending.get(key).map(|pending| &pending.patch)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}
