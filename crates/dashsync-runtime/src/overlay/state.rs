//! Server truth plus unconfirmed local overrides.

#![allow(missing_docs)]

use std::hash::Hash;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::debug;

/// Flat settings object for one entity, as the device API reports it.
pub type Settings = Map<String, Value>;

#[derive(Debug, Clone)]
struct Override {
    patch: Settings,
    applied_at: Instant,
}

/// Per-entity overlay of local patches on top of the last full server read.
///
/// An override stays authoritative until a full refresh arrives more than the
/// grace period after it was applied, or until it is discarded after a failed
/// write. Every visible change bumps [`version`](Self::version).
#[derive(Debug, Clone)]
pub struct OptimisticOverlay<K> {
    server: FxHashMap<K, Settings>,
    overrides: FxHashMap<K, Override>,
    grace_period: Duration,
    version: u64,
}

impl<K: Eq + Hash + Clone> OptimisticOverlay<K> {
    #[must_use]
    pub fn new(grace_period: Duration) -> Self {
        Self {
            server: FxHashMap::default(),
            overrides: FxHashMap::default(),
            grace_period,
            version: 0,
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Layer `patch` over `key`. Fields of an existing override are replaced field
    /// by field and the override's age restarts.
    pub fn apply_local_override(&mut self, key: K, patch: Settings, now: Instant) {
        let entry = self.overrides.entry(key).or_insert_with(|| Override {
            patch: Settings::new(),
            applied_at: now,
        });
        entry.patch.extend(patch);
        entry.applied_at = now;
        self.version += 1;
    }

    /// Server state with the override shallow-merged on top; `None` until the
    /// server has reported the entity.
    #[must_use]
    pub fn effective_state(&self, key: &K) -> Option<Settings> {
        let mut state = self.server.get(key)?.clone();
        if let Some(local) = self.overrides.get(key) {
            state.extend(local.patch.clone());
        }
        Some(state)
    }

    #[must_use]
    pub fn server_state(&self, key: &K) -> Option<&Settings> {
        self.server.get(key)
    }

    #[must_use]
    pub fn has_override(&self, key: &K) -> bool {
        self.overrides.contains_key(key)
    }

    /// Install a full server read and expire overrides older than the grace
    /// period. Returns the number of overrides expired.
    pub fn replace_server_state(
        &mut self,
        states: impl IntoIterator<Item = (K, Settings)>,
        now: Instant,
    ) -> usize {
        self.server = states.into_iter().collect();
        let grace_period = self.grace_period;
        let before = self.overrides.len();
        self.overrides
            .retain(|_, local| now.saturating_duration_since(local.applied_at) <= grace_period);
        let expired = before - self.overrides.len();
        if expired > 0 {
            debug!(expired, "expired stale overrides");
        }
        self.version += 1;
        expired
    }

    /// Drop the override for `key`. Returns whether one existed.
    pub fn discard_override(&mut self, key: &K) -> bool {
        let discarded = self.overrides.remove(key).is_some();
        if discarded {
            self.version += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: Value) -> Settings {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn no_state_until_server_reports() {
        let mut overlay = OptimisticOverlay::new(Duration::from_secs(5));
        let now = Instant::now();
        overlay.apply_local_override("fan", settings(json!({"onSpead": 4})), now);
        assert_eq!(overlay.effective_state(&"fan"), None);
        assert!(overlay.has_override(&"fan"));
    }

    #[test]
    fn override_wins_until_grace_period_and_refresh() {
        let mut overlay = OptimisticOverlay::new(Duration::from_secs(5));
        let start = Instant::now();
        overlay.replace_server_state([("fan", settings(json!({"onSpead": 2, "atType": 2})))], start);
        overlay.apply_local_override("fan", settings(json!({"onSpead": 7})), start);
        let effective = overlay.effective_state(&"fan").expect("state");
        assert_eq!(effective["onSpead"], 7);
        assert_eq!(effective["atType"], 2);

        let early = start + Duration::from_secs(4);
        assert_eq!(
            overlay.replace_server_state([("fan", settings(json!({"onSpead": 2})))], early),
            0
        );
        assert_eq!(overlay.effective_state(&"fan").expect("state")["onSpead"], 7);

        let late = start + Duration::from_secs(6);
        assert_eq!(
            overlay.replace_server_state([("fan", settings(json!({"onSpead": 2})))], late),
            1
        );
        assert_eq!(overlay.effective_state(&"fan").expect("state")["onSpead"], 2);
    }

    #[test]
    fn patches_merge_field_by_field() {
        let mut overlay = OptimisticOverlay::new(Duration::from_secs(5));
        let now = Instant::now();
        overlay.replace_server_state([("fan", Settings::new())], now);
        overlay.apply_local_override("fan", settings(json!({"onSpead": 3, "atType": 2})), now);
        overlay.apply_local_override("fan", settings(json!({"onSpead": 9})), now);
        let effective = overlay.effective_state(&"fan").expect("state");
        assert_eq!(effective["onSpead"], 9);
        assert_eq!(effective["atType"], 2);
    }

    #[test]
    fn entities_are_independent_and_version_tracks_changes() {
        let mut overlay = OptimisticOverlay::new(Duration::from_secs(5));
        let now = Instant::now();
        overlay.replace_server_state(
            [
                ("a", settings(json!({"onSpead": 1}))),
                ("b", settings(json!({"onSpead": 1}))),
            ],
            now,
        );
        let version = overlay.version();
        overlay.apply_local_override("a", settings(json!({"onSpead": 5})), now);
        assert_eq!(overlay.effective_state(&"b").expect("b")["onSpead"], 1);
        assert!(overlay.discard_override(&"a"));
        assert!(!overlay.discard_override(&"a"));
        assert_eq!(overlay.version(), version + 2);
    }
}
