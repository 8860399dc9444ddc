//! Preference entries and the last-writer-wins rule.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the current value of a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceEntry {
    pub value: Value,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
    pub origin: Origin,
}

impl PreferenceEntry {
    #[must_use]
    pub fn local(value: Value, updated_at: u64) -> Self {
        Self {
            value,
            updated_at,
            origin: Origin::Local,
        }
    }

    #[must_use]
    pub fn remote(value: Value, updated_at: u64) -> Self {
        Self {
            value,
            updated_at,
            origin: Origin::Remote,
        }
    }

    /// Whether `self` replaces `incumbent` under last-writer-wins.
    ///
    /// Newer timestamps win. On a tie a local value beats a remote one; any other
    /// tie keeps the incumbent.
    #[must_use]
    pub fn supersedes(&self, incumbent: &PreferenceEntry) -> bool {
        match self.updated_at.cmp(&incumbent.updated_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                self.origin == Origin::Local && incumbent.origin == Origin::Remote
            }
        }
    }
}

/// Timestamp for a local write: never earlier than `now`, always after `current`.
#[must_use]
pub fn local_write_timestamp(now: u64, current: Option<u64>) -> u64 {
    match current {
        Some(current) => now.max(current.saturating_add(1)),
        None => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newer_wins_and_local_breaks_ties() {
        let local = PreferenceEntry::local(json!("ocean"), 10);
        let older_remote = PreferenceEntry::remote(json!("slate"), 9);
        let tied_remote = PreferenceEntry::remote(json!("slate"), 10);
        let newer_remote = PreferenceEntry::remote(json!("slate"), 11);

        assert!(!older_remote.supersedes(&local));
        assert!(!tied_remote.supersedes(&local));
        assert!(newer_remote.supersedes(&local));
        assert!(local.supersedes(&tied_remote));
        assert!(!tied_remote.supersedes(&PreferenceEntry::remote(json!("x"), 10)));
    }

    #[test]
    fn local_timestamps_move_forward() {
        assert_eq!(local_write_timestamp(100, None), 100);
        assert_eq!(local_write_timestamp(100, Some(50)), 100);
        assert_eq!(local_write_timestamp(100, Some(400)), 401);
    }
}
