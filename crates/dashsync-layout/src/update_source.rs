//! Update-source taxonomy and the grid reload decision.
//!
//! Every layout change is tagged with where it came from. Whether a consumer must
//! re-derive its grid from the store is decided by the tag plus a membership diff,
//! never by how much time has passed since the last local edit.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::layout::WidgetEntry;
use crate::widget_id::WidgetId;

/// Declared origin of a layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateSource {
    /// Drag/resize in this view; its in-memory copy is already current.
    LocalInteraction,
    /// A saved preset replaced the layout wholesale.
    PresetLoad,
    /// Change pushed by another tab or device.
    RemoteSync,
    /// A widget was placed.
    WidgetAdd,
    /// A widget was removed from this view.
    WidgetRemove,
    /// First load from persisted state.
    InitialLoad,
    /// Grid compaction moved widgets.
    Compact,
    /// Tag not in the known set (newer peer, corrupt payload).
    #[serde(other)]
    Unrecognized,
}

impl UpdateSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalInteraction => "local-interaction",
            Self::PresetLoad => "preset-load",
            Self::RemoteSync => "remote-sync",
            Self::WidgetAdd => "widget-add",
            Self::WidgetRemove => "widget-remove",
            Self::InitialLoad => "initial-load",
            Self::Compact => "compact",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl FromStr for UpdateSource {
    type Err = std::convert::Infallible;

    /// Unknown tags parse as [`UpdateSource::Unrecognized`].
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(match text.trim().to_ascii_lowercase().as_str() {
            "local-interaction" => Self::LocalInteraction,
            "preset-load" => Self::PresetLoad,
            "remote-sync" => Self::RemoteSync,
            "widget-add" => Self::WidgetAdd,
            "widget-remove" => Self::WidgetRemove,
            "initial-load" => Self::InitialLoad,
            "compact" => Self::Compact,
            _ => Self::Unrecognized,
        })
    }
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether a consumer must rebuild its grid for an update.
#[must_use]
pub fn should_reload_grid(source: UpdateSource, has_structural_change: bool) -> bool {
    match source {
        UpdateSource::LocalInteraction | UpdateSource::Compact | UpdateSource::WidgetRemove => {
            false
        }
        UpdateSource::PresetLoad | UpdateSource::WidgetAdd | UpdateSource::InitialLoad => true,
        UpdateSource::RemoteSync => has_structural_change,
        UpdateSource::Unrecognized => true,
    }
}

/// Membership difference between two layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralChange {
    pub widgets_added: bool,
    pub widgets_removed: bool,
    pub added_ids: Vec<WidgetId>,
    pub removed_ids: Vec<WidgetId>,
}

impl StructuralChange {
    #[must_use]
    pub fn has_structural_change(&self) -> bool {
        self.widgets_added || self.widgets_removed
    }
}

impl fmt::Display for StructuralChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_structural_change() {
            return writeln!(f, "no structural change");
        }
        for id in &self.added_ids {
            writeln!(f, "+ {id}")?;
        }
        for id in &self.removed_ids {
            writeln!(f, "- {id}")?;
        }
        Ok(())
    }
}

/// Diff the set of widget ids; geometry and `enabled` are ignored.
///
/// Ids are reported in the order they appear in their own layout.
#[must_use]
pub fn detect_structural_changes(old: &[WidgetEntry], new: &[WidgetEntry]) -> StructuralChange {
    let old_ids: FxHashSet<&WidgetId> = old.iter().map(|entry| &entry.id).collect();
    let new_ids: FxHashSet<&WidgetId> = new.iter().map(|entry| &entry.id).collect();
    let mut added_ids = Vec::new();
    let mut seen = FxHashSet::default();
    for entry in new {
        if !old_ids.contains(&entry.id) && seen.insert(&entry.id) {
            added_ids.push(entry.id.clone());
        }
    }
    let mut removed_ids = Vec::new();
    seen.clear();
    for entry in old {
        if !new_ids.contains(&entry.id) && seen.insert(&entry.id) {
            removed_ids.push(entry.id.clone());
        }
    }
    StructuralChange {
        widgets_added: !added_ids.is_empty(),
        widgets_removed: !removed_ids.is_empty(),
        added_ids,
        removed_ids,
    }
}

/// An immutable, tagged layout change.
///
/// Cloning shares the layout; `sequence` identifies the update so a consumer can
/// tell a redelivery from a new change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutUpdate {
    layout: Arc<[WidgetEntry]>,
    source: UpdateSource,
    timestamp: u64,
    session_id: Option<SmolStr>,
    sequence: u64,
}

impl LayoutUpdate {
    #[must_use]
    pub fn new(
        layout: Vec<WidgetEntry>,
        source: UpdateSource,
        timestamp: u64,
        session_id: Option<SmolStr>,
        sequence: u64,
    ) -> Self {
        Self {
            layout: layout.into(),
            source,
            timestamp,
            session_id,
            sequence,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &[WidgetEntry] {
        &self.layout
    }

    #[must_use]
    pub fn source(&self) -> UpdateSource {
        self.source
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
