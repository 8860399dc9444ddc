//! Grid consumer state: the in-memory layout a view renders from.

#![allow(missing_docs)]

use crate::layout::WidgetEntry;
use crate::update_source::{
    detect_structural_changes, should_reload_grid, LayoutUpdate, StructuralChange,
};

/// Outcome of offering a [`LayoutUpdate`] to a [`GridView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridAction {
    /// The view replaced its layout with the update's layout.
    Reload(StructuralChange),
    /// The view's own copy stays authoritative.
    KeepLocal,
    /// The update (or a newer one) was already handled.
    AlreadyApplied,
}

/// A view's current layout plus the last update sequence it reacted to.
///
/// Update sequences are issued monotonically by one producer, so anything at or
/// below the last seen sequence is a redelivery.
#[derive(Debug, Clone, Default)]
pub struct GridView {
    layout: Vec<WidgetEntry>,
    last_sequence: Option<u64>,
    reloads: u64,
}

impl GridView {
    #[must_use]
    pub fn new(layout: Vec<WidgetEntry>) -> Self {
        Self {
            layout,
            last_sequence: None,
            reloads: 0,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &[WidgetEntry] {
        &self.layout
    }

    /// Number of reloads performed so far.
    #[must_use]
    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    /// Record a change made by this view (drag, resize, compaction, removal).
    pub fn commit_local(&mut self, layout: Vec<WidgetEntry>) {
        self.layout = layout;
    }

    pub fn react(&mut self, update: &LayoutUpdate) -> GridAction {
        if self
            .last_sequence
            .is_some_and(|last| update.sequence() <= last)
        {
            return GridAction::AlreadyApplied;
        }
        self.last_sequence = Some(update.sequence());
        let change = detect_structural_changes(&self.layout, update.layout());
        if should_reload_grid(update.source(), change.has_structural_change()) {
            self.layout = update.layout().to_vec();
            self.reloads += 1;
            GridAction::Reload(change)
        } else {
            GridAction::KeepLocal
        }
    }
}
