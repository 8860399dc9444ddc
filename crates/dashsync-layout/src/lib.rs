//! `dashsync-layout` - widget identity and layout decisions for dashboard sync.
//!
//! This crate holds the synchronous, side-effect free half of the sync engine:
//!
//! - **Widget identity**: `type` / `type:instance` identifiers and instance id minting
//! - **Registry**: the widget-type catalog (multi-instance flags, default geometry)
//! - **Layout repair**: validation, singleton de-duplication, placement helpers
//! - **Update sources**: the reload decision table and structural diffing
//! - **Grid consumer**: reacting exactly once to each layout update
//! - **Presets**: saved layout slots that load as `preset-load` updates
//!
//! Nothing here performs I/O beyond loading registry files; the stateful store and
//! network plumbing live in `dashsync-runtime`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Layout loading errors.
pub mod error;
/// Grid consumer that applies layout updates once.
pub mod grid;
/// Layout entries, validation and repair.
pub mod layout;
/// Saved layout preset slots.
pub mod presets;
/// Widget-type registry.
pub mod registry;
/// Update-source taxonomy and structural diffing.
pub mod update_source;
/// Widget identifiers.
pub mod widget_id;

pub use error::LayoutError;
pub use grid::{GridAction, GridView};
pub use layout::{LayoutRepair, WidgetEntry};
pub use presets::{Preset, PresetKind, PresetSlots, PRESET_SLOTS};
pub use registry::{WidgetRegistry, WidgetTypeInfo, WidgetTypes};
pub use update_source::{
    detect_structural_changes, should_reload_grid, LayoutUpdate, StructuralChange, UpdateSource,
};
pub use widget_id::{WidgetId, WidgetParts};
