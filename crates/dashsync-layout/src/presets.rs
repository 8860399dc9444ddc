//! Saved layout presets.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::LayoutError;
use crate::layout::{deduplicate_singletons, repair, WidgetEntry};
use crate::registry::WidgetTypes;
use crate::update_source::{LayoutUpdate, UpdateSource};

/// Number of preset slots a user has.
pub const PRESET_SLOTS: usize = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresetKind {
    #[default]
    Grid,
    Fullscreen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub layout: Vec<WidgetEntry>,
    #[serde(default)]
    pub kind: PresetKind,
    #[serde(default)]
    pub saved_at: u64,
}

/// Fixed-size preset table, stored as an array with `null` for empty slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<Preset>>", into = "Vec<Option<Preset>>")]
pub struct PresetSlots {
    slots: Vec<Option<Preset>>,
}

impl Default for PresetSlots {
    fn default() -> Self {
        Self {
            slots: vec![None; PRESET_SLOTS],
        }
    }
}

impl From<Vec<Option<Preset>>> for PresetSlots {
    fn from(mut slots: Vec<Option<Preset>>) -> Self {
        slots.resize(PRESET_SLOTS, None);
        Self { slots }
    }
}

impl From<PresetSlots> for Vec<Option<Preset>> {
    fn from(value: PresetSlots) -> Self {
        value.slots
    }
}

impl PresetSlots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check(slot: usize) -> Result<(), LayoutError> {
        if slot >= PRESET_SLOTS {
            return Err(LayoutError::PresetSlot {
                slot,
                max: PRESET_SLOTS,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Preset> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Store a layout in `slot`, dropping duplicate ids first.
    pub fn save(
        &mut self,
        slot: usize,
        layout: Vec<WidgetEntry>,
        kind: PresetKind,
        now: u64,
    ) -> Result<(), LayoutError> {
        Self::check(slot)?;
        self.slots[slot] = Some(Preset {
            layout: deduplicate_singletons(layout),
            kind,
            saved_at: now,
        });
        Ok(())
    }

    pub fn clear(&mut self, slot: usize) -> Result<Option<Preset>, LayoutError> {
        Self::check(slot)?;
        Ok(self.slots[slot].take())
    }

    /// Build a `preset-load` update from a slot, repairing it against the registry
    /// (types may have been retired since the preset was saved).
    pub fn load(
        &self,
        slot: usize,
        registry: &impl WidgetTypes,
        now: u64,
        session_id: Option<SmolStr>,
        sequence: u64,
    ) -> Result<Option<LayoutUpdate>, LayoutError> {
        Self::check(slot)?;
        Ok(self.get(slot).map(|preset| {
            let repaired = repair(&preset.layout, registry);
            LayoutUpdate::new(
                repaired.layout,
                UpdateSource::PresetLoad,
                now,
                session_id,
                sequence,
            )
        }))
    }

    pub fn occupied(&self) -> impl Iterator<Item = (usize, &Preset)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, preset)| preset.as_ref().map(|preset| (slot, preset)))
    }
}
