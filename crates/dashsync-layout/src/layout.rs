//! Layout entries and the self-healing validators that keep stored layouts sane.
//!
//! A layout is a flat, ordered list of [`WidgetEntry`] values. Stored layouts come
//! from other tabs, older releases and imported presets, so every load goes through
//! [`repair`]: unknown types are dropped, singleton ids lose stray instance suffixes,
//! repeatable widgets without a suffix get one, undersized widgets are grown to the
//! minimum and duplicate ids collapse to their first occurrence. Nothing here ever
//! rejects a whole layout.

use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::warn;

use crate::error::LayoutError;
use crate::registry::{normalize_name, WidgetRegistry, WidgetTypes};
use crate::widget_id::{mint_instance_id, WidgetId};

/// Smallest width a placed widget may have (grid columns).
pub const MIN_WIDGET_WIDTH: u32 = 2;
/// Smallest height a placed widget may have (grid rows).
pub const MIN_WIDGET_HEIGHT: u32 = 2;
/// Column count used when packing a generated default layout.
pub const GRID_COLUMNS: u32 = 12;

/// One placed widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetEntry {
    pub id: WidgetId,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<SmolStr>,
}

fn default_enabled() -> bool {
    true
}

impl WidgetEntry {
    #[must_use]
    pub fn new(id: WidgetId, x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            id,
            x,
            y,
            w,
            h,
            enabled: true,
            display_name: None,
            category: None,
            description: None,
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }
}

/// What [`repair`] changed, entry by entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutRepair {
    pub layout: Vec<WidgetEntry>,
    /// Entries whose widget type is no longer registered.
    pub dropped: Vec<WidgetId>,
    /// Singleton ids that carried an instance suffix (original ids).
    pub stripped: Vec<WidgetId>,
    /// Repeatable widgets that lacked a suffix, with the id they were given.
    pub minted: Vec<(WidgetId, WidgetId)>,
    /// Ids rewritten to the registry's canonical type name (original, canonical).
    pub renamed: Vec<(WidgetId, WidgetId)>,
    /// Entries grown to the minimum size.
    pub resized: Vec<WidgetId>,
    /// Later duplicates removed by id.
    pub duplicates: Vec<WidgetId>,
}

impl LayoutRepair {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty()
            && self.stripped.is_empty()
            && self.minted.is_empty()
            && self.renamed.is_empty()
            && self.resized.is_empty()
            && self.duplicates.is_empty()
    }
}

impl fmt::Display for LayoutRepair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entries: {}", self.layout.len())?;
        for id in &self.dropped {
            writeln!(f, "dropped unknown widget {id}")?;
        }
        for id in &self.stripped {
            writeln!(f, "stripped instance from singleton {id}")?;
        }
        for (from, to) in &self.minted {
            writeln!(f, "assigned instance {from} -> {to}")?;
        }
        for (from, to) in &self.renamed {
            writeln!(f, "renamed {from} -> {to}")?;
        }
        for id in &self.resized {
            writeln!(f, "resized {id} to minimum")?;
        }
        for id in &self.duplicates {
            writeln!(f, "removed duplicate {id}")?;
        }
        Ok(())
    }
}

/// Drop unknown types and fix identity/geometry of the remaining entries.
#[must_use]
pub fn validate(layout: &[WidgetEntry], registry: &impl WidgetTypes) -> Vec<WidgetEntry> {
    validate_with_report(layout, registry).layout
}

/// [`validate`] with a record of every change.
#[must_use]
pub fn validate_with_report(layout: &[WidgetEntry], registry: &impl WidgetTypes) -> LayoutRepair {
    let mut report = LayoutRepair::default();
    let mut seen: FxHashSet<WidgetId> = layout.iter().map(|entry| entry.id.clone()).collect();
    for entry in layout {
        let Some(info) = registry.lookup(entry.id.widget_type()) else {
            warn!(widget = %entry.id, "dropping layout entry with unknown widget type");
            report.dropped.push(entry.id.clone());
            continue;
        };
        let mut entry = entry.clone();
        if !info.allow_multiple && entry.id.is_instanced() {
            warn!(widget = %entry.id, "stripping instance id from singleton widget");
            report.stripped.push(entry.id.clone());
            entry.id = WidgetId::singleton(&info.widget_type);
        } else if info.allow_multiple && !entry.id.is_instanced() {
            let minted = mint_instance_id(&info.widget_type, |candidate| seen.contains(candidate));
            warn!(widget = %entry.id, minted = %minted, "assigning instance id to repeatable widget");
            seen.insert(minted.clone());
            report.minted.push((entry.id.clone(), minted.clone()));
            entry.id = minted;
        } else {
            let canonical = WidgetId::create(&info.widget_type, entry.id.instance_id());
            if canonical != entry.id {
                warn!(widget = %entry.id, canonical = %canonical, "normalizing widget type name");
                seen.insert(canonical.clone());
                report.renamed.push((entry.id.clone(), canonical.clone()));
                entry.id = canonical;
            }
        }
        if entry.w < MIN_WIDGET_WIDTH || entry.h < MIN_WIDGET_HEIGHT {
            report.resized.push(entry.id.clone());
            entry.w = entry.w.max(MIN_WIDGET_WIDTH);
            entry.h = entry.h.max(MIN_WIDGET_HEIGHT);
        }
        report.layout.push(entry);
    }
    report
}

/// Keep only the first entry (by list order) for each id.
///
/// Singleton ids are the bare type name, so this keeps one placement per singleton
/// type. Must run before a generated layout is persisted.
#[must_use]
pub fn deduplicate_singletons(layout: Vec<WidgetEntry>) -> Vec<WidgetEntry> {
    dedupe_into(layout, &mut Vec::new())
}

fn dedupe_into(layout: Vec<WidgetEntry>, duplicates: &mut Vec<WidgetId>) -> Vec<WidgetEntry> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::with_capacity(layout.len());
    for entry in layout {
        if seen.insert(entry.id.clone()) {
            out.push(entry);
        } else {
            warn!(widget = %entry.id, "removing duplicate layout entry");
            duplicates.push(entry.id);
        }
    }
    out
}

/// Full repair: [`validate_with_report`] followed by de-duplication.
#[must_use]
pub fn repair(layout: &[WidgetEntry], registry: &impl WidgetTypes) -> LayoutRepair {
    let mut report = validate_with_report(layout, registry);
    let validated = std::mem::take(&mut report.layout);
    report.layout = dedupe_into(validated, &mut report.duplicates);
    report
}

/// Whether one more placement of `widget_type` is allowed.
#[must_use]
pub fn can_add_instance(
    layout: &[WidgetEntry],
    widget_type: &str,
    registry: &impl WidgetTypes,
) -> bool {
    let Some(info) = registry.lookup(widget_type) else {
        return false;
    };
    let canonical = normalize_name(&info.widget_type);
    let placements = layout
        .iter()
        .filter(|entry| normalize_name(entry.id.widget_type()) == canonical);
    if !info.allow_multiple {
        return placements.count() == 0;
    }
    match info.max_instances {
        Some(max) => {
            let enabled = placements.filter(|entry| entry.enabled).count();
            u32::try_from(enabled).is_ok_and(|count| count < max)
        }
        None => true,
    }
}

/// Place a new widget below the current content using registry default geometry.
///
/// A disabled singleton is re-enabled rather than duplicated. Returns the id of the
/// placed (or re-enabled) entry, or `None` when the type is unknown or at capacity.
pub fn add_widget(
    layout: &mut Vec<WidgetEntry>,
    widget_type: &str,
    registry: &WidgetRegistry,
) -> Option<WidgetId> {
    let info = registry.get(widget_type)?;
    if !info.allow_multiple {
        if let Some(existing) = layout
            .iter_mut()
            .find(|entry| {
                !entry.enabled && normalize_name(entry.id.widget_type()) == info.widget_type
            })
        {
            existing.enabled = true;
            return Some(existing.id.clone());
        }
    }
    if !can_add_instance(layout, widget_type, registry) {
        return None;
    }
    let id = if info.allow_multiple {
        mint_instance_id(&info.widget_type, |candidate| {
            layout.iter().any(|entry| &entry.id == candidate)
        })
    } else {
        WidgetId::singleton(&info.widget_type)
    };
    let y = layout.iter().map(WidgetEntry::bottom).max().unwrap_or(0);
    let mut entry = WidgetEntry::new(id.clone(), 0, y, info.default_width, info.default_height);
    entry.display_name.clone_from(&info.display_name);
    entry.category.clone_from(&info.category);
    entry.description.clone_from(&info.description);
    layout.push(entry);
    Some(id)
}

/// Layout built from every `default_enabled` registry type, packed left to right.
#[must_use]
pub fn default_layout(registry: &WidgetRegistry) -> Vec<WidgetEntry> {
    let mut layout = Vec::new();
    let (mut x, mut y, mut row_height) = (0u32, 0u32, 0u32);
    for info in registry.iter().filter(|info| info.default_enabled) {
        let w = info.default_width.min(GRID_COLUMNS);
        if x > 0 && x + w > GRID_COLUMNS {
            x = 0;
            y += row_height;
            row_height = 0;
        }
        let id = if info.allow_multiple {
            mint_instance_id(&info.widget_type, |candidate| {
                layout.iter().any(|entry: &WidgetEntry| &entry.id == candidate)
            })
        } else {
            WidgetId::singleton(&info.widget_type)
        };
        let mut entry = WidgetEntry::new(id, x, y, w, info.default_height);
        entry.display_name.clone_from(&info.display_name);
        entry.category.clone_from(&info.category);
        layout.push(entry);
        x += w;
        row_height = row_height.max(info.default_height);
    }
    deduplicate_singletons(layout)
}

/// Parse a layout document (a JSON array of entries).
pub fn layout_from_json(text: &str) -> Result<Vec<WidgetEntry>, LayoutError> {
    serde_json::from_str(text).map_err(|err| LayoutError::InvalidLayout(err.to_string().into()))
}
