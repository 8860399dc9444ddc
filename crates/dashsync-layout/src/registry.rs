//! Widget-type registry.

#![allow(missing_docs)]

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::LayoutError;
use crate::layout::{MIN_WIDGET_HEIGHT, MIN_WIDGET_WIDTH};
use crate::widget_id::INSTANCE_SEPARATOR;

/// Lookup seam for widget-type metadata.
pub trait WidgetTypes {
    fn lookup(&self, widget_type: &str) -> Option<&WidgetTypeInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetTypeInfo {
    pub widget_type: SmolStr,
    pub display_name: Option<SmolStr>,
    pub category: Option<SmolStr>,
    pub description: Option<SmolStr>,
    pub allow_multiple: bool,
    pub max_instances: Option<u32>,
    pub default_width: u32,
    pub default_height: u32,
    /// Part of the generated default layout.
    pub default_enabled: bool,
}

impl WidgetTypeInfo {
    #[must_use]
    pub fn singleton(widget_type: impl Into<SmolStr>) -> Self {
        Self {
            widget_type: widget_type.into(),
            display_name: None,
            category: None,
            description: None,
            allow_multiple: false,
            max_instances: None,
            default_width: MIN_WIDGET_WIDTH,
            default_height: MIN_WIDGET_HEIGHT,
            default_enabled: false,
        }
    }

    #[must_use]
    pub fn multi(widget_type: impl Into<SmolStr>, max_instances: Option<u32>) -> Self {
        Self {
            allow_multiple: true,
            max_instances,
            ..Self::singleton(widget_type)
        }
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.default_width = width.max(MIN_WIDGET_WIDTH);
        self.default_height = height.max(MIN_WIDGET_HEIGHT);
        self
    }

    #[must_use]
    pub fn enabled_by_default(mut self) -> Self {
        self.default_enabled = true;
        self
    }
}

/// In-memory widget catalog keyed by normalized type name.
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    entries: IndexMap<SmolStr, WidgetTypeInfo>,
}

impl WidgetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a widget type. Type names are trimmed and
    /// lower-cased; names containing the instance separator are rejected.
    pub fn register(&mut self, mut info: WidgetTypeInfo) -> Result<(), LayoutError> {
        let name = normalize_name(&info.widget_type);
        if name.is_empty() || name.contains(INSTANCE_SEPARATOR) {
            return Err(LayoutError::InvalidRegistry(
                format!("invalid widget type name '{}'", info.widget_type).into(),
            ));
        }
        info.widget_type = name.clone();
        self.entries.insert(name, info);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, widget_type: &str) -> Option<&WidgetTypeInfo> {
        self.entries.get(&normalize_name(widget_type))
    }

    #[must_use]
    pub fn contains(&self, widget_type: &str) -> bool {
        self.get(widget_type).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WidgetTypeInfo> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            LayoutError::InvalidRegistry(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, LayoutError> {
        let raw: RegistryToml = toml::from_str(text)
            .map_err(|err| LayoutError::InvalidRegistry(format!("registry: {err}").into()))?;
        let mut registry = Self::new();
        for widget in raw.widget {
            registry.register(widget.into_info()?)?;
        }
        Ok(registry)
    }
}

impl WidgetTypes for WidgetRegistry {
    fn lookup(&self, widget_type: &str) -> Option<&WidgetTypeInfo> {
        self.get(widget_type)
    }
}

/// Canonical form of a widget type name: trimmed and lower-cased.
pub(crate) fn normalize_name(name: &str) -> SmolStr {
    SmolStr::new(name.trim().to_ascii_lowercase())
}

#[derive(Debug, Deserialize)]
struct RegistryToml {
    #[serde(default)]
    widget: Vec<WidgetToml>,
}

#[derive(Debug, Deserialize)]
struct WidgetToml {
    #[serde(rename = "type")]
    widget_type: String,
    display_name: Option<String>,
    category: Option<String>,
    description: Option<String>,
    allow_multiple: Option<bool>,
    max_instances: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    default_enabled: Option<bool>,
}

impl WidgetToml {
    fn into_info(self) -> Result<WidgetTypeInfo, LayoutError> {
        let allow_multiple = self.allow_multiple.unwrap_or(false);
        if !allow_multiple && self.max_instances.is_some() {
            return Err(LayoutError::InvalidRegistry(
                format!(
                    "widget '{}' sets max_instances without allow_multiple",
                    self.widget_type
                )
                .into(),
            ));
        }
        if self.max_instances == Some(0) {
            return Err(LayoutError::InvalidRegistry(
                format!("widget '{}' max_instances must be > 0", self.widget_type).into(),
            ));
        }
        Ok(WidgetTypeInfo {
            widget_type: SmolStr::new(self.widget_type),
            display_name: self.display_name.map(SmolStr::new),
            category: self.category.map(SmolStr::new),
            description: self.description.map(SmolStr::new),
            allow_multiple,
            max_instances: self.max_instances,
            default_width: self.width.unwrap_or(MIN_WIDGET_WIDTH).max(MIN_WIDGET_WIDTH),
            default_height: self
                .height
                .unwrap_or(MIN_WIDGET_HEIGHT)
                .max(MIN_WIDGET_HEIGHT),
            default_enabled: self.default_enabled.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_widgets_from_toml() {
        let registry = WidgetRegistry::from_toml_str(
            r#"
[[widget]]
type = "Clock"
category = "time"
width = 3
height = 2
default_enabled = true

[[widget]]
type = "note"
allow_multiple = true
max_instances = 4
"#,
        )
        .expect("registry");
        assert_eq!(registry.len(), 2);
        let clock = registry.get("clock").expect("clock");
        assert!(!clock.allow_multiple);
        assert_eq!((clock.default_width, clock.default_height), (3, 2));
        assert!(clock.default_enabled);
        let note = registry.lookup(" NOTE ").expect("note");
        assert_eq!(note.max_instances, Some(4));
    }

    #[test]
    fn rejects_max_instances_on_singleton() {
        let err = WidgetRegistry::from_toml_str(
            r#"
[[widget]]
type = "clock"
max_instances = 2
"#,
        )
        .expect_err("singleton with max");
        assert!(matches!(err, LayoutError::InvalidRegistry(_)));
    }

    #[test]
    fn rejects_separator_in_type_name() {
        let mut registry = WidgetRegistry::new();
        assert!(registry.register(WidgetTypeInfo::singleton("a:b")).is_err());
        assert!(registry.register(WidgetTypeInfo::singleton("  ")).is_err());
    }
}
