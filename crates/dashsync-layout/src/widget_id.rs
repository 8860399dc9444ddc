//! Widget identifiers: `type` for singletons, `type:instance` for repeatable widgets.
//!
//! The same id is the layout entry key and the preference-store key for the widget's
//! settings, so two placements of one repeatable type must never share an id.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::LayoutError;

/// Separator between the widget type and the instance suffix.
pub const INSTANCE_SEPARATOR: char = ':';

const INSTANCE_ID_LEN: usize = 8;
const INSTANCE_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MINT_ATTEMPTS: usize = 16;

/// Encoded widget identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(SmolStr);

/// Decoded form of a [`WidgetId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WidgetParts {
    pub widget_type: SmolStr,
    pub instance_id: Option<SmolStr>,
}

impl WidgetId {
    /// Wrap stored id text as-is. Use [`WidgetId::parse`] for untrusted input.
    #[must_use]
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Id of a singleton placement.
    #[must_use]
    pub fn singleton(widget_type: &str) -> Self {
        Self(SmolStr::new(widget_type))
    }

    /// Encode a type and optional instance suffix. An empty suffix encodes as a
    /// singleton id.
    #[must_use]
    pub fn create(widget_type: &str, instance_id: Option<&str>) -> Self {
        match instance_id.filter(|id| !id.is_empty()) {
            Some(instance) => Self(SmolStr::new(format!(
                "{widget_type}{INSTANCE_SEPARATOR}{instance}"
            ))),
            None => Self::singleton(widget_type),
        }
    }

    /// Parse untrusted id text, rejecting ids without a widget type.
    pub fn parse(text: &str) -> Result<Self, LayoutError> {
        let trimmed = text.trim();
        let id = Self::new(trimmed);
        if id.widget_type().is_empty() {
            return Err(LayoutError::InvalidWidgetId(SmolStr::new(text)));
        }
        Ok(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Widget type portion (everything before the first separator).
    #[must_use]
    pub fn widget_type(&self) -> &str {
        match self.0.split_once(INSTANCE_SEPARATOR) {
            Some((widget_type, _)) => widget_type,
            None => self.0.as_str(),
        }
    }

    /// Instance suffix, if any. An empty suffix (`"clock:"`) counts as absent.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.0
            .split_once(INSTANCE_SEPARATOR)
            .map(|(_, instance)| instance)
            .filter(|instance| !instance.is_empty())
    }

    #[must_use]
    pub fn is_instanced(&self) -> bool {
        self.instance_id().is_some()
    }

    #[must_use]
    pub fn parts(&self) -> WidgetParts {
        WidgetParts {
            widget_type: SmolStr::new(self.widget_type()),
            instance_id: self.instance_id().map(SmolStr::new),
        }
    }

    /// Same widget type with the instance suffix removed.
    #[must_use]
    pub fn without_instance(&self) -> Self {
        Self::singleton(self.widget_type())
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&str> for WidgetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<WidgetParts> for WidgetId {
    fn from(parts: WidgetParts) -> Self {
        Self::create(&parts.widget_type, parts.instance_id.as_deref())
    }
}

/// Split an id on its first separator.
#[must_use]
pub fn parse_id(id: &str) -> WidgetParts {
    WidgetId::new(id).parts()
}

/// Inverse of [`parse_id`].
#[must_use]
pub fn create_id(widget_type: &str, instance_id: Option<&str>) -> WidgetId {
    WidgetId::create(widget_type, instance_id)
}

/// Short random instance token (8 base-36 characters).
#[must_use]
pub fn generate_instance_id() -> SmolStr {
    let mut bits: u64 = rand::random();
    let mut token = String::with_capacity(INSTANCE_ID_LEN);
    for _ in 0..INSTANCE_ID_LEN {
        token.push(char::from(INSTANCE_ALPHABET[(bits % 36) as usize]));
        bits /= 36;
    }
    SmolStr::new(token)
}

/// Mint an instance id for `widget_type` whose encoded id is not already taken.
pub fn mint_instance_id(widget_type: &str, taken: impl Fn(&WidgetId) -> bool) -> WidgetId {
    let mut candidate = WidgetId::create(widget_type, Some(&generate_instance_id()));
    for _ in 0..MINT_ATTEMPTS {
        if !taken(&candidate) {
            break;
        }
        candidate = WidgetId::create(widget_type, Some(&generate_instance_id()));
    }
    candidate
}
