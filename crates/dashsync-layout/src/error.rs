//! Layout and registry errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while loading layout data from outside the process.
///
/// Repair paths never produce these: a bad entry inside an otherwise readable
/// layout is dropped or fixed, not reported as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Widget id text that cannot name a widget type.
    #[error("invalid widget id '{0}'")]
    InvalidWidgetId(SmolStr),

    /// Registry file could not be read or parsed.
    #[error("invalid widget registry '{0}'")]
    InvalidRegistry(SmolStr),

    /// Layout document could not be read or parsed.
    #[error("invalid layout '{0}'")]
    InvalidLayout(SmolStr),

    /// Preset slot outside the supported range.
    #[error("preset slot {slot} out of range (0..{max})")]
    PresetSlot { slot: usize, max: usize },
}
