//! Sync errors.

#![allow(missing_docs)]

use dashsync_layout::LayoutError;
use smol_str::SmolStr;
use thiserror::Error;

/// Errors surfaced by the store, overlay and configuration layers.
///
/// None of these are fatal to the engine; writers log them and recover by retry or
/// refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transport failure talking to the remote store or a device.
    #[error("network error: {0}")]
    Network(SmolStr),

    /// The remote document moved past the version a write was based on.
    #[error("version conflict: write based on {expected}, remote at {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// Local cache could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(SmolStr),

    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),

    /// A device setting outside its allowed range.
    #[error("invalid setting: {0}")]
    InvalidSetting(SmolStr),

    #[error("serialization error: {0}")]
    Serialization(SmolStr),

    /// A worker was dropped while a caller still waited on it.
    #[error("channel closed: {0}")]
    ChannelClosed(SmolStr),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string().into())
    }
}
