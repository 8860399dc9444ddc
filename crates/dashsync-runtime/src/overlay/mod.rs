//! Optimistic device overlay.
//!
//! Controls call [`OverlayHandle::update_setting`]; the patch is layered over the
//! last server read at once, then coalesced per entity and written after the
//! debounce window by the [`OverlayWorker`]. A successful write schedules a
//! confirming read; a failed one reverts the override and forces a read.

pub mod debounce;
pub mod service;
pub mod state;

pub use debounce::{DueWrite, WriteCoalescer};
pub use service::{DeviceApi, OverlayHandle, OverlayKey, OverlayWorker};
pub use state::{OptimisticOverlay, Settings};
