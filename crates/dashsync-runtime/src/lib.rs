//! `dashsync-runtime` - stateful preference synchronization.
//!
//! This crate provides the moving parts around the pure layout logic in
//! `dashsync-layout`:
//!
//! - **Keyed store**: cached, persisted, observable preferences with
//!   last-writer-wins merging of remote pushes and echo suppression
//! - **Sync worker**: the outbound write queue, coalescing, conflict recovery
//! - **Optimistic overlay**: unconfirmed device writes layered over server truth,
//!   with debounced, coalesced dispatch
//! - **Devices**: fan-controller port keys, typed patches and a cached device API
//! - **Configuration**: `dashsync.toml` loading and validation
//!
//! The store is constructed once per process and handed around as a cloned handle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Wall-clock abstraction.
pub mod clock;
/// Configuration loading.
pub mod config;
/// Fan-controller domain and cached device reads.
pub mod devices;
/// Error types.
pub mod error;
/// Optimistic device overlay.
pub mod overlay;
/// Keyed preference store and sync worker.
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OverlayConfig, SyncConfig};
pub use devices::{CachedDeviceApi, PortKey, PortMode, PortPatch};
pub use error::SyncError;
pub use overlay::{DeviceApi, OptimisticOverlay, OverlayHandle, OverlayWorker};
pub use store::{KeyedStore, StoreChange, Subscription, SyncWorker};
