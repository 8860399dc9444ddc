//! `dashsync.toml` configuration loading.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::SyncError;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;
pub const DEFAULT_CONFIRM_REFRESH_MS: u64 = 1_000;
pub const DEFAULT_DEVICE_CACHE_TTL_MS: u64 = 30_000;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tags outbound writes so this session can recognize its own echoes.
    pub session_id: SmolStr,
    /// Persisted preference cache; in-memory only when absent.
    pub cache_path: Option<PathBuf>,
    pub overlay: OverlayConfig,
    pub device_cache_ttl: Duration,
    pub log_level: SmolStr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayConfig {
    pub debounce: Duration,
    pub grace_period: Duration,
    /// Delay between a successful write and the confirming device read.
    pub confirm_refresh: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            confirm_refresh: Duration::from_millis(DEFAULT_CONFIRM_REFRESH_MS),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            session_id: generate_session_id(),
            cache_path: None,
            overlay: OverlayConfig::default(),
            device_cache_ttl: Duration::from_millis(DEFAULT_DEVICE_CACHE_TTL_MS),
            log_level: SmolStr::new_inline("info"),
        }
    }
}

impl SyncConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SyncError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SyncError> {
        let raw: SyncToml = toml::from_str(text)
            .map_err(|err| SyncError::InvalidConfig(format!("dashsync.toml: {err}").into()))?;
        raw.into_config()
    }
}

/// Random session identifier for a process that was not given one.
#[must_use]
pub fn generate_session_id() -> SmolStr {
    let bits: u64 = rand::random();
    format!("session-{bits:016x}").into()
}

#[derive(Debug, Default, Deserialize)]
struct SyncToml {
    #[serde(default)]
    store: StoreSection,
    #[serde(default)]
    overlay: OverlaySection,
    #[serde(default)]
    devices: DevicesSection,
    #[serde(default)]
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
struct StoreSection {
    session_id: Option<String>,
    cache_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySection {
    debounce_ms: Option<u64>,
    grace_period_ms: Option<u64>,
    confirm_refresh_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DevicesSection {
    cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LogSection {
    level: Option<String>,
}

impl SyncToml {
    fn into_config(self) -> Result<SyncConfig, SyncError> {
        let session_id = match self.store.session_id {
            Some(id) if id.trim().is_empty() => {
                return Err(SyncError::InvalidConfig(
                    "store.session_id must not be empty".into(),
                ));
            }
            Some(id) => SmolStr::new(id.trim()),
            None => generate_session_id(),
        };
        let debounce_ms = self.overlay.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS);
        if debounce_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "overlay.debounce_ms must be > 0".into(),
            ));
        }
        let grace_period_ms = self
            .overlay
            .grace_period_ms
            .unwrap_or(DEFAULT_GRACE_PERIOD_MS);
        if grace_period_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "overlay.grace_period_ms must be > 0".into(),
            ));
        }
        if debounce_ms >= grace_period_ms {
            return Err(SyncError::InvalidConfig(
                format!("overlay.debounce_ms must be below grace_period_ms ({grace_period_ms})")
                    .into(),
            ));
        }
        let confirm_refresh_ms = self
            .overlay
            .confirm_refresh_ms
            .unwrap_or(DEFAULT_CONFIRM_REFRESH_MS);
        let level = self
            .log
            .level
            .unwrap_or_else(|| "info".into())
            .trim()
            .to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(SyncError::InvalidConfig(
                format!("invalid log.level '{level}'").into(),
            ));
        }
        Ok(SyncConfig {
            session_id,
            cache_path: self.store.cache_path,
            overlay: OverlayConfig {
                debounce: Duration::from_millis(debounce_ms),
                grace_period: Duration::from_millis(grace_period_ms),
                confirm_refresh: Duration::from_millis(confirm_refresh_ms),
            },
            device_cache_ttl: Duration::from_millis(
                self.devices
                    .cache_ttl_ms
                    .unwrap_or(DEFAULT_DEVICE_CACHE_TTL_MS),
            ),
            log_level: SmolStr::new(level),
        })
    }
}
