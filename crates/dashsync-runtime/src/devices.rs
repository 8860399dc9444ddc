//! Fan-controller ports and cached device reads.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use tokio::time::Instant;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::overlay::{DeviceApi, Settings};

/// Port 0 addresses the controller itself.
pub const CONTROLLER_PORT: u8 = 0;
pub const MAX_PORT_INDEX: u8 = 4;
pub const MAX_FAN_SPEED: u8 = 10;

/// Controller API field names.
pub const FIELD_MODE: &str = "atType";
pub const FIELD_ON_SPEED: &str = "onSpead";
pub const FIELD_OFF_SPEED: &str = "offSpead";
pub const FIELD_CURRENT_SPEED: &str = "speak";

/// One fan port on one controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortKey {
    pub device_id: SmolStr,
    pub port_index: u8,
}

impl PortKey {
    pub fn new(device_id: impl Into<SmolStr>, port_index: u8) -> Result<Self, SyncError> {
        let device_id = device_id.into();
        if device_id.trim().is_empty() {
            return Err(SyncError::InvalidSetting("empty device id".into()));
        }
        if !(1..=MAX_PORT_INDEX).contains(&port_index) {
            return Err(SyncError::InvalidSetting(
                format!("port {port_index} out of range 1..={MAX_PORT_INDEX}").into(),
            ));
        }
        Ok(Self {
            device_id,
            port_index,
        })
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.port_index)
    }
}

/// Port operating mode, with the controller's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PortMode {
    Off,
    On,
    Auto,
    TimerToOn,
    TimerToOff,
    Cycle,
    Schedule,
    Vpd,
}

impl PortMode {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 1,
            Self::On => 2,
            Self::Auto => 3,
            Self::TimerToOn => 4,
            Self::TimerToOff => 5,
            Self::Cycle => 6,
            Self::Schedule => 7,
            Self::Vpd => 8,
        }
    }
}

impl TryFrom<u8> for PortMode {
    type Error = SyncError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Self::Off,
            2 => Self::On,
            3 => Self::Auto,
            4 => Self::TimerToOn,
            5 => Self::TimerToOff,
            6 => Self::Cycle,
            7 => Self::Schedule,
            8 => Self::Vpd,
            _ => {
                return Err(SyncError::InvalidSetting(
                    format!("unknown port mode {code}").into(),
                ))
            }
        })
    }
}

impl From<PortMode> for u8 {
    fn from(mode: PortMode) -> Self {
        mode.code()
    }
}

/// Typed change to a port's settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortPatch {
    pub mode: Option<PortMode>,
    pub on_speed: Option<u8>,
    pub off_speed: Option<u8>,
}

impl PortPatch {
    /// Run the port at `speed` in manual mode.
    #[must_use]
    pub fn speed(speed: u8) -> Self {
        Self {
            mode: Some(PortMode::On),
            on_speed: Some(speed),
            off_speed: None,
        }
    }

    #[must_use]
    pub fn mode(mode: PortMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// Validate and encode as controller settings fields.
    pub fn to_settings(&self) -> Result<Settings, SyncError> {
        let mut settings = Settings::new();
        if let Some(mode) = self.mode {
            settings.insert(FIELD_MODE.into(), Value::from(mode.code()));
        }
        for (field, speed) in [(FIELD_ON_SPEED, self.on_speed), (FIELD_OFF_SPEED, self.off_speed)] {
            let Some(speed) = speed else {
                continue;
            };
            if speed > MAX_FAN_SPEED {
                return Err(SyncError::InvalidSetting(
                    format!("{field} {speed} exceeds {MAX_FAN_SPEED}").into(),
                ));
            }
            settings.insert(field.into(), Value::from(speed));
        }
        if settings.is_empty() {
            return Err(SyncError::InvalidSetting("empty port patch".into()));
        }
        Ok(settings)
    }
}

/// Decoded view of a port's effective settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortView {
    pub mode: Option<PortMode>,
    pub on_speed: Option<u8>,
    pub off_speed: Option<u8>,
    /// Speed the port reports running at.
    pub current_speed: Option<u8>,
}

impl PortView {
    /// Read known fields; unknown or malformed fields read as `None`.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let small = |field: &str| {
            settings
                .get(field)
                .and_then(Value::as_u64)
                .and_then(|value| u8::try_from(value).ok())
        };
        Self {
            mode: small(FIELD_MODE).and_then(|code| PortMode::try_from(code).ok()),
            on_speed: small(FIELD_ON_SPEED),
            off_speed: small(FIELD_OFF_SPEED),
            current_speed: small(FIELD_CURRENT_SPEED),
        }
    }
}

type CachedRead = (Instant, Vec<(PortKey, Settings)>);

/// [`DeviceApi`] wrapper that serves full reads from memory for a TTL.
///
/// Forced reads bypass the cache; every write invalidates it.
pub struct CachedDeviceApi<A> {
    inner: A,
    ttl: Duration,
    cached: Mutex<Option<CachedRead>>,
}

impl<A> CachedDeviceApi<A> {
    pub fn new(inner: A, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Cache with the configured `[devices] cache_ttl_ms`.
    pub fn from_config(inner: A, config: &SyncConfig) -> Self {
        Self::new(inner, config.device_cache_ttl)
    }

    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn invalidate(&self) {
        self.cached.lock().take();
    }

    fn fresh(&self, now: Instant) -> Option<Vec<(PortKey, Settings)>> {
        let cached = self.cached.lock();
        let (fetched_at, states) = cached.as_ref()?;
        (now.saturating_duration_since(*fetched_at) < self.ttl).then(|| states.clone())
    }
}

impl<A: DeviceApi<PortKey>> DeviceApi<PortKey> for CachedDeviceApi<A> {
    async fn write_settings(&self, key: PortKey, patch: Settings) -> Result<(), SyncError> {
        let result = self.inner.write_settings(key, patch).await;
        self.invalidate();
        result
    }

    async fn fetch_all(&self, force: bool) -> Result<Vec<(PortKey, Settings)>, SyncError> {
        if !force {
            if let Some(states) = self.fresh(Instant::now()) {
                debug!(ports = states.len(), "serving cached device read");
                return Ok(states);
            }
        }
        let states = self.inner.fetch_all(force).await?;
        *self.cached.lock() = Some((Instant::now(), states.clone()));
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn port_keys_cover_fan_ports_only() {
        assert!(PortKey::new("ctrl-1", 1).is_ok());
        assert!(PortKey::new("ctrl-1", MAX_PORT_INDEX).is_ok());
        assert!(PortKey::new("ctrl-1", CONTROLLER_PORT).is_err());
        assert!(PortKey::new("ctrl-1", 5).is_err());
        assert!(PortKey::new(" ", 1).is_err());
        assert_eq!(PortKey::new("ctrl-1", 2).expect("key").to_string(), "ctrl-1/2");
    }

    #[test]
    fn patch_encodes_controller_fields() {
        let settings = PortPatch::speed(7).to_settings().expect("settings");
        assert_eq!(settings[FIELD_MODE], 2);
        assert_eq!(settings[FIELD_ON_SPEED], 7);
        assert!(!settings.contains_key(FIELD_OFF_SPEED));

        assert!(PortPatch::speed(11).to_settings().is_err());
        assert!(PortPatch::default().to_settings().is_err());
    }

    #[test]
    fn view_decodes_known_fields() {
        let mut settings = PortPatch::mode(PortMode::Vpd).to_settings().expect("settings");
        settings.insert(FIELD_CURRENT_SPEED.into(), Value::from(4));
        settings.insert(FIELD_ON_SPEED.into(), Value::from("fast"));
        let view = PortView::from_settings(&settings);
        assert_eq!(view.mode, Some(PortMode::Vpd));
        assert_eq!(view.current_speed, Some(4));
        assert_eq!(view.on_speed, None);
    }

    #[test]
    fn modes_round_trip_codes() {
        for code in 1..=8u8 {
            let mode = PortMode::try_from(code).expect("mode");
            assert_eq!(mode.code(), code);
        }
        assert!(PortMode::try_from(0).is_err());
        let parsed: PortMode = serde_json::from_str("3").expect("json");
        assert_eq!(parsed, PortMode::Auto);
    }

    #[derive(Default)]
    struct CountingApi {
        reads: AtomicUsize,
    }

    impl DeviceApi<PortKey> for CountingApi {
        async fn write_settings(&self, _key: PortKey, _patch: Settings) -> Result<(), SyncError> {
            Ok(())
        }

        async fn fetch_all(&self, _force: bool) -> Result<Vec<(PortKey, Settings)>, SyncError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![(PortKey::new("ctrl-1", 1)?, Settings::new())])
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn configured_ttl_bounds_cached_reads() {
        let config = SyncConfig::from_toml_str("[devices]\ncache_ttl_ms = 2000").expect("config");
        let api = CachedDeviceApi::from_config(CountingApi::default(), &config);
        let reads = || api.inner().reads.load(Ordering::SeqCst);

        api.fetch_all(false).await.expect("read");
        tokio::time::advance(Duration::from_millis(1_500)).await;
        api.fetch_all(false).await.expect("cached");
        assert_eq!(reads(), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        api.fetch_all(false).await.expect("expired");
        assert_eq!(reads(), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cached_reads_expire_and_writes_invalidate() {
        let api = CachedDeviceApi::new(CountingApi::default(), Duration::from_secs(30));
        let reads = || api.inner().reads.load(Ordering::SeqCst);

        api.fetch_all(false).await.expect("read");
        api.fetch_all(false).await.expect("cached");
        assert_eq!(reads(), 1);

        api.fetch_all(true).await.expect("forced");
        assert_eq!(reads(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        api.fetch_all(false).await.expect("expired");
        assert_eq!(reads(), 3);

        let key = PortKey::new("ctrl-1", 1).expect("key");
        api.write_settings(key, Settings::new()).await.expect("write");
        api.fetch_all(false).await.expect("after write");
        assert_eq!(reads(), 4);
    }
}
