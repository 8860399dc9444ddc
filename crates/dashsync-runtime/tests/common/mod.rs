#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::{ready, Future};
use std::sync::Arc;

use dashsync_runtime::overlay::{DeviceApi, Settings};
use dashsync_runtime::store::{
    OutboundWrite, RemoteChannel, RemotePush, RemoteSnapshot, RemoteValue,
};
use dashsync_runtime::{PortKey, SyncError};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use smol_str::SmolStr;

#[derive(Debug, Default)]
struct RemoteState {
    version: u64,
    values: IndexMap<SmolStr, (Value, u64)>,
    writes: Vec<(OutboundWrite, u64)>,
    failures: VecDeque<SyncError>,
    snapshots: usize,
}

/// In-memory remote store with optimistic locking that records every write.
#[derive(Debug, Clone, Default)]
pub struct RecordingRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write with `error`.
    pub fn fail_next(&self, error: SyncError) {
        self.state.lock().failures.push_back(error);
    }

    /// A write from another device; returns the push that device's session would
    /// cause.
    pub fn external_write(&self, key: &str, value: Value, updated_at: u64) -> RemotePush {
        let mut state = self.state.lock();
        state.version += 1;
        state
            .values
            .insert(key.into(), (value.clone(), updated_at));
        RemotePush::keys(vec![RemoteValue::new(key, value, updated_at)])
            .with_version(state.version)
            .from_session("other-device")
    }

    pub fn writes(&self) -> Vec<OutboundWrite> {
        self.state
            .lock()
            .writes
            .iter()
            .map(|(write, _)| write.clone())
            .collect()
    }

    pub fn base_versions(&self) -> Vec<u64> {
        self.state.lock().writes.iter().map(|(_, base)| *base).collect()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.state.lock().values.get(key).map(|(value, _)| value.clone())
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn snapshots_served(&self) -> usize {
        self.state.lock().snapshots
    }

    fn apply(&self, write: OutboundWrite, base_version: u64) -> Result<u64, SyncError> {
        let mut state = self.state.lock();
        state.writes.push((write.clone(), base_version));
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if base_version != state.version {
            return Err(SyncError::Conflict {
                expected: base_version,
                actual: state.version,
            });
        }
        state.version += 1;
        match write.value {
            Some(value) => {
                state.values.insert(write.key, (value, write.updated_at));
            }
            None => {
                state.values.shift_remove(&write.key);
            }
        }
        Ok(state.version)
    }
}

impl RemoteChannel for RecordingRemote {
    fn write(
        &self,
        write: OutboundWrite,
        base_version: u64,
    ) -> impl Future<Output = Result<u64, SyncError>> + Send {
        ready(self.apply(write, base_version))
    }

    fn snapshot(&self) -> impl Future<Output = Result<RemoteSnapshot, SyncError>> + Send {
        let mut state = self.state.lock();
        state.snapshots += 1;
        let snapshot = RemoteSnapshot {
            version: state.version,
            entries: state
                .values
                .iter()
                .map(|(key, (value, updated_at))| {
                    RemoteValue::new(key.clone(), value.clone(), *updated_at)
                })
                .collect(),
        };
        ready(Ok(snapshot))
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    ports: IndexMap<PortKey, Settings>,
    writes: Vec<(PortKey, Settings)>,
    fetches: Vec<bool>,
    fail_writes: bool,
    ignore_writes: bool,
}

/// Scripted controller: writes patch the stored port settings unless told to
/// fail or ignore them.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl ScriptedDevice {
    pub fn with_ports(ports: impl IntoIterator<Item = (PortKey, Settings)>) -> Self {
        let device = Self::default();
        device.state.lock().ports = ports.into_iter().collect();
        device
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Accept writes without changing what later reads report.
    pub fn ignore_writes(&self, ignore: bool) {
        self.state.lock().ignore_writes = ignore;
    }

    pub fn writes(&self) -> Vec<(PortKey, Settings)> {
        self.state.lock().writes.clone()
    }

    /// `force` flag of every read so far.
    pub fn fetches(&self) -> Vec<bool> {
        self.state.lock().fetches.clone()
    }
}

impl DeviceApi<PortKey> for ScriptedDevice {
    fn write_settings(
        &self,
        key: PortKey,
        patch: Settings,
    ) -> impl Future<Output = Result<(), SyncError>> + Send {
        let mut state = self.state.lock();
        state.writes.push((key.clone(), patch.clone()));
        let result = if state.fail_writes {
            Err(SyncError::Network("controller offline".into()))
        } else {
            if !state.ignore_writes {
                state.ports.entry(key).or_default().extend(patch);
            }
            Ok(())
        };
        ready(result)
    }

    fn fetch_all(
        &self,
        force: bool,
    ) -> impl Future<Output = Result<Vec<(PortKey, Settings)>, SyncError>> + Send {
        let mut state = self.state.lock();
        state.fetches.push(force);
        let ports = state
            .ports
            .iter()
            .map(|(key, settings)| (key.clone(), settings.clone()))
            .collect();
        ready(Ok(ports))
    }
}

pub fn settings(value: Value) -> Settings {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}
