//! Remote sync channel contract.

#![allow(missing_docs)]

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

use crate::error::SyncError;

/// One queued write to the remote store. `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundWrite {
    pub key: SmolStr,
    pub value: Option<Value>,
    pub updated_at: u64,
    pub session_id: SmolStr,
}

/// A value as the remote store knows it. `value: None` is a remote reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteValue {
    pub key: SmolStr,
    pub value: Option<Value>,
    pub updated_at: u64,
}

impl RemoteValue {
    #[must_use]
    pub fn new(key: impl Into<SmolStr>, value: Value, updated_at: u64) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            updated_at,
        }
    }

    #[must_use]
    pub fn deleted(key: impl Into<SmolStr>, updated_at: u64) -> Self {
        Self {
            key: key.into(),
            value: None,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushScope {
    /// Only the listed keys changed.
    Keys,
    /// The full remote document; keys not listed no longer exist remotely.
    Snapshot,
}

/// A change pushed by the remote channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePush {
    pub scope: PushScope,
    pub entries: Vec<RemoteValue>,
    /// Remote document version after the change.
    #[serde(default)]
    pub version: Option<u64>,
    /// Session whose write caused this push, when the remote reports it.
    #[serde(default)]
    pub origin_session: Option<SmolStr>,
}

impl RemotePush {
    #[must_use]
    pub fn keys(entries: Vec<RemoteValue>) -> Self {
        Self {
            scope: PushScope::Keys,
            entries,
            version: None,
            origin_session: None,
        }
    }

    #[must_use]
    pub fn snapshot(snapshot: RemoteSnapshot) -> Self {
        Self {
            scope: PushScope::Snapshot,
            entries: snapshot.entries,
            version: Some(snapshot.version),
            origin_session: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn from_session(mut self, session: impl Into<SmolStr>) -> Self {
        self.origin_session = Some(session.into());
        self
    }
}

/// Full remote document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub version: u64,
    pub entries: Vec<RemoteValue>,
}

/// Transport to the authoritative preference store.
///
/// `write` is optimistic-locked: it carries the document version the writer last
/// saw and fails with [`SyncError::Conflict`] when the remote has moved on. It
/// resolves to the new document version.
pub trait RemoteChannel: Send + Sync + 'static {
    fn write(
        &self,
        write: OutboundWrite,
        base_version: u64,
    ) -> impl Future<Output = Result<u64, SyncError>> + Send;

    fn snapshot(&self) -> impl Future<Output = Result<RemoteSnapshot, SyncError>> + Send;
}
