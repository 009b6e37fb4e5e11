//! Point-in-time snapshots of a driver.
//!
//! A snapshot is diagnostic: it records what the driver looked like, it does
//! not restore a live connection.

use crate::core::TransitionHistory;
use crate::driver::protocol::ParamMap;
use crate::driver::state::{ConnectionEvent, ConnectionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Version identifier for the snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors that can occur reading or writing a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unsupported snapshot version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Serializable view of a driver's state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverSnapshot {
    /// Snapshot format version
    pub version: u32,

    pub driver_id: Uuid,

    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,

    pub connection_state: ConnectionState,

    pub previous_state: Option<ConnectionState>,

    /// Wire name of the state a caller would see
    pub resource_state: String,

    pub startup_config: ParamMap,

    /// Protocol parameter cache, present only while connected
    pub cached_config: Option<ParamMap>,

    /// Recent connection transitions
    pub history: TransitionHistory<ConnectionState, ConnectionEvent>,
}

impl DriverSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    /// Parse a snapshot, rejecting versions this build does not understand.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}
