use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// one decoded, classified sample from the soil sensor
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Reading {
    /// volumetric water content in percent, one decimal
    pub moisture: f64,

    /// soil temperature in celsius, one decimal
    pub temperature: f64,

    pub moisture_status: MoistureStatus,
    pub temp_status: TemperatureStatus,

    /// when the register pair was read
    pub captured_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoistureStatus {
    TooDry,
    Good,
    TooWet,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureStatus {
    TooCold,
    Good,
    TooHot,
}

/// state shown to http clients as the `status` field
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperatingState {
    Initializing,
    Active,
    Stopped,
    Error,
    SessionLost,
}

/// stable identity of the physical instrument, the key of every remote document
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// serial device path, e.g. `/dev/ttyUSB0` or `COM6`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortId(String);

impl PortId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// remote lease authorizing one owner to operate the device
///
/// field names follow the documents the mobile app writes
/// (`userId`, `fieldId`, `lastHeartbeat`, ...).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Session {
    #[serde(rename = "userId")]
    pub owner_id: String,

    #[serde(rename = "fieldId", default)]
    pub scope_id: String,

    #[serde(default)]
    pub active: bool,

    #[serde(rename = "claimedAt", default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,

    #[serde(rename = "lastHeartbeat", default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Session {
    /// a freshly claimed session
    pub fn claimed(owner_id: &str, scope_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            scope_id: scope_id.to_string(),
            active: true,
            claimed_at: Some(now),
            last_heartbeat: Some(now),
        }
    }

    /// active and heard from within `timeout`
    ///
    /// this is the only place liveness is decided; nothing caches the result.
    /// a session that never sent a heartbeat is not considered expired.
    pub fn is_live(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if !self.active {
            return false;
        }
        match self.last_heartbeat {
            Some(beat) => now - beat <= timeout,
            None => true,
        }
    }
}
