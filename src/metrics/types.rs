use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One heart-rate reading from the companion wearable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSample {
    pub bpm: f64,
    pub observed_at: DateTime<Utc>,
}

/// One movement-intensity reading from the companion wearable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovementSample {
    pub intensity: f64,
    pub observed_at: DateTime<Utc>,
}

/// Latest radio signal-strength reading for the proximity link.
///
/// Ephemeral: superseded by the next reading and cleared to unknown when
/// monitoring stops. History lives in the aggregator's window, not here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProximitySample {
    pub rssi_dbm: i16,
    pub observed_at_ms: i64,
}

/// Screen-lock status as observed on the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScreenLock {
    Pinned,
    Unpinned,
}
