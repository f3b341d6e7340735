use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

/// Timer configuration pushed by the remote session when a timer starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub work_secs: u64,
    pub break_secs: u64,
    pub cycles: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerPhase {
    Work,
    Break,
}

/// Typed view of one inbound wire frame.
///
/// Frames carry a string `type` discriminant. Unknown discriminants and
/// malformed payloads decode to `Unknown` instead of erroring; unknown
/// extra fields are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundEvent {
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        connection_counts: HashMap<String, u32>,
    },
    #[serde(rename_all = "camelCase")]
    TimerStart {
        config: TimerConfig,
        origin_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TimerExtend { seconds: u64, origin_id: String },
    #[serde(rename_all = "camelCase")]
    TimerPhaseEnd {
        phase: TimerPhase,
        next_cycle: u32,
        is_last_cycle: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continue_as: Option<TimerPhase>,
    },
    #[serde(rename_all = "camelCase")]
    TimerSessionEnd { origin_id: String },
    #[serde(rename_all = "camelCase")]
    Hello { client_id: String },
    #[serde(skip)]
    Unknown { raw: String },
}

impl InboundEvent {
    /// Decodes one raw frame. Never fails: anything that does not parse
    /// into a known variant comes back as `Unknown` carrying the raw text.
    pub fn decode(raw: &str) -> InboundEvent {
        match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(err) => {
                debug!("undecodable inbound frame ({err}): {raw}");
                InboundEvent::Unknown {
                    raw: raw.to_string(),
                }
            }
        }
    }
}

/// Device-signal transition event sent upstream over the session link.
///
/// Created by the aggregator and consumed once by serialization into a
/// wire frame, using the same `type` discriminant convention as inbound
/// frames. Timestamps are unix epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundEvent {
    WearableOff { at: i64 },
    WearableOn { at: i64 },
    WearableDisconnected { at: i64 },
    WearableReconnected { at: i64 },
    LockEngaged { at: i64 },
    LockReleased { at: i64 },
    WeakSignal { rssi: i32 },
    StrongSignal { rssi: i32 },
}
