use serde::Serialize;

/// Discriminant for the report payload carried in a record.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReportKind {
    HeartRate,
    PhysicalActivity,
    ScreenPin,
    SignalStrength,
    WearableLifecycle,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WearableLifecycleKind {
    Disconnected,
    OffWrist,
}

/// Payload of one telemetry report.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ReportBody {
    /// One full heart-rate window: the earliest observed value in the
    /// window, the window mean, and the sample count.
    #[serde(rename_all = "camelCase")]
    HeartRate { value: f64, mean: f64, count: usize },
    /// Movement window mean used as a speed estimate.
    #[serde(rename_all = "camelCase")]
    PhysicalActivity { speed: f64 },
    #[serde(rename_all = "camelCase")]
    ScreenPin { pinned: bool },
    /// Window-mean signal strength, truncated to integer dBm.
    #[serde(rename_all = "camelCase")]
    SignalStrength { rssi: i32 },
    #[serde(rename_all = "camelCase")]
    WearableLifecycle { event: WearableLifecycleKind },
}

impl ReportBody {
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportBody::HeartRate { .. } => ReportKind::HeartRate,
            ReportBody::PhysicalActivity { .. } => ReportKind::PhysicalActivity,
            ReportBody::ScreenPin { .. } => ReportKind::ScreenPin,
            ReportBody::SignalStrength { .. } => ReportKind::SignalStrength,
            ReportBody::WearableLifecycle { .. } => ReportKind::WearableLifecycle,
        }
    }
}

/// One structured telemetry record, built fresh per emission and handed to
/// the report sink. Never mutated after construction.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub course_id: String,
    pub kind: ReportKind,
    pub device: String,
    pub captured_at_ms: i64,
    pub body: ReportBody,
}
