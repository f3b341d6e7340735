use std::time::Duration;
use std::{fs, path::PathBuf, sync::RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::RetryPolicy;
use crate::metrics::AggregatorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Websocket base URL of the session endpoint.
    pub endpoint: String,
    /// Session target id; -1 means no target chosen yet.
    pub target: i64,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Connection-count channel watched for the remote host leaving.
    pub watched_channel: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: "wss://sessions.example.net/live".into(),
            target: -1,
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            watched_channel: "hosts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportSettings {
    pub endpoint: String,
    pub access_token: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://reports.example.net/v1/telemetry".into(),
            access_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregationSettings {
    pub heart_rate_window: usize,
    pub movement_window: usize,
    pub signal_window: usize,
    pub weak_signal_threshold_dbm: i32,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            heart_rate_window: 10,
            movement_window: 10,
            signal_window: 5,
            weak_signal_threshold_dbm: -90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProximitySettings {
    /// Radio address of the companion wearable, when one is paired.
    pub wearable_address: Option<String>,
    pub poll_interval_secs: u64,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            wearable_address: None,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub connection: ConnectionSettings,
    pub report: ReportSettings,
    pub aggregation: AggregationSettings,
    pub proximity: ProximitySettings,
}

impl PipelineSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connection.max_attempts,
            initial_delay: Duration::from_millis(self.connection.initial_delay_ms),
            max_delay: Duration::from_millis(self.connection.max_delay_ms),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            heart_rate_window: self.aggregation.heart_rate_window,
            movement_window: self.aggregation.movement_window,
            signal_window: self.aggregation.signal_window,
            weak_signal_threshold_dbm: self.aggregation.weak_signal_threshold_dbm,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.proximity.poll_interval_secs)
    }
}

/// JSON-backed settings store. Unreadable or missing files fall back to
/// defaults; updates persist before returning.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<PipelineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            PipelineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> PipelineSettings {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, settings: PipelineSettings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            *guard = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: PipelineSettings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &PipelineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.settings();
        assert_eq!(settings.connection.target, -1);
        assert_eq!(settings.aggregation.heart_rate_window, 10);
        assert_eq!(settings.aggregation.weak_signal_threshold_dbm, -90);
        assert_eq!(settings.proximity.poll_interval_secs, 5);
    }

    #[test]
    fn update_persists_and_reload_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.settings();
        settings.connection.target = 42;
        settings.proximity.wearable_address = Some("aa:bb:cc:dd:ee:ff".into());
        store.update(settings).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.settings().connection.target, 42);
        reopened.reload().unwrap();
        assert_eq!(
            reopened.settings().proximity.wearable_address.as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn partial_settings_files_use_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"connection":{"target":7}}"#).unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.settings();
        assert_eq!(settings.connection.target, 7);
        assert_eq!(settings.connection.max_attempts, 3);
        assert_eq!(settings.aggregation.signal_window, 5);
    }
}
