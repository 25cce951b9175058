use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration of one ingestion process. Every field has a default, so a
/// settings file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Must match the id the firmware publishes under.
    pub device_id: String,
    pub topic_prefix: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub keep_alive_secs: u64,
    /// Random `airlog-<uuid>` when unset.
    pub client_id: Option<String>,
    pub reconnect_delay_ms: u64,
    /// Consecutive connection failures tolerated before giving up; unlimited when unset.
    pub max_reconnect_attempts: Option<u32>,
    pub db_path: PathBuf,
    pub location: String,
    pub notes: String,
    pub busy_timeout_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            device_id: "mkr-kitchen-01".into(),
            topic_prefix: "devices".into(),
            broker_host: "test.mosquitto.org".into(),
            broker_port: 1883,
            keep_alive_secs: 60,
            client_id: None,
            reconnect_delay_ms: 1_000,
            max_reconnect_attempts: None,
            db_path: PathBuf::from("project.db"),
            location: "kitchen".into(),
            notes: "init".into(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl IngestSettings {
    /// Reads settings from `path`, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("airlog-{}", uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        let settings = IngestSettings::load(None).unwrap();
        assert_eq!(settings, IngestSettings::default());
        assert_eq!(settings.broker_port, 1883);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airlog.json");
        fs::write(&path, r#"{"device_id": "bench-02", "broker_port": 8883}"#).unwrap();

        let settings = IngestSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.device_id, "bench-02");
        assert_eq!(settings.broker_port, 8883);
        assert_eq!(settings.location, "kitchen");
    }

    #[test]
    fn unreadable_or_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IngestSettings::load(Some(&dir.path().join("absent.json"))).is_err());

        let path = dir.path().join("bad.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(IngestSettings::load(Some(&path)).is_err());
    }

    #[test]
    fn generated_client_ids_are_unique() {
        let settings = IngestSettings::default();
        assert_ne!(settings.client_id(), settings.client_id());
        assert!(settings.client_id().starts_with("airlog-"));
    }
}
