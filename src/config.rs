// src/config.rs - Engine and transport configuration loaded from YAML

use crate::codec::DEFAULT_MAX_LEN;
use crate::error::{AdamError, Result};
use crate::policy::{Policy, PolicyKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main ADAM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Arbitration engine configuration
    pub engine: EngineConfig,

    /// MQTT transport configuration
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate YAML configuration text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.mqtt.validate()
    }
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Arbitration engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display targets; each id is also the topic its alarms are published to
    pub annunciators: Vec<String>,

    /// Selection policy
    #[serde(default)]
    pub policy: PolicyKind,

    /// Minimum dwell time for the severity_pause policy, in seconds
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,

    /// How long a shelved alarm stays out of the open set, in seconds
    #[serde(default = "default_shelve_secs")]
    pub shelve_secs: u64,

    /// Periodic tick interval in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Maximum encoded alarm length in bytes
    #[serde(default = "default_wire_max_len")]
    pub wire_max_len: usize,

    /// Evict completed/dismissed alarms this long after their last activity
    #[serde(default)]
    pub retention_secs: Option<u64>,

    /// Bound on the engine's display event log
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            annunciators: Vec::new(),
            policy: PolicyKind::default(),
            pause_secs: default_pause_secs(),
            shelve_secs: default_shelve_secs(),
            tick_ms: default_tick_ms(),
            wire_max_len: default_wire_max_len(),
            retention_secs: None,
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    pub fn policy(&self) -> Policy {
        Policy::new(self.policy, self.pause())
    }

    pub fn pause(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pause_secs as i64)
    }

    pub fn shelve_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.shelve_secs as i64)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms)
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_secs
            .map(|secs| chrono::Duration::seconds(secs as i64))
    }

    pub fn validate(&self) -> Result<()> {
        if self.annunciators.is_empty() {
            return Err(AdamError::Config("engine.annunciators must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for id in &self.annunciators {
            if id.trim().is_empty() {
                return Err(AdamError::Config("engine.annunciators contains an empty id".into()));
            }
            if id.contains(['+', '#']) {
                return Err(AdamError::Config(format!(
                    "annunciator '{}' contains a topic wildcard",
                    id
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(AdamError::Config(format!("duplicate annunciator '{}'", id)));
            }
        }

        if self.tick_ms == 0 {
            return Err(AdamError::Config("engine.tick_ms must be greater than 0".into()));
        }
        if self.wire_max_len < 3 {
            return Err(AdamError::Config(format!(
                "engine.wire_max_len must be at least 3, got {}",
                self.wire_max_len
            )));
        }
        if self.history_limit == 0 {
            return Err(AdamError::Config("engine.history_limit must be greater than 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// MQTT CONFIGURATION
// ============================================================================

/// MQTT broker and topic layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub broker_host: String,

    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,

    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Topic alarm sources publish to
    #[serde(default = "default_alarm_topic")]
    pub alarm_topic: String,

    /// Base topic for operator responses; annunciator `X` answers on
    /// `<ack_topic>/X`
    #[serde(default = "default_ack_topic")]
    pub ack_topic: String,

    #[serde(default = "default_mqtt_keepalive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: default_mqtt_host(),
            broker_port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            username: None,
            password: None,
            alarm_topic: default_alarm_topic(),
            ack_topic: default_ack_topic(),
            keep_alive_secs: default_mqtt_keepalive(),
        }
    }
}

impl MqttConfig {
    /// Topic on which `annunciator` sends operator responses
    pub fn response_topic(&self, annunciator: &str) -> String {
        format!("{}/{}", self.ack_topic, annunciator)
    }

    /// Subscription filter covering every annunciator's response topic
    pub fn response_filter(&self) -> String {
        format!("{}/+", self.ack_topic)
    }

    /// Annunciator id encoded in a response topic, if it is one
    pub fn annunciator_from_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.ack_topic.as_str())?
            .strip_prefix('/')
            .filter(|rest| !rest.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_host.is_empty() {
            return Err(AdamError::Config("mqtt.broker_host must not be empty".into()));
        }
        if self.alarm_topic.is_empty() || self.ack_topic.is_empty() {
            return Err(AdamError::Config("mqtt topics must not be empty".into()));
        }
        if self.alarm_topic == self.ack_topic {
            return Err(AdamError::Config(
                "mqtt.alarm_topic and mqtt.ack_topic must differ".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_pause_secs() -> u64 { 20 }
fn default_shelve_secs() -> u64 { 300 }
fn default_tick_ms() -> u64 { 500 }
fn default_wire_max_len() -> usize { DEFAULT_MAX_LEN }
fn default_history_limit() -> usize { 10_000 }
fn default_mqtt_host() -> String { "localhost".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_mqtt_client_id() -> String { "adam-server".to_string() }
fn default_alarm_topic() -> String { "adam/in/alarms".to_string() }
fn default_ack_topic() -> String { "adam/acks".to_string() }
fn default_mqtt_keepalive() -> u64 { 30 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
engine:
  annunciators: [KRAKE_LB0001, KRAKE_LB0002]
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.engine.policy, PolicyKind::Arrival);
        assert_eq!(config.engine.pause_secs, 20);
        assert_eq!(config.engine.tick_interval(), std::time::Duration::from_millis(500));
        assert_eq!(config.engine.wire_max_len, 80);
        assert_eq!(config.engine.retention(), None);
        assert_eq!(config.mqtt.alarm_topic, "adam/in/alarms");
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
engine:
  annunciators: [A1]
  policy: SEVERITY_PAUSE
  pause_secs: 5
  shelve_secs: 60
  tick_ms: 250
  retention_secs: 3600
mqtt:
  broker_host: broker.example
  ack_topic: site/acks
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.engine.policy(),
            Policy::SeverityPause { pause: chrono::Duration::seconds(5) }
        );
        assert_eq!(config.engine.shelve_duration(), chrono::Duration::seconds(60));
        assert_eq!(config.engine.retention(), Some(chrono::Duration::seconds(3600)));
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.mqtt.response_topic("A1"), "site/acks/A1");
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "engine:\n  annunciators: []\n",
            "engine:\n  annunciators: [A1, A1]\n",
            "engine:\n  annunciators: ['site/#']\n",
            "engine:\n  annunciators: [A1]\n  tick_ms: 0\n",
            "engine:\n  annunciators: [A1]\n  wire_max_len: 2\n",
            "engine:\n  annunciators: [A1]\nmqtt:\n  alarm_topic: t\n  ack_topic: t\n",
        ];
        for yaml in cases {
            assert!(
                matches!(Config::from_yaml(yaml), Err(AdamError::Config(_))),
                "expected config error for {:?}",
                yaml
            );
        }
        assert!(matches!(
            Config::from_yaml("engine:\n  annunciators: [A1]\n  policy: random\n"),
            Err(AdamError::Yaml(_))
        ));
    }

    #[test]
    fn test_annunciator_from_topic() {
        let mqtt = MqttConfig::default();
        assert_eq!(mqtt.annunciator_from_topic("adam/acks/KRAKE_1"), Some("KRAKE_1"));
        assert_eq!(mqtt.annunciator_from_topic("adam/acks/"), None);
        assert_eq!(mqtt.annunciator_from_topic("adam/acksX/K"), None);
        assert_eq!(mqtt.annunciator_from_topic("adam/in/alarms"), None);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.engine.annunciators.len(), 2);

        assert!(matches!(
            Config::from_file("/nonexistent/adam.yaml"),
            Err(AdamError::Io(_))
        ));
    }
}
