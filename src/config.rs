//! Container configuration.
//!
//! Settings come from code, JSON, or environment variables layered on top.
//! Durations accept humantime text (`"30s"`, `"5m"`) or integer milliseconds.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DiError, DiResult};

/// Settings of one container.
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::ContainerConfig;
/// use std::time::Duration;
///
/// let config = ContainerConfig::from_json(r#"{"name": "orders", "timeout": "30s"}"#).unwrap();
/// assert_eq!(config.name, "orders");
/// assert_eq!(config.timeout, Duration::from_secs(30));
/// assert!(config.grace_period);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Name used in events, logs and the container's own publication
    pub name: String,
    pub version: String,
    /// Startup timeout while waiting for mandatory dependencies
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Wait for mandatory dependencies before activating
    pub grace_period: bool,
    /// Publish the container into the provider registry once active
    pub publish_container: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            name: "blueprint".to_string(),
            version: "0.0.0".to_string(),
            timeout: Duration::from_secs(300),
            grace_period: true,
            publish_container: true,
        }
    }
}

impl ContainerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        ContainerConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_json(text: &str) -> DiResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| DiError::definition(format!("invalid container configuration: {e}")))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: bool) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_publish_container(mut self, publish: bool) -> Self {
        self.publish_container = publish;
        self
    }

    /// Overrides settings from `{PREFIX}_NAME`, `{PREFIX}_TIMEOUT` and
    /// `{PREFIX}_GRACE_PERIOD`.
    pub fn apply_env(mut self, prefix: &str) -> DiResult<Self> {
        if let Ok(name) = env::var(format!("{prefix}_NAME")) {
            self.name = name;
        }
        if let Ok(timeout) = env::var(format!("{prefix}_TIMEOUT")) {
            self.timeout = parse_duration(&timeout)?;
        }
        if let Ok(grace) = env::var(format!("{prefix}_GRACE_PERIOD")) {
            self.grace_period = crate::convert::parse_bool(&grace)?;
        }
        Ok(self)
    }
}

/// Parses humantime text or integer milliseconds.
pub fn parse_duration(text: &str) -> DiResult<Duration> {
    let text = text.trim();
    if let Ok(millis) = text.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(text)
        .map_err(|e| DiError::conversion(text, "duration", Some(e.to_string())))
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Millis(millis) => Ok(Duration::from_millis(millis)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
