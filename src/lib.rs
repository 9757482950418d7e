//! A buffered, topic-filtered mailbox for MQTT-style pub/sub clients.
//!
//! Messages delivered by a transport callback are buffered in arrival order
//! in a [`Mailbox`]. Application threads consume them with blocking,
//! timeout-bounded calls filtered by hierarchical topic patterns, which
//! suits batch and script-style programs better than per-message callbacks.

pub mod error;
pub mod logging;
pub mod mailbox;
pub mod message;
pub mod session;
pub mod topic;

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

pub use error::{Error, Result};
pub use mailbox::{Interrupt, Interruptible, Link, Mailbox, Timeout};
pub use message::{ArrivedMessage, Payload, QoS};
pub use session::{DeliverySink, Session, SessionRegistry, Transport};
pub use topic::{matches, validate, Topic, TopicFilter, MAX_TOPIC_LENGTH};

/// Configuration for creating a new session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Label used in log output
    pub name: String,
    /// QoS used by `publish` and `subscribe` when none is given
    pub default_qos: QoS,
    /// Empty the mailbox when the session disconnects
    pub clear_on_disconnect: bool,
    /// Filters subscribed right after connecting
    pub subscribe_on_connect: Vec<TopicFilter>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "mqbox".to_string(),
            default_qos: QoS::AtMostOnce,
            clear_on_disconnect: true,
            subscribe_on_connect: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("Session name cannot be empty".into()));
        }
        Ok(())
    }
}

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the string representation of the client ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Statistics about a mailbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    /// Number of currently buffered messages
    pub buffered: usize,
    /// Total number of messages accepted by `enqueue`
    pub enqueued: u64,
    /// Total number of messages handed out by pop/drain
    pub consumed: u64,
    /// Total number of messages removed by retain/clear
    pub evicted: u64,
    /// Total number of messages discarded because the link was down
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config = SessionConfig::from_json_str(r#"{"name": "sensor-reader"}"#).unwrap();
        assert_eq!(config.name, "sensor-reader");
        assert!(config.clear_on_disconnect);
        assert_eq!(config.default_qos, QoS::AtMostOnce);
    }

    #[test]
    fn test_config_revalidates_filters() {
        let config = SessionConfig::from_json_str(
            r#"{"default_qos": 1, "subscribe_on_connect": ["x/+", "y/#"]}"#,
        )
        .unwrap();
        assert_eq!(config.default_qos, QoS::AtLeastOnce);
        assert_eq!(config.subscribe_on_connect.len(), 2);

        assert!(matches!(
            SessionConfig::from_json_str(r#"{"subscribe_on_connect": ["x+"]}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"default_qos": 3}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_config_rejects_blank_name() {
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"name": "  "}"#),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"name": "from-file", "clear_on_disconnect": false}"#).unwrap();

        let config = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.name, "from-file");
        assert!(!config.clear_on_disconnect);

        assert!(matches!(
            SessionConfig::from_json_file(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }
}
