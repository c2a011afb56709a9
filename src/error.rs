use thiserror::Error;

use crate::alarm::AlarmStatus;

/// Error type shared by the codec, the alarm store and the arbitration engine.
///
/// None of these are fatal: the engine logs each one at the boundary of the
/// event that caused it and carries on with the next event.
#[derive(Error, Debug)]
pub enum AdamError {
    /// Inbound payload is not a message of the expected kind
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A supplied alarm id collides with an alarm that is still open
    #[error("Duplicate alarm id: {0}")]
    DuplicateId(String),

    /// Operator traffic from a display target that is not configured
    #[error("Unknown annunciator: {0}")]
    UnknownAnnunciator(String),

    /// Identifier hint matches more than one alarm
    #[error("Ambiguous alarm id '{hint}' matches {candidates:?}")]
    AmbiguousId {
        hint: String,
        candidates: Vec<String>,
    },

    /// No alarm matches the identifier (or hint)
    #[error("Alarm not found: {0}")]
    NotFound(String),

    /// Operator action is not allowed from the alarm's current status
    #[error("Invalid transition for alarm {id}: cannot {action} while {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: AlarmStatus,
    },

    /// Outbound publish to an annunciator failed
    #[error("Publish to {annunciator} failed: {reason}")]
    PublishFailure { annunciator: String, reason: String },

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenient alias over [`Result`] using [`AdamError`]
pub type Result<T> = std::result::Result<T, AdamError>;
