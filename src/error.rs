//! Error types for steward operations.

use thiserror::Error;

/// Main error type for steward operations
#[derive(Error, Debug)]
pub enum StewardError {
    /// Writing the gateway config document failed
    #[error("failed to write config document '{0}': {1}")]
    ConfigWrite(String, String),

    /// A config document or store file could not be parsed
    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    /// A definition is unresolvable or contradictory
    #[error("invalid definition '{0}': {1}")]
    Validation(String, String),

    /// The gateway process could not be launched
    #[error("failed to launch gateway: {0}")]
    ProcessLaunch(String),

    /// The gateway process survived forced termination
    #[error("failed to terminate process {0}: {1}")]
    ProcessTermination(u32, String),

    /// Network, timeout or malformed-response failure talking to the gateway
    #[error("probe failed: {0}")]
    Probe(String),

    /// The config document does not exist on disk yet
    #[error("gateway config document not found at '{0}'")]
    NotConfigured(String),

    /// The gateway is already running
    #[error("gateway already running with PID {0}")]
    AlreadyRunning(u32),

    /// The gateway is not running
    #[error("gateway is not running")]
    NotRunning,

    /// The definition/settings store failed
    #[error("store error: {0}")]
    Store(String),
}

/// Result type alias for steward operations
pub type Result<T> = std::result::Result<T, StewardError>;
