//! # Error Types
//!
//! A single error enum shared by every module of the crate. Connection-level
//! faults (`Transport`) send the engine through its close/reconnect path,
//! `ProtocolParse` only ever costs one dropped frame, and `DestinationParse`
//! is returned synchronously from `GaugeClient::subscribe_path`.

use thiserror::Error;

/// Errors produced by the gauge feed client.
#[derive(Debug, Error)]
pub enum GaugeFeedError {
    /// The socket failed to open, send or stay up.
    #[error("Transport error: {0}")]
    Transport(String),

    /// One inbound frame could not be decoded.
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    /// The server rejected a single subscription.
    #[error("Subscription {subscription_id} rejected by server: {message}")]
    Subscription {
        /// Wire id of the rejected subscription.
        subscription_id: u64,
        /// Server supplied reason.
        message: String,
    },

    /// A destination string or record is not a valid subscription target.
    #[error("Invalid destination '{0}'")]
    DestinationParse(String),

    /// The bearer token could not be interpreted.
    #[error("Invalid credential: {0}")]
    Credential(String),

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A receipt id was tracked twice.
    #[error("Receipt id {0} is already pending")]
    DuplicateReceipt(u64),

    /// The connection engine worker has stopped; no further calls are accepted.
    #[error("Connection engine is not running")]
    EngineStopped,

    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error occurred: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GaugeFeedError>;
