//! # lib_gaugefeed
//!
//! Client engine for a STOMP-style publish/subscribe protocol carried over
//! WebSocket, with protobuf envelopes and many concurrent gauge subscriptions
//! multiplexed on one reconnecting connection.

// Declare the modules to re-export
pub mod auth;
pub mod configs;
pub mod core;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod protocol;
pub mod transport;

// Re-export the everyday surface
pub use auth::{Credential, CredentialProvider, EnvCredentials, StaticCredentials};
pub use configs::{load_config, ClientConfig, ConfigOverrides, ReconnectPolicy};
pub use self::core::{
    ClientEvent, CompletionReason, ConnectionState, ConnectionStatus, GaugeClient, GaugeUpdate, SubscribeOptions,
    SubscriptionEvent, SubscriptionHandle, UpdateHeader,
};
pub use error::{GaugeFeedError, Result};
pub use protocol::{Destination, StreamId, SubscriptionPath, SubscriptionType};
