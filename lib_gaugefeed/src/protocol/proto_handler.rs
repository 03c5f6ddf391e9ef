//! # Gauge Feed Protobuf Envelope
//!
//! Rust representation of the envelope every frame travels in. Each binary
//! WebSocket message carries exactly one [`Envelope`]; its `kind` tag decides
//! which of the remaining fields are meaningful. Gauge payloads themselves are
//! left as opaque bytes.

use prost::Message;

/// Frame tag carried in [`Envelope::kind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FrameKind {
    /// Unset or unknown tag.
    Unknown = 0,
    /// Client handshake.
    Connect = 1,
    /// Server handshake acknowledgement.
    Connected = 2,
    /// Client is going away.
    Disconnect = 3,
    /// Client publishes to a destination.
    Send = 4,
    /// Client opens a subscription.
    Subscribe = 5,
    /// Client closes a subscription.
    Unsubscribe = 6,
    /// Client changes the update rate of a subscription.
    Throttle = 7,
    /// Keep-alive probe, either direction.
    Heartbeat = 8,
    /// One payload for one subscription.
    SingleMessage = 9,
    /// Several payloads, possibly for several subscriptions.
    BatchMessages = 10,
    /// Acknowledgement of a receipt id.
    Receipt = 11,
    /// The server rejected one subscription.
    SubscriptionError = 12,
    /// Connection-level server failure.
    ServerError = 13,
}

/// The single message type exchanged on the socket.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// Frame tag, maps to [`FrameKind`].
    #[prost(enumeration = "FrameKind", tag = "1")]
    pub kind: i32,

    /// Wire subscription id (Subscribe, Unsubscribe, Throttle, SingleMessage, SubscriptionError).
    #[prost(uint64, tag = "2")]
    pub subscription_id: u64,

    /// Receipt id, zero when no acknowledgement is requested.
    #[prost(uint64, tag = "3")]
    pub receipt_id: u64,

    /// Canonical destination path (Subscribe, Send).
    #[prost(string, tag = "4")]
    pub destination: String,

    /// Minimum milliseconds between updates (Subscribe, Throttle).
    #[prost(uint32, tag = "5")]
    pub throttle_rate: u32,

    /// Handshake login.
    #[prost(string, tag = "6")]
    pub login: String,

    /// Handshake passcode.
    #[prost(string, tag = "7")]
    pub passcode: String,

    /// Virtual host requested in the handshake.
    #[prost(string, tag = "8")]
    pub host: String,

    /// Human readable text (errors) or the session id (Connected).
    #[prost(string, tag = "9")]
    pub message: String,

    /// Opaque payload bytes (SingleMessage, Send).
    #[prost(bytes = "bytes", tag = "10")]
    pub payload: bytes::Bytes,

    /// Batched payloads (BatchMessages).
    #[prost(message, repeated, tag = "11")]
    pub batch: Vec<BatchEntry>,
}

/// One element of a BatchMessages frame.
#[derive(Clone, PartialEq, Message)]
pub struct BatchEntry {
    #[prost(uint64, tag = "1")]
    pub subscription_id: u64,

    #[prost(bytes = "bytes", tag = "2")]
    pub payload: bytes::Bytes,
}
