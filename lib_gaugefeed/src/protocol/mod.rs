//! # Protocol Module
//!
//! Everything that describes what goes over the wire, independent of how the
//! socket is driven:
//!
//! - **`codes`**: immutable lookup tables for subscription types, paths and
//!   stream ids, including the type bitmask each path is restricted to.
//! - **`destination`**: the canonical `/type/path/...` addressing scheme and
//!   its round-trip parser.
//! - **`proto_handler`**: the prost envelope every frame is carried in.
//! - **`frames`**: the typed [`Frame`] enum and the [`FrameCodec`] seam.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Code tables for destination segments.
pub mod codes;
/// Destination records and their canonical strings.
pub mod destination;
/// Typed frames and the codec trait.
pub mod frames;
/// Prost message definitions for the envelope.
pub mod proto_handler;

pub use codes::{StreamId, SubscriptionPath, SubscriptionType};
pub use destination::{effective_stream, Destination};
pub use frames::{Frame, FrameCodec, ProtoFrameCodec};
pub use proto_handler::{BatchEntry, Envelope, FrameKind};
