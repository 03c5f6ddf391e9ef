//! # Core Engine Module
//!
//! The connection and subscription machinery:
//!
//! - **`id_generator`**: wrapping, never-zero correlation ids.
//! - **`receipts`**: pending acknowledgements, each consumed exactly once.
//! - **`registry`**: active subscriptions, dispatch and the
//!   (un)subscribe/throttle lifecycle.
//! - **`updates`**: what subscribers receive.
//! - **`engine`**: the serialized worker that owns all of the above plus the
//!   transport, the state machine, reconnect backoff and the heartbeat watchdog.
//! - **`client`**: the public handle that feeds the worker's queue.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Public client handle and subscription handles.
pub mod client;
/// The serialized connection worker.
pub mod engine;
/// Correlation id source.
pub mod id_generator;
/// Receipt tracking.
pub mod receipts;
/// Subscription bookkeeping and dispatch.
pub mod registry;
/// Update and completion types delivered to subscribers.
pub mod updates;

pub use client::{GaugeClient, SubscriptionHandle};
pub use engine::{ClientEvent, ConnectionState, ConnectionStatus};
pub use id_generator::IdGenerator;
pub use receipts::{ReceiptCorrelator, ReceiptFn, ReceiptOutcome, Receiptable};
pub use registry::{FrameSink, HandleId, RegistryContext, SubscribeOptions, SubscriptionRegistry};
pub use updates::{CompletionReason, GaugeUpdate, SubscriptionEvent, SubscriptionSink, UpdateHeader};
