//! # Transport Module
//!
//! The engine talks to the network through the [`Transport`] trait: a
//! full-duplex binary message socket that is opened, written to and closed
//! from the engine's worker, and that reports what happens to it through a
//! [`TransportSink`].
//!
//! Every `open` gets a sink stamped with a fresh session number. Events from
//! an older session are discarded by the engine, so a transport never has to
//! worry about late callbacks after it was closed.
//!
//! - **`ws`**: tokio-tungstenite client (feature `websocket`).
//! - **`memory`**: in-process loopback with a scriptable server side.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use tokio::sync::mpsc::WeakUnboundedSender;
use url::Url;

use crate::core::engine::Action;
use crate::error::Result;

/// In-process loopback transport.
pub mod memory;
/// WebSocket transport.
#[cfg(feature = "websocket")]
pub mod ws;

pub use memory::{MemoryServer, MemoryTransport};
#[cfg(feature = "websocket")]
pub use ws::WsTransport;

/// Something that happened to an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket is ready for writing.
    Opened,
    /// One inbound binary message.
    Message(Vec<u8>),
    /// The peer or the network closed the socket.
    Closed { reason: String },
    /// The socket failed; treated as a close.
    Failed { error: String },
}

/// Delivers transport events into the engine's action queue.
#[derive(Debug, Clone)]
pub struct TransportSink {
    session: u64,
    tx: WeakUnboundedSender<Action>,
}

impl TransportSink {
    pub(crate) fn new(session: u64, tx: WeakUnboundedSender<Action>) -> Self {
        Self { session, tx }
    }

    /// Session this sink belongs to.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Pushes an event. Returns false once the engine is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx
                .send(Action::Transport {
                    session: self.session,
                    event,
                })
                .is_ok(),
            None => false,
        }
    }

    pub fn opened(&self) -> bool {
        self.emit(TransportEvent::Opened)
    }

    pub fn message(&self, bytes: Vec<u8>) -> bool {
        self.emit(TransportEvent::Message(bytes))
    }

    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed { reason: reason.into() })
    }

    pub fn failed(&self, error: impl Into<String>) -> bool {
        self.emit(TransportEvent::Failed { error: error.into() })
    }
}

/// Binary message socket driven by the connection engine.
///
/// All methods are called from the engine worker and must not block.
pub trait Transport: Send + 'static {
    /// Starts opening a socket to `url`. Completion is reported through `sink`.
    fn open(&mut self, url: &Url, sink: TransportSink) -> Result<()>;

    /// Queues one binary message on the open socket.
    fn send(&mut self, bytes: Vec<u8>) -> Result<()>;

    /// Closes the current socket, if any. Must be idempotent.
    fn close(&mut self);
}
