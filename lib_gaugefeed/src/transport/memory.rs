//! # In-Memory Transport
//!
//! A loopback [`Transport`] whose far end is a [`MemoryServer`] handle. Tests
//! and demos use the server handle to accept connections, push frames to the
//! client, inspect what the client sent and drop the connection at will.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use url::Url;

use super::{Transport, TransportSink};
use crate::error::{GaugeFeedError, Result};
use crate::protocol::{Frame, FrameCodec, ProtoFrameCodec};

#[derive(Debug, Default)]
struct Shared {
    sink: Option<TransportSink>,
    open: bool,
    auto_accept: bool,
    refuse_opens: bool,
    open_count: usize,
    last_url: Option<Url>,
    sent: Vec<Vec<u8>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Client half handed to the engine.
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Server half kept by the test.
#[derive(Debug, Clone)]
pub struct MemoryServer {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// Creates a connected pair.
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            MemoryTransport {
                shared: Arc::clone(&shared),
            },
            MemoryServer { shared },
        )
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, url: &Url, sink: TransportSink) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.open_count += 1;
        shared.last_url = Some(url.clone());

        if shared.refuse_opens {
            shared.sink = None;
            shared.open = false;
            return Err(GaugeFeedError::Transport(format!("connection to {} refused", url)));
        }

        debug!(session = sink.session(), %url, "Memory transport opening");
        if shared.auto_accept {
            shared.open = true;
            sink.opened();
        }
        shared.sink = Some(sink);
        Ok(())
    }

    fn send(&mut self, bytes: Vec<u8>) -> Result<()> {
        let mut shared = lock(&self.shared);
        if !shared.open {
            return Err(GaugeFeedError::Transport("memory socket is not open".into()));
        }
        shared.sent.push(bytes);
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = lock(&self.shared);
        shared.open = false;
        shared.sink = None;
    }
}

impl MemoryServer {
    /// Completes every future `open` immediately.
    pub fn set_auto_accept(&self, enabled: bool) {
        lock(&self.shared).auto_accept = enabled;
    }

    /// Makes every future `open` fail synchronously.
    pub fn set_refuse_opens(&self, refuse: bool) {
        lock(&self.shared).refuse_opens = refuse;
    }

    /// Completes the pending `open`. Returns false when nothing is pending.
    pub fn accept(&self) -> bool {
        let mut shared = lock(&self.shared);
        match shared.sink.clone() {
            Some(sink) if !shared.open => {
                shared.open = true;
                sink.opened()
            }
            _ => false,
        }
    }

    /// Pushes raw bytes to the client.
    pub fn inject(&self, bytes: Vec<u8>) -> bool {
        let shared = lock(&self.shared);
        match (&shared.sink, shared.open) {
            (Some(sink), true) => sink.message(bytes),
            _ => false,
        }
    }

    /// Encodes `frame` with the protobuf codec and pushes it.
    pub fn inject_frame(&self, frame: &Frame) -> bool {
        self.inject(ProtoFrameCodec.encode(frame))
    }

    /// Closes the socket from the server side.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let mut shared = lock(&self.shared);
        shared.open = false;
        match shared.sink.take() {
            Some(sink) => sink.closed(reason),
            None => false,
        }
    }

    /// Reports a socket failure.
    pub fn fail(&self, error: &str) -> bool {
        let mut shared = lock(&self.shared);
        shared.open = false;
        match shared.sink.take() {
            Some(sink) => sink.failed(error),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared).open
    }

    /// Number of `open` calls so far, refused ones included.
    pub fn open_count(&self) -> usize {
        lock(&self.shared).open_count
    }

    pub fn last_url(&self) -> Option<Url> {
        lock(&self.shared).last_url.clone()
    }

    /// Everything the client sent, decoded. Undecodable messages are skipped.
    pub fn sent_frames(&self) -> Vec<Frame> {
        lock(&self.shared)
            .sent
            .iter()
            .filter_map(|bytes| ProtoFrameCodec.decode(bytes).ok())
            .collect()
    }

    /// Like [`MemoryServer::sent_frames`] but also forgets them.
    pub fn take_sent_frames(&self) -> Vec<Frame> {
        let sent = std::mem::take(&mut lock(&self.shared).sent);
        sent.iter().filter_map(|bytes| ProtoFrameCodec.decode(bytes).ok()).collect()
    }
}
