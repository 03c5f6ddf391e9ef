//! # Gauge Client
//!
//! Public face of the connection engine. Every method is a non-blocking
//! enqueue onto the engine's action queue, except [`GaugeClient::status`] and
//! [`GaugeClient::shutdown`] which wait for the worker's answer.
//!
//! ```no_run
//! use lib_gaugefeed::{ClientConfig, Credential, GaugeClient, SubscribeOptions};
//!
//! # async fn demo(token: String) -> lib_gaugefeed::Result<()> {
//! let client = GaugeClient::new(ClientConfig::for_host("feed.example.com"))?;
//! client.connect(Credential::new(token)?)?;
//!
//! let mut eq = client.subscribe_path("/gauge/eq/realtime/AAPL", SubscribeOptions::default())?;
//! while let Some(event) = eq.next().await {
//!     println!("{:?}", event);
//! }
//! client.shutdown().await
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use super::engine::{Action, ClientEvent, ConnectionState, ConnectionStatus, Engine};
use super::registry::{HandleId, SubscribeOptions};
use super::updates::{SubscriptionEvent, SubscriptionSink};
use crate::auth::Credential;
use crate::configs::ClientConfig;
use crate::error::{GaugeFeedError, Result};
use crate::protocol::{Destination, FrameCodec, ProtoFrameCodec, StreamId, SubscriptionPath};
use crate::transport::Transport;

const EVENT_CAPACITY: usize = 64;

/// Handle to one running connection engine.
///
/// Dropping the client shuts the engine down: subscriptions complete with
/// [`CompletionReason::Disconnected`](super::updates::CompletionReason::Disconnected).
pub struct GaugeClient {
    actions: mpsc::UnboundedSender<Action>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    next_handle: AtomicU64,
    stream: StreamId,
}

impl GaugeClient {
    /// Client over the WebSocket transport.
    #[cfg(feature = "websocket")]
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, crate::transport::WsTransport::new())
    }

    /// Client over any transport, using the protobuf frame codec.
    pub fn with_transport(config: ClientConfig, transport: impl Transport) -> Result<Self> {
        Self::with_parts(config, Box::new(transport), Arc::new(ProtoFrameCodec))
    }

    /// Client over any transport and codec. Must be called inside a tokio runtime.
    pub fn with_parts(config: ClientConfig, transport: Box<dyn Transport>, codec: Arc<dyn FrameCodec>) -> Result<Self> {
        config.validate()?;
        let url = config.url()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| GaugeFeedError::Config("GaugeClient must be created inside a tokio runtime".into()))?;

        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let tick = config.tick_interval();
        let stream = config.stream;

        let engine = Engine::new(
            config,
            url,
            transport,
            codec,
            actions_tx.downgrade(),
            state_tx,
            events_tx.clone(),
        );
        runtime.spawn(engine.run(actions_rx));
        runtime.spawn(run_ticker(actions_tx.downgrade(), tick));

        Ok(Self {
            actions: actions_tx,
            state: state_rx,
            events: events_tx,
            next_handle: AtomicU64::new(0),
            stream,
        })
    }

    fn enqueue(&self, action: Action) -> Result<()> {
        self.actions.send(action).map_err(|_| GaugeFeedError::EngineStopped)
    }

    /// Starts connecting with `credential`. Progress is reported through [`GaugeClient::events`].
    pub fn connect(&self, credential: Credential) -> Result<()> {
        self.enqueue(Action::Connect(credential))
    }

    /// Closes the connection and completes every subscription. The client stays usable.
    pub fn disconnect(&self) -> Result<()> {
        self.enqueue(Action::Disconnect)
    }

    /// Registers a subscription. It is sent now if connected, otherwise after the next handshake.
    pub fn subscribe(&self, destination: Destination, options: SubscribeOptions) -> Result<SubscriptionHandle> {
        if !destination.is_valid() {
            return Err(GaugeFeedError::DestinationParse(destination.encode().to_string()));
        }

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let (sink, events) = SubscriptionSink::channel();
        self.enqueue(Action::Subscribe {
            handle: id,
            destination: destination.clone(),
            options,
            sink,
        })?;
        debug!(handle = id, %destination, "Subscription requested");

        Ok(SubscriptionHandle {
            id,
            destination,
            events,
            finished: false,
        })
    }

    /// Parses `path` and subscribes to it.
    pub fn subscribe_path(&self, path: &str, options: SubscribeOptions) -> Result<SubscriptionHandle> {
        self.subscribe(path.parse()?, options)
    }

    /// Subscribes to the `path` gauge of `symbol` on the configured stream.
    ///
    /// Cross and crypto symbols are served realtime even when the configured
    /// stream is delayed.
    pub fn subscribe_gauge(
        &self,
        path: SubscriptionPath,
        symbol: &str,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(Destination::gauge(path, self.stream, symbol), options)
    }

    /// Stream used by [`GaugeClient::subscribe_gauge`].
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Stops updates for `handle` immediately. Completion follows on the handle.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.enqueue(Action::Unsubscribe(handle.id))
    }

    /// Asks the server to send updates for `handle` at most every `rate_ms`.
    pub fn set_throttle(&self, handle: &SubscriptionHandle, rate_ms: u32) -> Result<()> {
        self.enqueue(Action::Throttle {
            handle: handle.id,
            rate_ms,
        })
    }

    /// Publishes `payload` to `destination`. Dropped when not connected.
    pub fn send(&self, destination: &Destination, payload: Bytes) -> Result<()> {
        if !destination.is_valid() {
            return Err(GaugeFeedError::DestinationParse(destination.encode().to_string()));
        }
        self.enqueue(Action::Send {
            destination: destination.encode().to_string(),
            payload,
        })
    }

    /// Client-wide notifications from now on.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Last state published by the worker.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel following every state change.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Consistent snapshot taken by the worker after every earlier call was processed.
    pub async fn status(&self) -> Result<ConnectionStatus> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Action::Status(tx))?;
        rx.await.map_err(|_| GaugeFeedError::EngineStopped)
    }

    /// Disconnects, completes every subscription and waits for the worker to stop.
    pub async fn shutdown(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Action::Shutdown(Some(tx)))?;
        rx.await.map_err(|_| GaugeFeedError::EngineStopped)
    }
}

impl Drop for GaugeClient {
    fn drop(&mut self) {
        let _ = self.actions.send(Action::Shutdown(None));
    }
}

async fn run_ticker(actions: mpsc::WeakUnboundedSender<Action>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(actions) = actions.upgrade() else {
            break;
        };
        if actions.send(Action::Tick).is_err() {
            break;
        }
    }
}

/// Caller side of one subscription.
///
/// The id stays the same across reconnects. After
/// [`SubscriptionEvent::Completed`] the handle yields nothing more.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: HandleId,
    destination: Destination,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    finished: bool,
}

impl SubscriptionHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// True once the completion event has been read.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next event, `None` after completion.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        if self.finished {
            return None;
        }
        match self.events.recv().await {
            Some(event) => Some(self.observe(event)),
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_next(&mut self) -> Option<SubscriptionEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.try_recv().ok()?;
        Some(self.observe(event))
    }

    fn observe(&mut self, event: SubscriptionEvent) -> SubscriptionEvent {
        if matches!(event, SubscriptionEvent::Completed(_)) {
            self.finished = true;
        }
        event
    }
}
