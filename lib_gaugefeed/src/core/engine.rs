//! # Connection Engine
//!
//! The single worker behind a [`GaugeClient`](super::client::GaugeClient).
//! Public calls, transport events and timer ticks all arrive as [`Action`]s on
//! one unbounded queue and run here one at a time, so the subscription map,
//! the receipt map and the counters are never shared.
//!
//! ## States
//!
//! `Disconnected → Connecting → Connected → Disconnecting → Disconnected`
//!
//! - **Connecting**: the transport is opening or the handshake is in flight.
//!   A kill deadline bounds how long this may last.
//! - **Connected**: the server acknowledged the handshake. Every registered
//!   subscription has been resent with a fresh wire id.
//! - **Disconnecting**: only observable while an explicit disconnect runs.
//!
//! ## Close path
//!
//! Every close invalidates the pending receipts. After an explicit
//! disconnect, or when reconnect is disabled, subscriptions are completed and
//! dropped. Otherwise they are kept and a retry is scheduled after
//! `base_interval × min(attempt, max_attempts)`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::id_generator::IdGenerator;
use super::receipts::ReceiptCorrelator;
use super::registry::{FrameSink, HandleId, RegistryContext, SubscribeOptions, SubscriptionRegistry};
use super::updates::{CompletionReason, SubscriptionSink};
use crate::auth::Credential;
use crate::configs::ClientConfig;
use crate::error::{GaugeFeedError, Result};
use crate::protocol::{Destination, Frame, FrameCodec};
use crate::transport::{Transport, TransportEvent, TransportSink};

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Client-wide notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake acknowledged.
    Connected,
    /// The connection went down.
    Disconnected { reason: String },
    /// A retry has been scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// A connection-level failure was reported.
    Error(String),
}

/// Snapshot answered through the action queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Incremented on every transport open and close.
    pub session: u64,
    /// Current reconnect attempt, zero when connected.
    pub attempt: u32,
    pub subscriptions: usize,
    pub pending_receipts: usize,
    /// Time since the last inbound message while a socket is up.
    pub last_inbound_age: Option<Duration>,
    /// Time until the scheduled reconnect, if any.
    pub retry_in: Option<Duration>,
    pub login: Option<String>,
}

/// One unit of serialized work.
#[derive(Debug)]
pub(crate) enum Action {
    Connect(Credential),
    Disconnect,
    Shutdown(Option<oneshot::Sender<()>>),
    Subscribe {
        handle: HandleId,
        destination: Destination,
        options: SubscribeOptions,
        sink: SubscriptionSink,
    },
    Unsubscribe(HandleId),
    Throttle {
        handle: HandleId,
        rate_ms: u32,
    },
    Send {
        destination: String,
        payload: Bytes,
    },
    Transport {
        session: u64,
        event: TransportEvent,
    },
    Tick,
    Status(oneshot::Sender<ConnectionStatus>),
}

struct Outbound<'a> {
    transport: &'a mut dyn Transport,
    codec: &'a dyn FrameCodec,
    ready: bool,
}

impl FrameSink for Outbound<'_> {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.transport.send(self.codec.encode(&frame))
    }
}

pub(crate) struct Engine {
    config: ClientConfig,
    url: Url,
    transport: Box<dyn Transport>,
    codec: Arc<dyn FrameCodec>,
    actions: mpsc::WeakUnboundedSender<Action>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,

    ids: IdGenerator,
    receipts: ReceiptCorrelator,
    registry: SubscriptionRegistry,

    state: ConnectionState,
    session: u64,
    credential: Option<Credential>,
    disconnecting: bool,
    attempt: u32,
    retry_at: Option<Instant>,
    kill_at: Option<Instant>,
    last_inbound: Instant,
    last_probe: Option<Instant>,
    shutdown_ack: Option<oneshot::Sender<()>>,
}

impl Engine {
    pub(crate) fn new(
        config: ClientConfig,
        url: Url,
        transport: Box<dyn Transport>,
        codec: Arc<dyn FrameCodec>,
        actions: mpsc::WeakUnboundedSender<Action>,
        state_tx: watch::Sender<ConnectionState>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            config,
            url,
            transport,
            codec,
            actions,
            state_tx,
            events,
            ids: IdGenerator::new(),
            receipts: ReceiptCorrelator::new(),
            registry: SubscriptionRegistry::new(),
            state: ConnectionState::Disconnected,
            session: 0,
            credential: None,
            disconnecting: false,
            attempt: 0,
            retry_at: None,
            kill_at: None,
            last_inbound: Instant::now(),
            last_probe: None,
            shutdown_ack: None,
        }
    }

    /// Processes actions until shutdown or until every sender is gone.
    pub(crate) async fn run(mut self, mut actions: mpsc::UnboundedReceiver<Action>) {
        info!(url = %self.url, "Connection engine started");

        while let Some(action) = actions.recv().await {
            if !self.handle(action) {
                break;
            }
        }

        self.close_explicitly("client shut down");
        actions.close();
        while let Ok(action) = actions.try_recv() {
            match action {
                Action::Subscribe { sink, .. } => sink.complete(CompletionReason::Disconnected),
                Action::Shutdown(Some(done)) => {
                    let _ = done.send(());
                }
                _ => {}
            }
        }

        info!("Connection engine stopped");
        if let Some(done) = self.shutdown_ack.take() {
            let _ = done.send(());
        }
    }

    fn handle(&mut self, action: Action) -> bool {
        match action {
            Action::Connect(credential) => self.connect(credential),
            Action::Disconnect => self.close_explicitly("client disconnect"),
            Action::Shutdown(done) => {
                self.shutdown_ack = done;
                return false;
            }
            Action::Subscribe {
                handle,
                destination,
                options,
                sink,
            } => self.with_registry(|registry, ctx| registry.register(handle, destination, options, sink, ctx)),
            Action::Unsubscribe(handle) => {
                self.with_registry(|registry, ctx| registry.unsubscribe(handle, ctx));
            }
            Action::Throttle { handle, rate_ms } => {
                self.with_registry(|registry, ctx| registry.throttle(handle, rate_ms, ctx));
            }
            Action::Send { destination, payload } => self.publish(destination, payload),
            Action::Transport { session, event } => self.on_transport(session, event),
            Action::Tick => self.on_tick(),
            Action::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
        true
    }

    fn with_registry<R>(&mut self, f: impl FnOnce(&mut SubscriptionRegistry, &mut RegistryContext<'_>) -> R) -> R {
        let mut out = Outbound {
            transport: self.transport.as_mut(),
            codec: self.codec.as_ref(),
            ready: self.state == ConnectionState::Connected,
        };
        let mut ctx = RegistryContext {
            ids: &self.ids,
            receipts: &mut self.receipts,
            out: &mut out,
        };
        f(&mut self.registry, &mut ctx)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = self.codec.encode(frame);
        self.transport.send(bytes)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, session = self.session, "State change");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected && !self.disconnecting
    }

    fn connect(&mut self, credential: Credential) {
        self.credential = Some(credential);
        self.disconnecting = false;

        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = %self.state, "Connect ignored, credential updated");
            }
            _ => {
                self.attempt = 0;
                self.retry_at = None;
                self.open_transport();
            }
        }
    }

    fn open_transport(&mut self) {
        self.session += 1;
        let session = self.session;
        let now = Instant::now();
        self.last_inbound = now;
        self.last_probe = None;
        self.kill_at = Some(now + self.config.connect_timeout());
        self.set_state(ConnectionState::Connecting);

        info!(session, url = %self.url, attempt = self.attempt, "Connecting");
        let sink = TransportSink::new(session, self.actions.clone());
        if let Err(e) = self.transport.open(&self.url, sink) {
            warn!(session, "Transport open failed: {}", e);
            self.emit(ClientEvent::Error(e.to_string()));
            self.on_closed(&e.to_string());
        }
    }

    fn close_explicitly(&mut self, reason: &str) {
        self.disconnecting = true;
        self.retry_at = None;

        if self.state == ConnectionState::Connected {
            if let Err(e) = self.send_frame(&Frame::Disconnect) {
                debug!("Disconnect frame not sent: {}", e);
            }
        }
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnecting);
        }
        self.on_closed(reason);
    }

    /// Runs after every transport close, whoever initiated it.
    fn on_closed(&mut self, reason: &str) {
        let was = self.state;
        self.transport.close();
        self.session += 1;
        self.kill_at = None;
        self.last_probe = None;
        self.set_state(ConnectionState::Disconnected);

        let invalidated = self.receipts.invalidate_all();
        let give_up = self.disconnecting || !self.config.reconnect.enabled || self.credential.is_none();

        if give_up {
            let completed = self.registry.clear(CompletionReason::Disconnected);
            self.retry_at = None;
            self.attempt = 0;
            info!(reason, invalidated, completed, "Disconnected");
            if was != ConnectionState::Disconnected {
                self.emit(ClientEvent::Disconnected {
                    reason: reason.to_string(),
                });
            }
        } else {
            let policy = self.config.reconnect;
            self.attempt = self.attempt.saturating_add(1).min(policy.max_attempts);
            let delay = policy.delay(self.attempt);
            self.retry_at = Some(Instant::now() + delay);
            info!(
                reason,
                invalidated,
                kept = self.registry.len(),
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                "Connection lost, reconnect scheduled"
            );
            if was != ConnectionState::Disconnected {
                self.emit(ClientEvent::Disconnected {
                    reason: reason.to_string(),
                });
            }
            self.emit(ClientEvent::Reconnecting {
                attempt: self.attempt,
                delay,
            });
        }
    }

    fn on_transport(&mut self, session: u64, event: TransportEvent) {
        if session != self.session {
            trace!(session, current = self.session, ?event, "Stale transport event");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(bytes) => {
                self.last_inbound = Instant::now();
                match self.codec.decode(&bytes) {
                    Ok(frame) => self.on_frame(frame),
                    Err(e) => warn!(session, len = bytes.len(), "Dropping malformed frame: {}", e),
                }
            }
            TransportEvent::Closed { reason } => {
                info!(session, %reason, "Transport closed");
                self.on_closed(&reason);
            }
            TransportEvent::Failed { error } => {
                warn!(session, %error, "Transport failed");
                self.emit(ClientEvent::Error(error.clone()));
                self.on_closed(&error);
            }
        }
    }

    fn on_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "Transport opened outside of a connect attempt");
            return;
        }
        let Some(credential) = self.credential.as_ref() else {
            self.on_closed("no credential for handshake");
            return;
        };

        let frame = Frame::Connect {
            login: credential.login().to_string(),
            passcode: credential.passcode().to_string(),
            host: self.config.host.clone(),
        };
        debug!(session = self.session, login = credential.login(), "Sending handshake");
        if let Err(e) = self.send_frame(&frame) {
            warn!(session = self.session, "Handshake not sent: {}", e);
            self.on_closed(&e.to_string());
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Connected { session } => self.on_connected(&session),
            Frame::SingleMessage {
                subscription_id,
                payload,
            } => {
                let live = self.is_live();
                self.registry.dispatch(subscription_id, payload, live);
            }
            Frame::BatchMessages { messages } => {
                let live = self.is_live();
                for (subscription_id, payload) in messages {
                    self.registry.dispatch(subscription_id, payload, live);
                }
            }
            Frame::Receipt { receipt_id } => {
                let live = self.is_live();
                self.receipts.deliver(receipt_id, live);
            }
            Frame::SubscriptionError {
                subscription_id,
                message,
            } => {
                self.registry.dispatch_error(subscription_id, message);
            }
            Frame::ServerError { message } => {
                error!(session = self.session, %message, "Server error");
                self.emit(ClientEvent::Error(message.clone()));
                self.on_closed(&format!("server error: {}", message));
            }
            Frame::Heartbeat => trace!(session = self.session, "Heartbeat"),
            Frame::Disconnect => self.on_closed("server requested disconnect"),
            other => warn!(kind = ?other.kind(), "Unexpected client frame from server"),
        }
    }

    fn on_connected(&mut self, label: &str) {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "Unexpected handshake acknowledgement");
            return;
        }

        self.set_state(ConnectionState::Connected);
        self.kill_at = None;
        self.retry_at = None;
        self.attempt = 0;

        if self.registry.is_empty() && self.receipts.is_empty() {
            self.ids.reset();
        }
        let resubscribed = self.with_registry(|registry, ctx| registry.resubscribe_all(ctx));

        info!(session = self.session, label, resubscribed, "Connected");
        self.emit(ClientEvent::Connected);
    }

    fn on_tick(&mut self) {
        if let Err(e) = self.housekeeping(Instant::now()) {
            error!(session = self.session, "Housekeeping failed: {}", e);
            self.emit(ClientEvent::Error(e.to_string()));
            self.on_closed(&e.to_string());
        }
    }

    fn housekeeping(&mut self, now: Instant) -> Result<()> {
        match self.state {
            ConnectionState::Connecting => {
                if self.kill_at.is_some_and(|at| now >= at) {
                    warn!(session = self.session, "Connect attempt exceeded its deadline");
                    self.on_closed("connect attempt timed out");
                }
            }
            ConnectionState::Connected => {
                let silent = now.saturating_duration_since(self.last_inbound);
                if silent > self.config.max_wait() {
                    warn!(session = self.session, silent_ms = silent.as_millis() as u64, "Inbound silence, forcing reconnect");
                    self.on_closed(&format!("no inbound message for {} ms", silent.as_millis()));
                } else if silent > self.config.heartbeat_check_interval() {
                    let reference = self.last_probe.map_or(self.last_inbound, |probe| probe.max(self.last_inbound));
                    if now.saturating_duration_since(reference) > self.config.heartbeat_check_interval() {
                        self.send_frame(&Frame::Heartbeat)
                            .map_err(|e| GaugeFeedError::Transport(format!("heartbeat probe failed: {}", e)))?;
                        self.last_probe = Some(now);
                        trace!(session = self.session, "Heartbeat probe sent");
                    }
                }
            }
            ConnectionState::Disconnected => {
                if !self.disconnecting && self.retry_at.is_some_and(|at| now >= at) {
                    self.retry_at = None;
                    info!(attempt = self.attempt, "Reconnecting");
                    self.open_transport();
                }
            }
            ConnectionState::Disconnecting => {}
        }
        Ok(())
    }

    fn publish(&mut self, destination: String, payload: Bytes) {
        if self.state != ConnectionState::Connected {
            warn!(%destination, "Send dropped, not connected");
            return;
        }
        let frame = Frame::Send { destination, payload };
        if let Err(e) = self.send_frame(&frame) {
            warn!("Send failed: {}", e);
        }
    }

    fn status(&self) -> ConnectionStatus {
        let now = Instant::now();
        let socket_up = matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected);
        ConnectionStatus {
            state: self.state,
            session: self.session,
            attempt: self.attempt,
            subscriptions: self.registry.len(),
            pending_receipts: self.receipts.len(),
            last_inbound_age: socket_up.then(|| now.saturating_duration_since(self.last_inbound)),
            retry_in: self.retry_at.map(|at| at.saturating_duration_since(now)),
            login: self.credential.as_ref().map(|c| c.login().to_string()),
        }
    }
}
