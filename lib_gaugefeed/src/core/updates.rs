//! # Subscription Updates
//!
//! What a subscriber sees. Payload bytes stay opaque; the update only adds
//! the addressing context the payload arrived under.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::GaugeFeedError;
use crate::protocol::{Destination, StreamId, SubscriptionPath, SubscriptionType};

/// Fields shared by every update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateHeader {
    /// Symbol, search term or broker, whichever the destination is keyed by.
    pub symbol: String,
    pub stream: Option<StreamId>,
    pub received_at: DateTime<Utc>,
    /// First update after a (re)subscribe. Consumers holding derived state
    /// should rebuild it from this update.
    pub dirty: bool,
}

/// One inbound payload, tagged by destination type.
#[derive(Debug, Clone, PartialEq)]
pub enum GaugeUpdate {
    Gauge {
        header: UpdateHeader,
        path: SubscriptionPath,
        compression: Option<String>,
        payload: Bytes,
    },
    Definition {
        header: UpdateHeader,
        path: SubscriptionPath,
        payload: Bytes,
    },
    Strategy {
        header: UpdateHeader,
        strategy_id: String,
        payload: Bytes,
    },
}

impl GaugeUpdate {
    /// Wraps `payload` for `destination`. `None` for an invalid destination.
    pub fn new(destination: &Destination, payload: Bytes, dirty: bool) -> Option<Self> {
        let header = UpdateHeader {
            symbol: destination
                .symbol()
                .or(destination.term())
                .or(destination.broker())
                .unwrap_or_default()
                .to_string(),
            stream: destination.stream(),
            received_at: Utc::now(),
            dirty,
        };

        match destination.subscription_type() {
            SubscriptionType::Gauge => Some(GaugeUpdate::Gauge {
                header,
                path: destination.path(),
                compression: destination.compression().map(str::to_string),
                payload,
            }),
            SubscriptionType::Definition => Some(GaugeUpdate::Definition {
                header,
                path: destination.path(),
                payload,
            }),
            SubscriptionType::Strategy => Some(GaugeUpdate::Strategy {
                header,
                strategy_id: destination.strategy_id().unwrap_or_default().to_string(),
                payload,
            }),
            SubscriptionType::None => None,
        }
    }

    pub fn header(&self) -> &UpdateHeader {
        match self {
            GaugeUpdate::Gauge { header, .. }
            | GaugeUpdate::Definition { header, .. }
            | GaugeUpdate::Strategy { header, .. } => header,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            GaugeUpdate::Gauge { payload, .. }
            | GaugeUpdate::Definition { payload, .. }
            | GaugeUpdate::Strategy { payload, .. } => payload,
        }
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The server acknowledged the unsubscribe, or no connection was up.
    Unsubscribed,
    /// The unsubscribe was sent but the connection dropped before its receipt.
    ReceiptInvalidated,
    /// The client disconnected, shut down, or gave up reconnecting.
    Disconnected,
}

/// Per-subscription notification.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// The server acknowledged the subscribe receipt.
    Confirmed,
    Update(GaugeUpdate),
    Error(GaugeFeedError),
    /// Always the last event.
    Completed(CompletionReason),
}

/// Worker-side end of a subscription's event channel.
#[derive(Debug)]
pub struct SubscriptionSink {
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl SubscriptionSink {
    /// Creates a sink and the receiver the caller reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn update(&self, update: GaugeUpdate) {
        let _ = self.tx.send(SubscriptionEvent::Update(update));
    }

    pub fn error(&self, error: GaugeFeedError) {
        let _ = self.tx.send(SubscriptionEvent::Error(error));
    }

    /// Handle that can only report confirmation.
    pub fn confirmer(&self) -> Confirmer {
        Confirmer { tx: self.tx.clone() }
    }

    /// Sends the final event. Consuming `self` makes a second completion impossible.
    pub fn complete(self, reason: CompletionReason) {
        let _ = self.tx.send(SubscriptionEvent::Completed(reason));
    }
}

/// Reports [`SubscriptionEvent::Confirmed`] for one subscribe receipt.
#[derive(Debug)]
pub struct Confirmer {
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl Confirmer {
    pub fn confirm(self) {
        let _ = self.tx.send(SubscriptionEvent::Confirmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_symbol_follows_destination_kind() {
        let gauge = Destination::gauge(SubscriptionPath::Momentum, StreamId::Demo, "ES").with_compression("5m");
        match GaugeUpdate::new(&gauge, Bytes::from_static(b"x"), true).unwrap() {
            GaugeUpdate::Gauge { header, compression, .. } => {
                assert_eq!(header.symbol, "ES");
                assert!(header.dirty);
                assert_eq!(compression.as_deref(), Some("5m"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let top = Destination::top_symbols("ib", None);
        let update = GaugeUpdate::new(&top, Bytes::new(), false).unwrap();
        assert_eq!(update.header().symbol, "ib");
        assert_eq!(update.header().stream, None);

        let strategy = Destination::strategy("s9", StreamId::Realtime, "NQ");
        assert!(matches!(
            GaugeUpdate::new(&strategy, Bytes::new(), false),
            Some(GaugeUpdate::Strategy { ref strategy_id, .. }) if strategy_id == "s9"
        ));

        assert!(GaugeUpdate::new(&Destination::parse("/bogus"), Bytes::new(), false).is_none());
    }

    #[test]
    fn completion_is_the_last_event() {
        let (sink, mut rx) = SubscriptionSink::channel();
        sink.confirmer().confirm();
        sink.complete(CompletionReason::Unsubscribed);

        assert!(matches!(rx.try_recv(), Ok(SubscriptionEvent::Confirmed)));
        assert!(matches!(
            rx.try_recv(),
            Ok(SubscriptionEvent::Completed(CompletionReason::Unsubscribed))
        ));
        assert!(rx.try_recv().is_err());
    }
}
