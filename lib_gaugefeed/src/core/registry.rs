//! # Subscription Registry
//!
//! Active subscriptions, owned by the engine worker. Every subscription has
//! two ids:
//!
//! - a **handle id** given to the caller, which never changes;
//! - a **wire id** used in frames, which is replaced every time the
//!   subscription is (re)sent after a handshake.
//!
//! Subscriptions registered while the connection is down are kept in
//! registration order and sent after the next handshake.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::id_generator::IdGenerator;
use super::receipts::{ReceiptCorrelator, ReceiptFn, Receiptable};
use super::updates::{CompletionReason, Confirmer, GaugeUpdate, SubscriptionSink};
use crate::error::{GaugeFeedError, Result};
use crate::protocol::{Destination, Frame};

/// Caller-visible subscription id.
pub type HandleId = u64;

/// Outbound side of the connection as seen by the registry.
pub trait FrameSink {
    /// True once the handshake completed.
    fn is_ready(&self) -> bool;

    fn send_frame(&mut self, frame: Frame) -> Result<()>;
}

/// Per-subscription request options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeOptions {
    /// Ask the server to acknowledge every Subscribe frame sent for this subscription.
    pub with_receipt: bool,
    /// Minimum milliseconds between updates, zero for unthrottled.
    pub throttle_rate_ms: u32,
}

/// Everything a registry operation needs besides the registry itself.
pub struct RegistryContext<'a> {
    pub ids: &'a IdGenerator,
    pub receipts: &'a mut ReceiptCorrelator,
    pub out: &'a mut dyn FrameSink,
}

#[derive(Debug)]
struct Subscription {
    order: u64,
    wire_id: u64,
    destination: Destination,
    with_receipt: bool,
    receipt_id: Option<u64>,
    throttle_rate_ms: u32,
    dirty: bool,
    sink: SubscriptionSink,
}

struct SubscribeAck {
    handle: HandleId,
    confirmer: Confirmer,
}

impl Receiptable for SubscribeAck {
    fn on_receipt(self: Box<Self>) {
        debug!(handle = self.handle, "Subscribe confirmed");
        self.confirmer.confirm();
    }

    fn on_invalidate(self: Box<Self>) {
        debug!(handle = self.handle, "Subscribe receipt invalidated");
    }
}

struct UnsubscribeAck {
    handle: HandleId,
    sink: SubscriptionSink,
}

impl Receiptable for UnsubscribeAck {
    fn on_receipt(self: Box<Self>) {
        debug!(handle = self.handle, "Unsubscribe confirmed");
        self.sink.complete(CompletionReason::Unsubscribed);
    }

    fn on_invalidate(self: Box<Self>) {
        debug!(handle = self.handle, "Unsubscribe receipt invalidated");
        self.sink.complete(CompletionReason::ReceiptInvalidated);
    }
}

/// Active subscriptions keyed by handle id.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<HandleId, Subscription>,
    by_wire: HashMap<u64, HandleId>,
    next_order: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription and sends it right away when the connection is ready.
    pub fn register(
        &mut self,
        handle: HandleId,
        destination: Destination,
        options: SubscribeOptions,
        sink: SubscriptionSink,
        ctx: &mut RegistryContext<'_>,
    ) {
        if self.subscriptions.contains_key(&handle) {
            warn!(handle, "Handle already registered");
            sink.error(GaugeFeedError::Subscription {
                subscription_id: 0,
                message: format!("handle {} is already registered", handle),
            });
            sink.complete(CompletionReason::Disconnected);
            return;
        }

        self.next_order += 1;
        let mut subscription = Subscription {
            order: self.next_order,
            wire_id: ctx.ids.next_id(),
            destination,
            with_receipt: options.with_receipt,
            receipt_id: None,
            throttle_rate_ms: options.throttle_rate_ms,
            dirty: true,
            sink,
        };

        if ctx.out.is_ready() {
            send_subscribe(handle, &mut subscription, ctx);
        } else {
            debug!(handle, destination = %subscription.destination, "Queued until connected");
        }

        self.by_wire.insert(subscription.wire_id, handle);
        self.subscriptions.insert(handle, subscription);
    }

    /// Routes one payload. Returns false when no subscription has `wire_id`.
    pub fn dispatch(&mut self, wire_id: u64, payload: Bytes, live: bool) -> bool {
        let Some(subscription) = self
            .by_wire
            .get(&wire_id)
            .and_then(|handle| self.subscriptions.get_mut(handle))
        else {
            if live {
                warn!(subscription_id = wire_id, "Message for unknown subscription");
            }
            return false;
        };

        match GaugeUpdate::new(&subscription.destination, payload, subscription.dirty) {
            Some(update) => {
                subscription.dirty = false;
                subscription.sink.update(update);
            }
            None => warn!(subscription_id = wire_id, "Dropping payload for invalid destination"),
        }
        true
    }

    /// Delivers a server rejection to the targeted subscription only.
    pub fn dispatch_error(&mut self, wire_id: u64, message: String) -> bool {
        match self.by_wire.get(&wire_id).and_then(|handle| self.subscriptions.get(handle)) {
            Some(subscription) => {
                warn!(subscription_id = wire_id, %message, "Subscription rejected");
                subscription.sink.error(GaugeFeedError::Subscription {
                    subscription_id: wire_id,
                    message,
                });
                true
            }
            None => {
                warn!(subscription_id = wire_id, %message, "Error for unknown subscription");
                false
            }
        }
    }

    /// Stops dispatch for `handle` at once.
    ///
    /// When connected the subscription completes on the unsubscribe receipt
    /// (or its invalidation); otherwise it completes immediately.
    pub fn unsubscribe(&mut self, handle: HandleId, ctx: &mut RegistryContext<'_>) -> bool {
        let Some(subscription) = self.subscriptions.remove(&handle) else {
            debug!(handle, "Unsubscribe for unknown handle");
            return false;
        };
        self.by_wire.remove(&subscription.wire_id);

        if !ctx.out.is_ready() {
            subscription.sink.complete(CompletionReason::Unsubscribed);
            return true;
        }

        let receipt_id = ctx.ids.next_id();
        let ack = Box::new(UnsubscribeAck {
            handle,
            sink: subscription.sink,
        });
        if ctx.receipts.track(receipt_id, ack).is_err() {
            return true;
        }

        let frame = Frame::Unsubscribe {
            subscription_id: subscription.wire_id,
            receipt_id: Some(receipt_id),
        };
        if let Err(e) = ctx.out.send_frame(frame) {
            warn!(handle, receipt_id, "Unsubscribe not sent: {}", e);
        }
        true
    }

    /// Changes the update rate of `handle`. Local dispatch is unaffected.
    pub fn throttle(&mut self, handle: HandleId, rate_ms: u32, ctx: &mut RegistryContext<'_>) -> bool {
        let Some(subscription) = self.subscriptions.get_mut(&handle) else {
            debug!(handle, "Throttle for unknown handle");
            return false;
        };
        subscription.throttle_rate_ms = rate_ms;

        if !ctx.out.is_ready() {
            return true;
        }

        let receipt_id = ctx.ids.next_id();
        let ack = ReceiptFn::new(move |outcome| debug!(handle, rate_ms, ?outcome, "Throttle receipt"));
        if ctx.receipts.track(receipt_id, ack).is_err() {
            return true;
        }
        let frame = Frame::Throttle {
            subscription_id: subscription.wire_id,
            throttle_rate_ms: rate_ms,
            receipt_id: Some(receipt_id),
        };
        if let Err(e) = ctx.out.send_frame(frame) {
            warn!(handle, receipt_id, "Throttle not sent: {}", e);
        }
        true
    }

    /// Re-sends every subscription with a fresh wire id, in registration order.
    pub fn resubscribe_all(&mut self, ctx: &mut RegistryContext<'_>) -> usize {
        let mut handles: Vec<(u64, HandleId)> = self.subscriptions.iter().map(|(h, s)| (s.order, *h)).collect();
        handles.sort_unstable();

        self.by_wire.clear();
        for (_, handle) in &handles {
            if let Some(subscription) = self.subscriptions.get_mut(handle) {
                subscription.wire_id = ctx.ids.next_id();
                subscription.receipt_id = None;
                subscription.dirty = true;
                send_subscribe(*handle, subscription, ctx);
                self.by_wire.insert(subscription.wire_id, *handle);
            }
        }

        if !handles.is_empty() {
            info!(count = handles.len(), "Resubscribed");
        }
        handles.len()
    }

    /// Completes every subscription with `reason` and forgets them.
    pub fn clear(&mut self, reason: CompletionReason) -> usize {
        let mut drained: Vec<Subscription> = self.subscriptions.drain().map(|(_, s)| s).collect();
        drained.sort_unstable_by_key(|s| s.order);
        self.by_wire.clear();

        let count = drained.len();
        for subscription in drained {
            subscription.sink.complete(reason);
        }
        count
    }

    pub fn contains(&self, handle: HandleId) -> bool {
        self.subscriptions.contains_key(&handle)
    }

    /// Current wire id of `handle`.
    pub fn wire_id(&self, handle: HandleId) -> Option<u64> {
        self.subscriptions.get(&handle).map(|s| s.wire_id)
    }

    /// Pending subscribe receipt of `handle`, if one was requested and sent.
    pub fn receipt_id(&self, handle: HandleId) -> Option<u64> {
        self.subscriptions.get(&handle).and_then(|s| s.receipt_id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

fn send_subscribe(handle: HandleId, subscription: &mut Subscription, ctx: &mut RegistryContext<'_>) {
    if subscription.with_receipt {
        let receipt_id = ctx.ids.next_id();
        let ack = Box::new(SubscribeAck {
            handle,
            confirmer: subscription.sink.confirmer(),
        });
        if ctx.receipts.track(receipt_id, ack).is_ok() {
            subscription.receipt_id = Some(receipt_id);
        }
    }

    let frame = Frame::Subscribe {
        subscription_id: subscription.wire_id,
        destination: subscription.destination.encode().to_string(),
        receipt_id: subscription.receipt_id,
        throttle_rate_ms: subscription.throttle_rate_ms,
    };
    match ctx.out.send_frame(frame) {
        Ok(()) => debug!(
            handle,
            subscription_id = subscription.wire_id,
            destination = %subscription.destination,
            "Subscribe sent"
        ),
        Err(e) => warn!(handle, subscription_id = subscription.wire_id, "Subscribe not sent: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::updates::SubscriptionEvent;
    use crate::protocol::{StreamId, SubscriptionPath};
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Default)]
    struct Recorder {
        ready: bool,
        frames: Vec<Frame>,
    }

    impl FrameSink for Recorder {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn send_frame(&mut self, frame: Frame) -> Result<()> {
            self.frames.push(frame);
            Ok(())
        }
    }

    struct Harness {
        ids: IdGenerator,
        receipts: ReceiptCorrelator,
        out: Recorder,
        registry: SubscriptionRegistry,
    }

    impl Harness {
        fn new(ready: bool) -> Self {
            Self {
                ids: IdGenerator::new(),
                receipts: ReceiptCorrelator::new(),
                out: Recorder {
                    ready,
                    frames: Vec::new(),
                },
                registry: SubscriptionRegistry::new(),
            }
        }

        fn subscribe(&mut self, handle: HandleId, symbol: &str, options: SubscribeOptions) -> UnboundedReceiver<SubscriptionEvent> {
            let (sink, rx) = SubscriptionSink::channel();
            let destination = Destination::gauge(SubscriptionPath::Equilibrium, StreamId::Realtime, symbol);
            let mut ctx = RegistryContext {
                ids: &self.ids,
                receipts: &mut self.receipts,
                out: &mut self.out,
            };
            self.registry.register(handle, destination, options, sink, &mut ctx);
            rx
        }

        fn unsubscribe(&mut self, handle: HandleId) -> bool {
            let mut ctx = RegistryContext {
                ids: &self.ids,
                receipts: &mut self.receipts,
                out: &mut self.out,
            };
            self.registry.unsubscribe(handle, &mut ctx)
        }

        fn throttle(&mut self, handle: HandleId, rate_ms: u32) -> bool {
            let mut ctx = RegistryContext {
                ids: &self.ids,
                receipts: &mut self.receipts,
                out: &mut self.out,
            };
            self.registry.throttle(handle, rate_ms, &mut ctx)
        }

        fn resubscribe(&mut self) -> usize {
            let mut ctx = RegistryContext {
                ids: &self.ids,
                receipts: &mut self.receipts,
                out: &mut self.out,
            };
            self.registry.resubscribe_all(&mut ctx)
        }
    }

    fn subscribe_ids(frames: &[Frame]) -> Vec<u64> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Subscribe { subscription_id, .. } => Some(*subscription_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn queued_while_down_then_flushed_in_order() {
        let mut h = Harness::new(false);
        let _a = h.subscribe(10, "AAPL", SubscribeOptions::default());
        let _b = h.subscribe(3, "MSFT", SubscribeOptions::default());
        assert!(h.out.frames.is_empty());

        h.out.ready = true;
        assert_eq!(h.resubscribe(), 2);
        let symbols: Vec<String> = h
            .out
            .frames
            .iter()
            .filter_map(|f| match f {
                Frame::Subscribe { destination, .. } => Some(destination.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(symbols, vec!["/gauge/eq/realtime/AAPL", "/gauge/eq/realtime/MSFT"]);
    }

    #[test]
    fn resubscribe_issues_fresh_ids_and_receipts() {
        let mut h = Harness::new(true);
        let _a = h.subscribe(1, "AAPL", SubscribeOptions { with_receipt: true, throttle_rate_ms: 0 });
        let _b = h.subscribe(2, "MSFT", SubscribeOptions::default());
        let before = subscribe_ids(&h.out.frames);
        let old_receipt = h.registry.receipt_id(1).unwrap();

        h.receipts.invalidate_all();
        h.out.frames.clear();
        assert_eq!(h.resubscribe(), 2);

        let after = subscribe_ids(&h.out.frames);
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|id| !before.contains(id)));
        let new_receipt = h.registry.receipt_id(1).unwrap();
        assert_ne!(new_receipt, old_receipt);
        assert!(h.receipts.contains(new_receipt));
        assert_eq!(h.registry.receipt_id(2), None);
    }

    #[test]
    fn unsubscribe_halts_dispatch_and_completes_on_receipt() {
        let mut h = Harness::new(true);
        let mut rx = h.subscribe(1, "AAPL", SubscribeOptions::default());
        let wire = h.registry.wire_id(1).unwrap();

        assert!(h.registry.dispatch(wire, Bytes::from_static(b"1"), true));
        assert!(h.unsubscribe(1));
        assert!(!h.registry.dispatch(wire, Bytes::from_static(b"2"), true));

        let receipt_id = match h.out.frames.last() {
            Some(Frame::Unsubscribe { receipt_id: Some(r), .. }) => *r,
            other => panic!("expected unsubscribe, got {:?}", other),
        };
        assert!(matches!(rx.try_recv(), Ok(SubscriptionEvent::Update(u)) if u.header().dirty));
        assert!(rx.try_recv().is_err());

        h.receipts.deliver(receipt_id, true);
        assert!(matches!(
            rx.try_recv(),
            Ok(SubscriptionEvent::Completed(CompletionReason::Unsubscribed))
        ));
    }

    #[test]
    fn unsubscribe_completes_exactly_once_when_receipt_is_lost() {
        let mut h = Harness::new(true);
        let mut rx = h.subscribe(1, "AAPL", SubscribeOptions::default());
        h.unsubscribe(1);

        h.receipts.invalidate_all();
        h.registry.clear(CompletionReason::Disconnected);

        let mut completions = 0;
        while let Ok(event) = rx.try_recv() {
            if let SubscriptionEvent::Completed(reason) = event {
                assert_eq!(reason, CompletionReason::ReceiptInvalidated);
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[test]
    fn unsubscribe_while_down_completes_immediately() {
        let mut h = Harness::new(false);
        let mut rx = h.subscribe(1, "AAPL", SubscribeOptions::default());
        assert!(h.unsubscribe(1));
        assert!(h.out.frames.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Ok(SubscriptionEvent::Completed(CompletionReason::Unsubscribed))
        ));
        assert!(!h.unsubscribe(1));
    }

    #[test]
    fn only_the_first_update_after_subscribe_is_dirty() {
        let mut h = Harness::new(true);
        let mut rx = h.subscribe(1, "AAPL", SubscribeOptions::default());
        let wire = h.registry.wire_id(1).unwrap();
        h.registry.dispatch(wire, Bytes::from_static(b"a"), true);
        h.registry.dispatch(wire, Bytes::from_static(b"b"), true);

        let dirty: Vec<bool> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                SubscriptionEvent::Update(u) => Some(u.header().dirty),
                _ => None,
            })
            .collect();
        assert_eq!(dirty, vec![true, false]);
    }

    #[test]
    fn server_errors_reach_only_their_subscription() {
        let mut h = Harness::new(true);
        let mut a = h.subscribe(1, "AAPL", SubscribeOptions::default());
        let mut b = h.subscribe(2, "MSFT", SubscribeOptions::default());
        let wire_b = h.registry.wire_id(2).unwrap();

        assert!(h.registry.dispatch_error(wire_b, "no entitlement".into()));
        assert!(a.try_recv().is_err());
        assert!(matches!(
            b.try_recv(),
            Ok(SubscriptionEvent::Error(GaugeFeedError::Subscription { subscription_id, .. })) if subscription_id == wire_b
        ));
    }

    #[test]
    fn throttle_is_remembered_for_later_subscribes() {
        let mut h = Harness::new(true);
        let _rx = h.subscribe(1, "AAPL", SubscribeOptions::default());
        assert!(h.throttle(1, 500));
        assert!(matches!(
            h.out.frames.last(),
            Some(Frame::Throttle { throttle_rate_ms: 500, receipt_id: Some(_), .. })
        ));

        h.out.frames.clear();
        h.resubscribe();
        assert!(matches!(
            h.out.frames.first(),
            Some(Frame::Subscribe { throttle_rate_ms: 500, .. })
        ));
    }

    #[test]
    fn clear_completes_everything_once() {
        let mut h = Harness::new(true);
        let mut a = h.subscribe(1, "AAPL", SubscribeOptions::default());
        let mut b = h.subscribe(2, "MSFT", SubscribeOptions::default());

        assert_eq!(h.registry.clear(CompletionReason::Disconnected), 2);
        assert!(h.registry.is_empty());
        for rx in [&mut a, &mut b] {
            assert!(matches!(
                rx.try_recv(),
                Ok(SubscriptionEvent::Completed(CompletionReason::Disconnected))
            ));
        }
        assert_eq!(h.registry.clear(CompletionReason::Disconnected), 0);
    }

    #[test]
    fn throttle_receipt_is_pending_until_acknowledged() {
        let mut h = Harness::new(true);
        let mut rx = h.subscribe(1, "AAPL", SubscribeOptions::default());
        assert!(h.throttle(1, 250));
        let receipt_id = match h.out.frames.last() {
            Some(Frame::Throttle { receipt_id: Some(r), .. }) => *r,
            other => panic!("expected throttle, got {:?}", other),
        };
        assert!(h.receipts.contains(receipt_id));

        assert!(h.receipts.deliver(receipt_id, true));
        assert!(h.receipts.is_empty());
        assert!(rx.try_recv().is_err());

        assert!(h.throttle(1, 750));
        assert_eq!(h.receipts.len(), 1);
        assert_eq!(h.receipts.invalidate_all(), 1);
        assert!(h.registry.contains(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn throttle_while_down_sends_nothing() {
        let mut h = Harness::new(false);
        let _rx = h.subscribe(1, "AAPL", SubscribeOptions::default());
        assert!(h.throttle(1, 100));
        assert!(h.out.frames.is_empty());
        assert!(h.receipts.is_empty());
        assert!(!h.throttle(99, 100));
    }
}
