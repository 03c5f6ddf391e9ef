//! # Receipt Correlator
//!
//! Pending request acknowledgements keyed by receipt id. Each entry is a
//! [`Receiptable`] whose callbacks take `self: Box<Self>`, so an entry can be
//! consumed once: either the server delivers the receipt or the entry is
//! invalidated because the connection went away.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{GaugeFeedError, Result};

/// One-shot receiver of a receipt outcome.
pub trait Receiptable: Send {
    /// The server acknowledged the request.
    fn on_receipt(self: Box<Self>);

    /// The acknowledgement can no longer arrive.
    fn on_invalidate(self: Box<Self>);
}

/// How a receipt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Delivered,
    Invalidated,
}

/// Adapts a closure into a [`Receiptable`].
pub struct ReceiptFn<F>(F);

impl<F> ReceiptFn<F>
where
    F: FnOnce(ReceiptOutcome) + Send,
{
    pub fn new(f: F) -> Box<Self> {
        Box::new(Self(f))
    }
}

impl<F> Receiptable for ReceiptFn<F>
where
    F: FnOnce(ReceiptOutcome) + Send,
{
    fn on_receipt(self: Box<Self>) {
        (self.0)(ReceiptOutcome::Delivered)
    }

    fn on_invalidate(self: Box<Self>) {
        (self.0)(ReceiptOutcome::Invalidated)
    }
}

/// Pending receipts. Owned by the engine worker.
#[derive(Default)]
pub struct ReceiptCorrelator {
    pending: BTreeMap<u64, Box<dyn Receiptable>>,
}

impl ReceiptCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts waiting for `receipt_id`.
    ///
    /// A duplicate id leaves the existing entry alone, invalidates the
    /// newcomer on the spot and returns [`GaugeFeedError::DuplicateReceipt`].
    pub fn track(&mut self, receipt_id: u64, receiptable: Box<dyn Receiptable>) -> Result<()> {
        if self.pending.contains_key(&receipt_id) {
            warn!(receipt_id, "Receipt id already pending, invalidating newcomer");
            receiptable.on_invalidate();
            return Err(GaugeFeedError::DuplicateReceipt(receipt_id));
        }
        self.pending.insert(receipt_id, receiptable);
        Ok(())
    }

    /// Consumes the entry for `receipt_id`. Returns false when none was pending.
    pub fn deliver(&mut self, receipt_id: u64, connected: bool) -> bool {
        match self.pending.remove(&receipt_id) {
            Some(receiptable) => {
                debug!(receipt_id, "Receipt delivered");
                receiptable.on_receipt();
                true
            }
            None => {
                if connected {
                    warn!(receipt_id, "Receipt for unknown id");
                }
                false
            }
        }
    }

    /// Invalidates every pending entry in id order.
    pub fn invalidate_all(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for (receipt_id, receiptable) in pending {
            debug!(receipt_id, "Receipt invalidated");
            receiptable.on_invalidate();
        }
        count
    }

    pub fn contains(&self, receipt_id: u64) -> bool {
        self.pending.contains_key(&receipt_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for ReceiptCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptCorrelator")
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .finish()
    }
}
