// src/credit.rs

//! Credit-based flow control for one consumer.
//!
//! A consumer starts with an initial window of credit and earns one unit
//! back for every delivery it settles, success or failure alike. Summed
//! over time, N settled deliveries produce exactly N replenishments, so
//! the window never drifts: a consumer that keeps settling keeps
//! receiving, and one that stalls is throttled at its window.

use crate::domain::ConsumerControl;
use crate::{log_debug, DeliveryMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Credit returned to the broker per settled delivery.
const CREDIT_UNIT: u32 = 1;

/// Replenishes consumer credit as deliveries settle.
///
/// One controller per consumer. Counters are kept so the conservation
/// property is observable; they are monotone and never reset.
pub(crate) struct FlowController {
    control: Arc<dyn ConsumerControl>,
    unit: u32,
    delivered: AtomicU64,
    replenished: AtomicU64,
}

impl FlowController {
    pub(crate) fn new(control: Arc<dyn ConsumerControl>) -> Self {
        Self {
            control,
            unit: CREDIT_UNIT,
            delivered: AtomicU64::new(0),
            replenished: AtomicU64::new(0),
        }
    }

    /// Initial credit window for a consumer in the given mode.
    ///
    /// Balanced consumers always start at 1 so a slow worker never
    /// hoards pool work; everything else takes the configured prefetch.
    pub(crate) fn initial_window(mode: DeliveryMode, prefetch: u32) -> u32 {
        // ---
        match mode {
            DeliveryMode::Balanced => 1,
            DeliveryMode::Direct | DeliveryMode::Broadcast => prefetch,
        }
    }

    /// Records a delivery handed to the dispatcher.
    pub(crate) fn on_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns one credit unit after a settlement, success or failure.
    ///
    /// A failed grant means the consumer link is already gone; the
    /// replenishment is moot then, so the error is only logged.
    pub(crate) async fn on_message_settled(&self) {
        // ---
        self.replenished.fetch_add(1, Ordering::Relaxed);
        if let Err(_err) = self.control.add_credit(self.unit).await {
            log_debug!("credit replenishment skipped, consumer is gone: {_err}");
        }
    }

    #[cfg(test)]
    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn replenished(&self) -> u64 {
        self.replenished.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
