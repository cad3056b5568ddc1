// src/registry.rs

//! Bookkeeping for live consumers.
//!
//! The registry owns every consumer the transporter has attached, so
//! teardown is a single sweep: close the engine link, then abort the
//! receive loop. Closing is best effort; a link that fails to close is
//! logged and abandoned, never retried.
//!
//! The registry is plain owned state inside the transporter. Lifecycle
//! methods take `&mut self` there, so no lock is needed here.

use crate::domain::ConsumerControl;
use crate::{log_warn, Address, DeliveryMode};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One attached consumer: its engine link and its receive loop.
pub(crate) struct ConsumerEntry {
    pub(crate) address: Address,
    pub(crate) mode: DeliveryMode,
    pub(crate) control: Arc<dyn ConsumerControl>,
    pub(crate) task: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Vec<ConsumerEntry>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, entry: ConsumerEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closes and forgets every consumer.
    pub(crate) async fn close_all(&mut self) {
        // ---
        for entry in self.entries.drain(..) {
            Self::close_entry(entry).await;
        }
    }

    /// Closes and forgets only competing-consumer entries, returning how
    /// many were removed. Direct and broadcast consumers stay attached.
    pub(crate) async fn close_balanced(&mut self) -> usize {
        // ---
        let mut kept = Vec::with_capacity(self.entries.len());
        let mut removed = 0;

        for entry in self.entries.drain(..) {
            if entry.mode.is_balanced() {
                Self::close_entry(entry).await;
                removed += 1;
            } else {
                kept.push(entry);
            }
        }

        self.entries = kept;
        removed
    }

    /// Closes and forgets every consumer attached at `address`, returning
    /// how many were removed.
    pub(crate) async fn remove(&mut self, address: &Address) -> usize {
        // ---
        let mut kept = Vec::with_capacity(self.entries.len());
        let mut removed = 0;

        for entry in self.entries.drain(..) {
            if entry.address == *address {
                Self::close_entry(entry).await;
                removed += 1;
            } else {
                kept.push(entry);
            }
        }

        self.entries = kept;
        removed
    }

    /// Detaches the engine link, then stops the receive loop.
    ///
    /// Abort rather than join: in-flight handler tasks already hold their
    /// deliveries and are not interrupted, only the intake stops.
    async fn close_entry(entry: ConsumerEntry) {
        // ---
        if let Err(_err) = entry.control.close().await {
            log_warn!("failed to close consumer on {}: {_err}", entry.address);
        }
        entry.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Result, TransporterError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Control stub counting close calls.
    #[derive(Default)]
    struct CountingControl {
        closed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConsumerControl for CountingControl {
        async fn add_credit(&self, _units: u32) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Control stub whose close always fails.
    struct StuckControl;

    #[async_trait::async_trait]
    impl ConsumerControl for StuckControl {
        async fn add_credit(&self, _units: u32) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Err(TransporterError::Engine("link is wedged".to_string()))
        }
    }

    fn entry(
        address: &str,
        mode: DeliveryMode,
        control: Arc<dyn ConsumerControl>,
    ) -> ConsumerEntry {
        ConsumerEntry {
            address: Address::from(address),
            mode,
            control,
            task: tokio::spawn(async {}),
        }
    }

    #[tokio::test]
    async fn close_all_sweeps_everything() {
        // Arrange
        let control = Arc::new(CountingControl::default());
        let mut registry = SubscriptionRegistry::new();
        registry.register(entry("MOL.REQUEST.a", DeliveryMode::Direct, control.clone()));
        registry.register(entry("topic://MOL.EVENT", DeliveryMode::Broadcast, control.clone()));
        registry.register(entry("MOL.REQUESTB.x", DeliveryMode::Balanced, control.clone()));

        // Act
        registry.close_all().await;

        // Assert
        assert!(registry.is_empty());
        assert_eq!(control.closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn close_failure_does_not_abort_the_sweep() {
        // Arrange: the entry that refuses to close sits ahead of a
        // healthy one.
        let healthy = Arc::new(CountingControl::default());
        let mut registry = SubscriptionRegistry::new();
        registry.register(entry("MOL.REQUESTB.x", DeliveryMode::Balanced, Arc::new(StuckControl)));
        registry.register(entry("MOL.REQUEST.b", DeliveryMode::Direct, healthy.clone()));

        // Act
        registry.close_all().await;

        // Assert: the sweep reached the healthy entry anyway.
        assert!(registry.is_empty());
        assert_eq!(healthy.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_balanced_spares_direct_and_broadcast() {
        let control = Arc::new(CountingControl::default());
        let mut registry = SubscriptionRegistry::new();
        registry.register(entry("MOL.REQUEST.a", DeliveryMode::Direct, control.clone()));
        registry.register(entry("MOL.REQUESTB.x", DeliveryMode::Balanced, control.clone()));
        registry.register(entry("MOL.EVENTB.g.e", DeliveryMode::Balanced, control.clone()));

        let removed = registry.close_balanced().await;

        assert_eq!(removed, 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(control.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remove_targets_one_address() {
        let control = Arc::new(CountingControl::default());
        let mut registry = SubscriptionRegistry::new();
        registry.register(entry("MOL.REQUEST.a", DeliveryMode::Direct, control.clone()));
        registry.register(entry("MOL.REQUEST.b", DeliveryMode::Direct, control.clone()));

        let removed = registry.remove(&Address::from("MOL.REQUEST.a")).await;

        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);

        // Removing an unknown address is a quiet no-op.
        let removed = registry.remove(&Address::from("MOL.REQUEST.zzz")).await;
        assert_eq!(removed, 0);
        assert_eq!(registry.len(), 1);
    }
}
