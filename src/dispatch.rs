// src/dispatch.rs

//! Delivery dispatch: one handler invocation per inbound message.
//!
//! The dispatcher owns the settlement state machine for its consumer.
//! Every delivery ends in exactly one of three outcomes: accepted,
//! rejected, or processed without a decision because none was required.
//! Settlement (or its absence) always precedes credit replenishment, so
//! the broker's view of the window matches local bookkeeping.
//!
//! ## Concurrency model
//!
//! The receive loop pulls deliveries in broker order but hands each one
//! to its own task, so up to a window's worth of handler invocations run
//! concurrently. Outcome order across concurrent deliveries is therefore
//! unspecified. The handler future is spawned and joined rather than
//! awaited inline, so a panic unwinds the handler's task alone and the
//! delivery is still settled.

use crate::credit::FlowController;
use crate::domain::{Delivery, Disposition};
use crate::{log_debug, log_error, Address, PacketType, Result, TransporterError};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Type-erased async packet handler.
///
/// Handlers receive the packet type and the raw payload; interpretation
/// of the payload belongs to the layer above. Wrapped in `Arc` for cheap
/// cloning when spawning per-delivery tasks.
pub type PacketHandler =
    Arc<dyn Fn(PacketType, Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Wrap a typed async function into a type-erased handler.
///
/// This lets one handler value serve every consumer the transporter
/// attaches, whatever the concrete future type.
pub fn wrap_handler<F, Fut>(handler: F) -> PacketHandler
where
    F: Fn(PacketType, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // ---
    Arc::new(move |packet_type: PacketType, payload: Bytes| {
        let fut = Box::pin(handler(packet_type, payload));
        fut as Pin<Box<dyn Future<Output = Result<()>> + Send>>
    })
}

/// Terminal state of one dispatched delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// Handler succeeded and an accept decision was issued.
    Accepted,

    /// Handler failed and a reject decision was issued.
    Rejected,

    /// Processing finished; this consumer settles nothing explicitly.
    NoAck,
}

/// Per-consumer dispatch state.
pub(crate) struct Dispatcher {
    packet_type: PacketType,
    address: Address,
    ack_required: bool,
    handler: PacketHandler,
    flow: Arc<FlowController>,
}

impl Dispatcher {
    pub(crate) fn new(
        packet_type: PacketType,
        address: Address,
        ack_required: bool,
        handler: PacketHandler,
        flow: Arc<FlowController>,
    ) -> Self {
        Self {
            packet_type,
            address,
            ack_required,
            handler,
            flow,
        }
    }

    /// Runs the handler for one delivery and settles it.
    ///
    /// Handler failure is terminal for the delivery: it is rejected (or
    /// merely logged when no decision is owed), never redelivered from
    /// here. A panicking handler counts as a failure. Credit is
    /// replenished on every path, so a failing handler cannot starve
    /// its consumer.
    pub(crate) async fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        // ---
        self.flow.on_delivery();
        let payload = delivery.body().clone();

        // The handler runs on a task of its own; a panic surfaces here
        // as a join error instead of unwinding past the settlement.
        let handler = Arc::clone(&self.handler);
        let packet_type = self.packet_type;
        let handler_task = tokio::spawn(async move { handler(packet_type, payload).await });
        let handled = match handler_task.await {
            Ok(result) => result,
            Err(join_err) => Err(TransporterError::Engine(format!(
                "handler panicked: {join_err}"
            ))),
        };

        let outcome = match handled {
            Ok(()) if self.ack_required => {
                delivery.settle(Disposition::Accepted);
                DispatchOutcome::Accepted
            }
            Ok(()) => DispatchOutcome::NoAck,
            Err(err) if self.ack_required => {
                log_error!(
                    "handler failed for {} on {}: {err}",
                    self.packet_type,
                    self.address
                );
                delivery.settle(Disposition::Rejected);
                DispatchOutcome::Rejected
            }
            Err(err) => {
                log_error!(
                    "handler failed for {} on {}: {err}",
                    self.packet_type,
                    self.address
                );
                DispatchOutcome::NoAck
            }
        };

        self.flow.on_message_settled().await;
        outcome
    }
}

/// Drives one consumer inbox until it closes.
///
/// Each delivery gets its own task; the loop itself never awaits a
/// handler, so a slow packet cannot block the ones behind it inside the
/// credit window.
pub(crate) fn spawn_consumer_loop(
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    dispatcher: Arc<Dispatcher>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        while let Some(delivery) = inbox.recv().await {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher.dispatch(delivery).await;
            });
        }
        log_debug!("consumer loop ended for {}", dispatcher.address);
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConsumerControl;
    use tokio::sync::oneshot;

    /// Control stub for consumers that only need credit to vanish.
    struct NullControl;

    #[async_trait::async_trait]
    impl ConsumerControl for NullControl {
        async fn add_credit(&self, _units: u32) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn dispatcher(ack_required: bool, handler: PacketHandler) -> Dispatcher {
        let flow = Arc::new(FlowController::new(Arc::new(NullControl)));
        Dispatcher::new(
            PacketType::Request,
            Address::from("MOL.REQUEST.node-1"),
            ack_required,
            handler,
            flow,
        )
    }

    fn succeeding() -> PacketHandler {
        wrap_handler(|_packet_type, _payload| async { Ok(()) })
    }

    fn failing() -> PacketHandler {
        wrap_handler(|_packet_type, _payload| async {
            Err(TransporterError::Engine("boom".to_string()))
        })
    }

    fn panicking() -> PacketHandler {
        wrap_handler(|_packet_type, _payload| async { panic!("handler blew up") })
    }

    #[tokio::test]
    async fn success_with_ack_issues_accept() {
        // Arrange
        let dispatcher = dispatcher(true, succeeding());
        let (conduit, decision) = oneshot::channel();
        let delivery = Delivery::new(Bytes::from_static(b"{}"), Some(conduit));

        // Act
        let outcome = dispatcher.dispatch(delivery).await;

        // Assert
        assert_eq!(outcome, DispatchOutcome::Accepted);
        assert_eq!(decision.await.unwrap(), Disposition::Accepted);
    }

    #[tokio::test]
    async fn failure_with_ack_issues_reject() {
        let dispatcher = dispatcher(true, failing());
        let (conduit, decision) = oneshot::channel();
        let delivery = Delivery::new(Bytes::from_static(b"{}"), Some(conduit));

        let outcome = dispatcher.dispatch(delivery).await;

        assert_eq!(outcome, DispatchOutcome::Rejected);
        assert_eq!(decision.await.unwrap(), Disposition::Rejected);
    }

    #[tokio::test]
    async fn success_without_ack_settles_nothing() {
        let dispatcher = dispatcher(false, succeeding());
        let delivery = Delivery::new(Bytes::from_static(b"{}"), None);

        let outcome = dispatcher.dispatch(delivery).await;

        assert_eq!(outcome, DispatchOutcome::NoAck);
    }

    #[tokio::test]
    async fn failure_without_ack_is_logged_not_settled() {
        let dispatcher = dispatcher(false, failing());
        let delivery = Delivery::new(Bytes::from_static(b"{}"), None);

        let outcome = dispatcher.dispatch(delivery).await;

        assert_eq!(outcome, DispatchOutcome::NoAck);
    }

    #[tokio::test]
    async fn dead_connection_swallows_the_decision() {
        // The engine side of the conduit is gone; dispatch still runs to
        // completion and reports the outcome it decided.
        let dispatcher = dispatcher(true, succeeding());
        let (conduit, decision) = oneshot::channel::<Disposition>();
        drop(decision);
        let delivery = Delivery::new(Bytes::from_static(b"{}"), Some(conduit));

        let outcome = dispatcher.dispatch(delivery).await;

        assert_eq!(outcome, DispatchOutcome::Accepted);
    }

    #[tokio::test]
    async fn every_outcome_replenishes_credit() {
        let flow = Arc::new(FlowController::new(Arc::new(NullControl)));
        let dispatcher = Dispatcher::new(
            PacketType::Request,
            Address::from("MOL.REQUESTB.math.add"),
            true,
            failing(),
            Arc::clone(&flow),
        );

        for _ in 0..3 {
            let (conduit, _decision) = oneshot::channel();
            let delivery = Delivery::new(Bytes::new(), Some(conduit));
            dispatcher.dispatch(delivery).await;
        }

        // Three dispatches, three replenishments, failures included.
        assert_eq!(flow.delivered(), 3);
        assert_eq!(flow.replenished(), 3);
    }

    #[tokio::test]
    async fn panicking_handler_is_rejected_and_replenishes() {
        // A panic must not strand the delivery: the decision conduit
        // still carries a reject and the credit unit still comes back.
        let flow = Arc::new(FlowController::new(Arc::new(NullControl)));
        let dispatcher = Dispatcher::new(
            PacketType::Request,
            Address::from("MOL.REQUESTB.math.add"),
            true,
            panicking(),
            Arc::clone(&flow),
        );

        let (conduit, decision) = oneshot::channel();
        let delivery = Delivery::new(Bytes::from_static(b"{}"), Some(conduit));

        let outcome = dispatcher.dispatch(delivery).await;

        assert_eq!(outcome, DispatchOutcome::Rejected);
        assert_eq!(decision.await.unwrap(), Disposition::Rejected);
        assert_eq!(flow.delivered(), 1);
        assert_eq!(flow.replenished(), 1);
    }
}
