// src/domain/engine.rs

//! Engine domain abstractions.
//!
//! This module defines the boundary between the transporter's policy
//! layer and whatever actually moves bytes. An engine owns protocol
//! negotiation, link management, and wire encoding; the policy layer
//! owns addressing, flow control, and settlement decisions.
//!
//! Nothing here references a concrete protocol or client library.
//! Concrete implementations live under `src/engine/`.

use crate::{Address, Attributes, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Terminal settlement decision for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Processing succeeded; the broker may forget the message.
    Accepted,

    /// Processing failed; the broker learns the message was not handled.
    Rejected,
}

/// One inbound message handed to a consumer.
///
/// The settlement conduit is single use and consumed by [`Delivery::settle`],
/// so a delivery cannot be settled twice. Deliveries from auto-accepting
/// consumers carry no conduit; settling them is a no-op.
///
/// If the connection died after the delivery was handed over, the decision
/// has nowhere to go; `settle` silently discards it rather than failing,
/// because the broker will make its own redelivery call either way.
pub struct Delivery {
    body: Bytes,
    settlement: Option<oneshot::Sender<Disposition>>,
}

impl Delivery {
    pub fn new(body: Bytes, settlement: Option<oneshot::Sender<Disposition>>) -> Self {
        Self { body, settlement }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// True when this delivery still expects an explicit decision.
    pub fn needs_settlement(&self) -> bool {
        self.settlement.is_some()
    }

    /// Issues the settlement decision, consuming the delivery.
    pub fn settle(mut self, disposition: Disposition) {
        // ---
        if let Some(conduit) = self.settlement.take() {
            let _ = conduit.send(disposition);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("needs_settlement", &self.needs_settlement())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Link specifications
// ---------------------------------------------------------------------------

/// Everything an engine needs to attach a consumer.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Link name, unique per connection.
    pub name: String,

    /// Queue or topic to consume from.
    pub address: Address,

    /// Credit granted at attach time, before any replenishment.
    pub initial_credit: u32,

    /// When true the engine settles each delivery on handoff and the
    /// resulting [`Delivery`] carries no settlement conduit.
    pub auto_accept: bool,

    /// Provisioning attributes, interpreted by the engine.
    pub attributes: Attributes,
}

/// Everything an engine needs to attach a sender.
#[derive(Debug, Clone)]
pub struct SenderSpec {
    /// Link name, unique per connection.
    pub name: String,

    /// Queue or topic to publish into.
    pub address: Address,
}

/// One outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Opaque payload bytes.
    pub body: Bytes,

    /// Retention bound, `None` for unlimited.
    pub ttl: Option<Duration>,

    /// Message attributes, interpreted by the engine.
    pub attributes: Attributes,
}

/// Handle returned from a successful consumer attach.
///
/// Deliveries arrive on `inbox` in broker order. The channel is
/// unbounded; the credit window, not the channel, bounds how much work
/// can be outstanding. `control` stays valid after the handle's inbox
/// half is moved into a receive loop.
pub struct ConsumerHandle {
    // ---
    /// Receiver side of the delivery stream.
    pub inbox: mpsc::UnboundedReceiver<Delivery>,

    /// Credit and teardown control for this consumer.
    pub control: Arc<dyn ConsumerControl>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Factory for broker connections.
///
/// Implementations must ensure that:
/// - `connect` either yields a usable [`Connection`] or an error; a
///   returned connection accepts link attaches immediately.
/// - Concurrent connections from one engine are independent.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    /// Establish a connection to the broker at `url`.
    ///
    /// The URL carries endpoint and credentials; policy settings do not
    /// belong in it.
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>>;
}

/// One established broker connection.
///
/// Links attached through a connection live at most as long as it; after
/// `close` returns, attach attempts fail and pending settlement decisions
/// are discarded.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Attach a consumer link.
    ///
    /// Once this returns, messages already waiting at the address are
    /// deliverable within the granted credit.
    async fn open_consumer(&self, spec: ConsumerSpec) -> Result<ConsumerHandle>;

    /// Attach a sender link.
    async fn open_sender(&self, spec: SenderSpec) -> Result<Box<dyn SenderLink>>;

    /// Close the connection and release broker resources.
    ///
    /// Closing is idempotent at the engine level; the policy layer also
    /// guards against double close.
    async fn close(&self) -> Result<()>;
}

/// Credit and teardown control for an attached consumer.
#[async_trait::async_trait]
pub trait ConsumerControl: Send + Sync {
    /// Grant `units` additional deliveries to this consumer.
    async fn add_credit(&self, units: u32) -> Result<()>;

    /// Detach the consumer. Queued deliveries for it are abandoned.
    async fn close(&self) -> Result<()>;
}

/// An attached sender link.
#[async_trait::async_trait]
pub trait SenderLink: Send + Sync {
    /// Publish one message, resolving when the engine has taken
    /// responsibility for it.
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Detach the sender.
    async fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
