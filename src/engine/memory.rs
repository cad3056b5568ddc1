// src/engine/memory.rs

//! In-process broker engine.
//!
//! This file contains the concrete implementation of the domain-level
//! engine traits using in-process data structures only.
//!
//! The memory engine is the **reference implementation** of engine
//! semantics. Wire-protocol engines are expected to approximate this
//! behavior as closely as their brokers allow and to document any
//! unavoidable deviations.
//!
//! ## Semantics
//!
//! - A queue buffers messages and hands each one to exactly one of its
//!   consumers, round-robin among those holding credit. Undeliverable
//!   messages wait in the backlog.
//! - A topic fans each message out to every subscriber holding credit at
//!   that instant. Topics keep no backlog; a subscriber without credit
//!   misses the message.
//! - A message whose retention bound has passed is discarded when it
//!   reaches the head of its queue, without consuming credit.
//! - Settlement decisions are tallied per hub (accepted, rejected, and
//!   conduits dropped unsettled). Auto-accepted deliveries count as
//!   accepted on handoff. Waiters are spawned tasks, so tallies may lag
//!   settlement by a scheduler tick.
//! - Closing a connection stops new link attaches and sends. Consumers
//!   attached earlier keep draining until individually closed; the
//!   policy layer above closes consumers before the connection.
//! - Provisioning and message attributes are accepted and ignored;
//!   in-process queues need no provisioning.
//!
//! ## Non-Goals
//!
//! - Persistence or durability
//! - Redelivery of rejected or unsettled messages
//! - Network behavior or failure simulation
//!
//! ## Concurrency model
//!
//! All hub state sits behind one `std::sync::Mutex`; no lock is ever
//! held across an await. Delivery handoff is a non-blocking send on an
//! unbounded channel, so publishing never waits on consumers. Credit,
//! not channel capacity, bounds outstanding work.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{
    // ---
    Connection,
    ConsumerControl,
    ConsumerHandle,
    ConsumerSpec,
    Delivery,
    Disposition,
    Engine,
    OutboundMessage,
    SenderLink,
    SenderSpec,
};
use crate::{log_debug, Result, TransporterError};

/// Acquire mutex guard, ignoring poisoning.
///
/// Ignoring poisoning is acceptable because:
/// - Hub maps carry no invariants spanning multiple entries.
/// - The worst outcome is one dropped delivery.
///
/// This avoids propagating non-`Send` poison errors across async
/// boundaries.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Settlement tally
// ---------------------------------------------------------------------------

/// Snapshot of the hub's settlement tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettlementStats {
    /// Deliveries settled with an accept decision, auto-accepts included.
    pub accepted: u64,

    /// Deliveries settled with a reject decision.
    pub rejected: u64,

    /// Deliveries whose settlement conduit was dropped undecided.
    pub unsettled: u64,
}

// ---------------------------------------------------------------------------
// Hub state
// ---------------------------------------------------------------------------

struct StoredMessage {
    body: Bytes,
    expires_at: Option<Instant>,
}

impl StoredMessage {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// One attached consumer as the hub sees it.
struct ConsumerSlot {
    id: u64,
    credit: u32,
    auto_accept: bool,
    tx: mpsc::UnboundedSender<Delivery>,
    closed: bool,
}

impl ConsumerSlot {
    fn live(&self) -> bool {
        !self.closed && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    /// Round-robin position over `consumers`.
    cursor: usize,
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<ConsumerSlot>,
}

#[derive(Default)]
struct HubState {
    queues: HashMap<String, QueueState>,
    topics: HashMap<String, TopicState>,
    next_consumer_id: u64,
}

struct Hub {
    topic_marker: String,
    state: Mutex<HubState>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    unsettled: AtomicU64,
}

impl Hub {
    /// Splits off the topic name when `address` carries the topic marker.
    fn topic_name(&self, address: &str) -> Option<String> {
        // ---
        if self.topic_marker.is_empty() {
            return None;
        }
        address
            .strip_prefix(self.topic_marker.as_str())
            .map(str::to_string)
    }
}

/// Builds a delivery, wiring its settlement conduit into the tally.
fn make_delivery(hub: &Arc<Hub>, body: Bytes, auto_accept: bool) -> Delivery {
    // ---
    if auto_accept {
        hub.accepted.fetch_add(1, Ordering::Relaxed);
        return Delivery::new(body, None);
    }

    let (conduit, decision) = oneshot::channel();
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        match decision.await {
            Ok(Disposition::Accepted) => {
                hub.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Disposition::Rejected) => {
                hub.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                hub.unsettled.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    Delivery::new(body, Some(conduit))
}

/// Moves backlog messages to credit-holding consumers until one side
/// runs dry. Caller holds the hub lock.
fn drain_queue(hub: &Arc<Hub>, _name: &str, queue: &mut QueueState) {
    // ---
    let now = Instant::now();

    loop {
        queue.consumers.retain(ConsumerSlot::live);
        if queue.consumers.is_empty() {
            return;
        }

        // Expired heads are discarded here so stale backlog never sits
        // in front of deliverable messages.
        while queue.backlog.front().is_some_and(|m| m.expired(now)) {
            queue.backlog.pop_front();
            log_debug!("discarded expired message on {_name}");
        }
        if queue.backlog.is_empty() {
            return;
        }

        let len = queue.consumers.len();
        let mut chosen = None;
        for offset in 0..len {
            let idx = (queue.cursor + offset) % len;
            if queue.consumers[idx].credit > 0 {
                chosen = Some(idx);
                break;
            }
        }
        let Some(idx) = chosen else {
            // Nobody holds credit; the backlog waits.
            return;
        };

        let Some(message) = queue.backlog.pop_front() else {
            return;
        };
        queue.cursor = (idx + 1) % len;

        let slot = &mut queue.consumers[idx];
        slot.credit -= 1;
        let delivery = make_delivery(hub, message.body, slot.auto_accept);
        if slot.tx.send(delivery).is_err() {
            slot.closed = true;
            log_debug!("dropped delivery for closed consumer on {_name}");
        }
    }
}

/// Hands one message to every credit-holding subscriber. Caller holds
/// the hub lock.
fn fanout(hub: &Arc<Hub>, _name: &str, topic: &mut TopicState, body: &Bytes) {
    // ---
    topic.subscribers.retain(ConsumerSlot::live);

    for slot in topic.subscribers.iter_mut() {
        if slot.credit == 0 {
            log_debug!("subscriber without credit missed a broadcast on {_name}");
            continue;
        }
        slot.credit -= 1;
        let delivery = make_delivery(hub, body.clone(), slot.auto_accept);
        if slot.tx.send(delivery).is_err() {
            slot.closed = true;
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryEngine
// ---------------------------------------------------------------------------

/// In-process engine.
///
/// All connections from one `MemoryEngine` share a hub, so transporters
/// built over clones of the same engine see each other's queues and
/// topics. This engine requires no external resources and ignores the
/// connection URL.
#[derive(Clone)]
pub struct MemoryEngine {
    hub: Arc<Hub>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_topic_marker("topic://")
    }

    /// Engine whose hub recognizes a non-default topic marker. Must
    /// match the transporter's configured topic prefix.
    pub fn with_topic_marker(marker: impl Into<String>) -> Self {
        Self {
            hub: Arc::new(Hub {
                topic_marker: marker.into(),
                state: Mutex::new(HubState::default()),
                accepted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                unsettled: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of the settlement tally across the whole hub.
    pub fn stats(&self) -> SettlementStats {
        SettlementStats {
            accepted: self.hub.accepted.load(Ordering::Relaxed),
            rejected: self.hub.rejected.load(Ordering::Relaxed),
            unsettled: self.hub.unsettled.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Engine for MemoryEngine {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Connection>> {
        // ---
        Ok(Box::new(MemoryConnection {
            hub: Arc::clone(&self.hub),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

struct MemoryConnection {
    hub: Arc<Hub>,
    open: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn open_consumer(&self, spec: ConsumerSpec) -> Result<ConsumerHandle> {
        // ---
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransporterError::ConnectionClosed);
        }

        let (tx, inbox) = mpsc::unbounded_channel();
        let address = spec.address.as_str().to_string();

        let mut state = lock_ignore_poison(&self.hub.state);
        let id = state.next_consumer_id;
        state.next_consumer_id += 1;

        let slot = ConsumerSlot {
            id,
            credit: spec.initial_credit,
            auto_accept: spec.auto_accept,
            tx,
            closed: false,
        };

        match self.hub.topic_name(&address) {
            Some(topic) => {
                state.topics.entry(topic).or_default().subscribers.push(slot);
            }
            None => {
                let queue = state.queues.entry(address.clone()).or_default();
                queue.consumers.push(slot);
                // Backlog published before the attach is deliverable now.
                drain_queue(&self.hub, &address, queue);
            }
        }
        drop(state);

        log_debug!("attached consumer {} to {address}", spec.name);

        let control = Arc::new(MemoryConsumerControl {
            hub: Arc::clone(&self.hub),
            address,
            id,
        });

        Ok(ConsumerHandle { inbox, control })
    }

    async fn open_sender(&self, spec: SenderSpec) -> Result<Box<dyn SenderLink>> {
        // ---
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransporterError::ConnectionClosed);
        }

        log_debug!("attached sender {} to {}", spec.name, spec.address);

        Ok(Box::new(MemorySender {
            hub: Arc::clone(&self.hub),
            open: Arc::clone(&self.open),
            address: spec.address.as_str().to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryConsumerControl
// ---------------------------------------------------------------------------

struct MemoryConsumerControl {
    hub: Arc<Hub>,
    address: String,
    id: u64,
}

#[async_trait::async_trait]
impl ConsumerControl for MemoryConsumerControl {
    async fn add_credit(&self, units: u32) -> Result<()> {
        // ---
        let gone = || TransporterError::Engine(format!("no live consumer on {}", self.address));
        let mut state = lock_ignore_poison(&self.hub.state);

        match self.hub.topic_name(&self.address) {
            Some(topic) => {
                let slot = state
                    .topics
                    .get_mut(&topic)
                    .and_then(|t| t.subscribers.iter_mut().find(|s| s.id == self.id && s.live()));
                let Some(slot) = slot else {
                    return Err(gone());
                };
                slot.credit = slot.credit.saturating_add(units);
            }
            None => {
                let Some(queue) = state.queues.get_mut(&self.address) else {
                    return Err(gone());
                };
                let Some(slot) = queue
                    .consumers
                    .iter_mut()
                    .find(|s| s.id == self.id && s.live())
                else {
                    return Err(gone());
                };
                slot.credit = slot.credit.saturating_add(units);
                drain_queue(&self.hub, &self.address, queue);
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.hub.state);

        match self.hub.topic_name(&self.address) {
            Some(topic) => {
                if let Some(topic_state) = state.topics.get_mut(&topic) {
                    topic_state.subscribers.retain(|s| s.id != self.id);
                }
            }
            None => {
                if let Some(queue) = state.queues.get_mut(&self.address) {
                    queue.consumers.retain(|s| s.id != self.id);
                }
            }
        }

        // Closing an already-detached consumer is a no-op.
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySender
// ---------------------------------------------------------------------------

struct MemorySender {
    hub: Arc<Hub>,
    open: Arc<AtomicBool>,
    address: String,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl SenderLink for MemorySender {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        // ---
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransporterError::Engine("sender link is closed".to_string()));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransporterError::ConnectionClosed);
        }

        // A bound the clock cannot represent is no bound at all.
        let expires_at = message.ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        let mut state = lock_ignore_poison(&self.hub.state);

        match self.hub.topic_name(&self.address) {
            Some(topic) => {
                // A topic with no subscribers delivers to nobody; the
                // send still succeeds.
                if let Some(topic_state) = state.topics.get_mut(&topic) {
                    fanout(&self.hub, &self.address, topic_state, &message.body);
                }
            }
            None => {
                let queue = state.queues.entry(self.address.clone()).or_default();
                queue.backlog.push_back(StoredMessage {
                    body: message.body,
                    expires_at,
                });
                drain_queue(&self.hub, &self.address, queue);
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, Attributes};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    const RECV_WINDOW: Duration = Duration::from_millis(100);

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition was not reached in time");
    }

    fn consumer_spec(address: &str, credit: u32, auto_accept: bool) -> ConsumerSpec {
        ConsumerSpec {
            name: format!("test-consumer-{address}"),
            address: Address::from(address),
            initial_credit: credit,
            auto_accept,
            attributes: Attributes::new(),
        }
    }

    fn sender_spec(address: &str) -> SenderSpec {
        SenderSpec {
            name: format!("test-sender-{address}"),
            address: Address::from(address),
        }
    }

    fn outbound(body: &'static [u8]) -> OutboundMessage {
        OutboundMessage {
            body: Bytes::from_static(body),
            ttl: None,
            attributes: Attributes::new(),
        }
    }

    #[tokio::test]
    async fn queue_delivery_waits_for_credit() {
        // Arrange: a consumer holding no credit.
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();
        let mut handle = connection
            .open_consumer(consumer_spec("MOL.INFO.a", 0, true))
            .await
            .unwrap();
        let sender = connection.open_sender(sender_spec("MOL.INFO.a")).await.unwrap();

        // Act: publish with the window closed.
        sender.send(outbound(b"one")).await.unwrap();
        assert!(timeout(RECV_WINDOW, handle.inbox.recv()).await.is_err());

        // Act: open the window.
        handle.control.add_credit(1).await.unwrap();

        // Assert: the buffered message arrives.
        let delivery = timeout(RECV_WINDOW, handle.inbox.recv())
            .await
            .expect("delivery after credit grant")
            .expect("channel open");
        assert_eq!(delivery.body().as_ref(), b"one");
    }

    #[tokio::test]
    async fn queue_splits_work_round_robin() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();

        let mut first = connection
            .open_consumer(consumer_spec("MOL.REQUESTB.math.add", 1, false))
            .await
            .unwrap();
        let mut second = connection
            .open_consumer(consumer_spec("MOL.REQUESTB.math.add", 1, false))
            .await
            .unwrap();
        let sender = connection
            .open_sender(sender_spec("MOL.REQUESTB.math.add"))
            .await
            .unwrap();

        sender.send(outbound(b"a")).await.unwrap();
        sender.send(outbound(b"b")).await.unwrap();

        // One message each, in attach order.
        let to_first = timeout(RECV_WINDOW, first.inbox.recv())
            .await
            .expect("first consumer delivery")
            .unwrap();
        let to_second = timeout(RECV_WINDOW, second.inbox.recv())
            .await
            .expect("second consumer delivery")
            .unwrap();
        assert_eq!(to_first.body().as_ref(), b"a");
        assert_eq!(to_second.body().as_ref(), b"b");
    }

    #[tokio::test]
    async fn competing_consumer_without_credit_is_skipped() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();

        let mut broke = connection
            .open_consumer(consumer_spec("MOL.REQUESTB.x", 0, false))
            .await
            .unwrap();
        let mut funded = connection
            .open_consumer(consumer_spec("MOL.REQUESTB.x", 2, false))
            .await
            .unwrap();
        let sender = connection.open_sender(sender_spec("MOL.REQUESTB.x")).await.unwrap();

        sender.send(outbound(b"a")).await.unwrap();
        sender.send(outbound(b"b")).await.unwrap();

        // Both land on the consumer holding credit.
        for expected in [b"a".as_slice(), b"b".as_slice()] {
            let delivery = timeout(RECV_WINDOW, funded.inbox.recv())
                .await
                .expect("funded consumer delivery")
                .unwrap();
            assert_eq!(delivery.body().as_ref(), expected);
        }
        assert!(timeout(RECV_WINDOW, broke.inbox.recv()).await.is_err());
    }

    #[tokio::test]
    async fn topic_fans_out_to_credit_holders_only() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();

        let mut funded_a = connection
            .open_consumer(consumer_spec("topic://MOL.EVENT", 1, true))
            .await
            .unwrap();
        let mut funded_b = connection
            .open_consumer(consumer_spec("topic://MOL.EVENT", 1, true))
            .await
            .unwrap();
        let mut broke = connection
            .open_consumer(consumer_spec("topic://MOL.EVENT", 0, true))
            .await
            .unwrap();
        let sender = connection
            .open_sender(sender_spec("topic://MOL.EVENT"))
            .await
            .unwrap();

        sender.send(outbound(b"ev")).await.unwrap();

        for handle in [&mut funded_a, &mut funded_b] {
            let delivery = timeout(RECV_WINDOW, handle.inbox.recv())
                .await
                .expect("funded subscriber delivery")
                .unwrap();
            assert_eq!(delivery.body().as_ref(), b"ev");
        }

        // No backlog for topics: the missed message is gone for good.
        assert!(timeout(RECV_WINDOW, broke.inbox.recv()).await.is_err());
        broke.control.add_credit(1).await.unwrap();
        assert!(timeout(RECV_WINDOW, broke.inbox.recv()).await.is_err());
    }

    #[tokio::test]
    async fn expired_backlog_is_discarded_at_the_head() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();
        let sender = connection.open_sender(sender_spec("MOL.EVENT.n1")).await.unwrap();

        // Publish with an immediate retention bound, before any consumer
        // exists to take it.
        sender
            .send(OutboundMessage {
                body: Bytes::from_static(b"stale"),
                ttl: Some(Duration::ZERO),
                attributes: Attributes::new(),
            })
            .await
            .unwrap();

        let mut handle = connection
            .open_consumer(consumer_spec("MOL.EVENT.n1", 4, true))
            .await
            .unwrap();
        assert!(timeout(RECV_WINDOW, handle.inbox.recv()).await.is_err());

        // The queue itself stays usable.
        sender.send(outbound(b"fresh")).await.unwrap();
        let delivery = timeout(RECV_WINDOW, handle.inbox.recv())
            .await
            .expect("fresh delivery")
            .unwrap();
        assert_eq!(delivery.body().as_ref(), b"fresh");
    }

    #[tokio::test]
    async fn unrepresentable_retention_bound_means_no_expiry() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();
        let mut handle = connection
            .open_consumer(consumer_spec("MOL.EVENT.n2", 1, true))
            .await
            .unwrap();
        let sender = connection.open_sender(sender_spec("MOL.EVENT.n2")).await.unwrap();

        // A bound past the end of the clock must neither panic nor
        // expire anything.
        sender
            .send(OutboundMessage {
                body: Bytes::from_static(b"kept"),
                ttl: Some(Duration::MAX),
                attributes: Attributes::new(),
            })
            .await
            .unwrap();

        let delivery = timeout(RECV_WINDOW, handle.inbox.recv())
            .await
            .expect("delivery under an unbounded retention")
            .unwrap();
        assert_eq!(delivery.body().as_ref(), b"kept");
    }

    #[tokio::test]
    async fn settlement_tally_tracks_each_disposition() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();
        let mut handle = connection
            .open_consumer(consumer_spec("MOL.REQUEST.n1", 3, false))
            .await
            .unwrap();
        let sender = connection.open_sender(sender_spec("MOL.REQUEST.n1")).await.unwrap();

        for body in [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()] {
            sender.send(outbound(body)).await.unwrap();
        }

        let first = timeout(RECV_WINDOW, handle.inbox.recv()).await.unwrap().unwrap();
        let second = timeout(RECV_WINDOW, handle.inbox.recv()).await.unwrap().unwrap();
        let third = timeout(RECV_WINDOW, handle.inbox.recv()).await.unwrap().unwrap();

        first.settle(Disposition::Accepted);
        second.settle(Disposition::Rejected);
        drop(third);

        wait_until(|| engine.stats() == SettlementStats {
            accepted: 1,
            rejected: 1,
            unsettled: 1,
        })
        .await;
    }

    #[tokio::test]
    async fn closed_connection_refuses_new_links() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();
        let sender = connection.open_sender(sender_spec("MOL.PING.n1")).await.unwrap();

        connection.close().await.unwrap();
        // Idempotent.
        connection.close().await.unwrap();

        assert!(matches!(
            connection.open_consumer(consumer_spec("MOL.PING.n1", 1, true)).await,
            Err(TransporterError::ConnectionClosed)
        ));
        assert!(matches!(
            connection.open_sender(sender_spec("MOL.PING.n1")).await,
            Err(TransporterError::ConnectionClosed)
        ));
        assert!(matches!(
            sender.send(outbound(b"late")).await,
            Err(TransporterError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn credit_grants_fail_once_the_consumer_is_gone() {
        let engine = MemoryEngine::new();
        let connection = engine.connect("memory://").await.unwrap();
        let handle = connection
            .open_consumer(consumer_spec("MOL.REQUEST.n2", 1, false))
            .await
            .unwrap();

        handle.control.close().await.unwrap();
        handle.control.close().await.unwrap();

        assert!(handle.control.add_credit(1).await.is_err());
    }
}
