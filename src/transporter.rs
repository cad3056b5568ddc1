// src/transporter.rs

//! Transporter facade: lifecycle, subscriptions, and publishing.
//!
//! The facade composes the address resolver, the options policy, credit
//! flow control, and the subscription registry over one engine
//! connection. It owns all of them; callers interact only with this
//! type.
//!
//! Publishing is best effort by contract: `publish` and its balanced
//! variants return `()`, log failures, and silently drop packets while
//! disconnected. Subscribing while disconnected is likewise a no-op.
//! The mesh layer above re-issues its subscriptions after a reconnect,
//! so nothing here tries to remember intent across connections.
//!
//! ## Concurrency model
//!
//! One task owns the `Transporter` and drives lifecycle and
//! subscription changes through `&mut self`; publishing needs only
//! `&self`. Each attached consumer runs its own receive loop on a tokio
//! task, and each delivery is dispatched on a task of its own, so a
//! slow handler stalls neither intake nor unrelated consumers.
//!
//! ## Scope and limitations
//!
//! Reconnection, wire encoding, and broker provisioning belong to the
//! engine or the layer above. Dropping the transporter without calling
//! [`Transporter::disconnect`] leaks the receive-loop tasks until the
//! engine side closes their inboxes.

use crate::credit::FlowController;
use crate::dispatch::{spawn_consumer_loop, wrap_handler, Dispatcher, PacketHandler};
use crate::domain::{Connection, ConsumerSpec, Engine, OutboundMessage, SenderSpec};
use crate::registry::{ConsumerEntry, SubscriptionRegistry};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    AddressResolver,
    DeliveryMode,
    DeliveryOptions,
    OptionsPolicy,
    Packet,
    PacketType,
    Result,
    TransporterConfig,
    TransporterError,
};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Connection lifecycle state, observable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Mesh packet transporter over a pluggable broker engine.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use mesh_transporter::{MemoryEngine, Packet, PacketType, Transporter, TransporterConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> mesh_transporter::Result<()> {
/// let engine = Arc::new(MemoryEngine::new());
/// let config = TransporterConfig::default().with_namespace("prod");
///
/// let mut transporter = Transporter::new(engine, config, |packet_type, _payload| async move {
///     println!("received {packet_type}");
///     Ok(())
/// });
///
/// transporter.connect().await?;
/// transporter.subscribe(PacketType::Request, Some("node-1")).await?;
/// transporter.subscribe(PacketType::Event, None).await?;
/// transporter
///     .publish(Packet::broadcast(PacketType::Heartbeat, Bytes::new()))
///     .await;
/// transporter.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct Transporter {
    engine: Arc<dyn Engine>,
    config: TransporterConfig,
    resolver: AddressResolver,
    policy: OptionsPolicy,
    handler: PacketHandler,
    connection: Option<Box<dyn Connection>>,
    registry: SubscriptionRegistry,
    state: ConnectionState,
}

impl Transporter {
    /// Builds a transporter over `engine` with a typed packet handler.
    ///
    /// The handler runs once per inbound delivery, for every consumer
    /// this transporter attaches. Its result drives settlement where
    /// acknowledgment is required.
    pub fn new<F, Fut>(engine: Arc<dyn Engine>, config: TransporterConfig, handler: F) -> Self
    where
        F: Fn(PacketType, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_handler(engine, config, wrap_handler(handler))
    }

    /// Builds a transporter from an already type-erased handler.
    pub fn with_handler(
        engine: Arc<dyn Engine>,
        config: TransporterConfig,
        handler: PacketHandler,
    ) -> Self {
        // ---
        let resolver = AddressResolver::new(config.namespace.clone(), config.topic_prefix.clone());
        let policy = OptionsPolicy::new(&config);

        Self {
            engine,
            config,
            resolver,
            policy,
            handler,
            connection: None,
            registry: SubscriptionRegistry::new(),
            state: ConnectionState::Disconnected,
        }
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Number of live consumers across all modes.
    pub fn active_consumers(&self) -> usize {
        self.registry.len()
    }

    /// The resolver this transporter addresses with. Useful for
    /// computing the address of a subscription to pass to
    /// [`Transporter::unsubscribe`].
    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    pub fn config(&self) -> &TransporterConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Establishes the broker connection. A second call while connected
    /// is a no-op.
    ///
    /// On failure the state returns to `Disconnected` and the error is
    /// propagated; retry policy belongs to the caller.
    pub async fn connect(&mut self) -> Result<()> {
        // ---
        if self.connection.is_some() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        match self.engine.connect(&self.config.url).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.set_state(ConnectionState::Connected);
                log_info!("connected to broker at {}", self.config.url);
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Tears down every consumer, then the connection. Idempotent and
    /// best effort: close failures are logged, never returned, and
    /// in-flight handler invocations are not awaited.
    pub async fn disconnect(&mut self) {
        // ---
        self.registry.close_all().await;

        if let Some(connection) = self.connection.take() {
            if let Err(_err) = connection.close().await {
                log_warn!("broker connection close failed: {_err}");
            }
            log_info!("disconnected from broker");
        }

        self.set_state(ConnectionState::Disconnected);
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Attaches a consumer for `packet_type`.
    ///
    /// With a target node this consumes from that node's queue; without
    /// one it subscribes to the shared fan-out topic for the type.
    /// While disconnected this is a recorded no-op, mirroring the
    /// publish contract.
    pub async fn subscribe(&mut self, packet_type: PacketType, node: Option<&str>) -> Result<()> {
        // ---
        let mode = match node {
            Some(_) => DeliveryMode::Direct,
            None => DeliveryMode::Broadcast,
        };
        let address = self.resolver.resolve(packet_type, node);
        self.attach(packet_type, mode, address).await
    }

    /// Joins the worker pool for one action: attaches a competing
    /// consumer on the action's balanced queue.
    pub async fn subscribe_balanced_request(&mut self, action: &str) -> Result<()> {
        // ---
        let address = self.resolver.balanced_request(action);
        self.attach(PacketType::Request, DeliveryMode::Balanced, address)
            .await
    }

    /// Joins `group`'s pool for one event name: attaches a competing
    /// consumer on the group's balanced event queue.
    pub async fn subscribe_balanced_event(&mut self, event: &str, group: &str) -> Result<()> {
        // ---
        let address = self.resolver.balanced_event(group, event);
        self.attach(PacketType::Event, DeliveryMode::Balanced, address)
            .await
    }

    /// Detaches every consumer attached at `address`.
    pub async fn unsubscribe(&mut self, address: &Address) {
        // ---
        let _removed = self.registry.remove(address).await;
        log_debug!("unsubscribed {_removed} consumer(s) from {address}");
    }

    /// Detaches every balanced consumer, leaving direct and broadcast
    /// subscriptions in place. Called when the local service catalog
    /// changes and the node re-joins its pools from scratch.
    pub async fn unsubscribe_balanced(&mut self) {
        // ---
        let _removed = self.registry.close_balanced().await;
        log_debug!("removed {_removed} balanced consumer(s)");
    }

    async fn attach(
        &mut self,
        packet_type: PacketType,
        mode: DeliveryMode,
        address: Address,
    ) -> Result<()> {
        // ---
        let Some(connection) = self.connection.as_ref() else {
            log_debug!("subscribe ignored while disconnected: {address}");
            return Ok(());
        };

        let ack_required = OptionsPolicy::ack_required(packet_type, mode);
        let attributes = match mode {
            DeliveryMode::Broadcast => self.policy.topic_attributes(packet_type),
            DeliveryMode::Direct | DeliveryMode::Balanced => {
                self.policy.queue_attributes(packet_type)
            }
        };

        let spec = ConsumerSpec {
            // The receiver link is named after its address; one consumer
            // per address per transporter is the normal shape.
            name: address.as_str().to_string(),
            address: address.clone(),
            initial_credit: FlowController::initial_window(mode, self.config.prefetch),
            auto_accept: !ack_required,
            attributes,
        };

        let handle = connection.open_consumer(spec).await.map_err(|err| {
            TransporterError::Subscribe {
                address: address.clone(),
                reason: err.to_string(),
            }
        })?;

        let flow = Arc::new(FlowController::new(Arc::clone(&handle.control)));
        let dispatcher = Arc::new(Dispatcher::new(
            packet_type,
            address.clone(),
            ack_required,
            Arc::clone(&self.handler),
            flow,
        ));
        let task = spawn_consumer_loop(handle.inbox, dispatcher);

        log_info!("subscribed to {address} ({mode:?}, ack={ack_required})");

        self.registry.register(ConsumerEntry {
            address,
            mode,
            control: handle.control,
            task,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Publishes a packet to its resolved address: the target node's
    /// queue when a target is set, the type's fan-out topic otherwise.
    ///
    /// Best effort: failures are logged and swallowed, and packets
    /// published while disconnected are dropped.
    pub async fn publish(&self, packet: Packet) {
        // ---
        let mode = match packet.target() {
            Some(_) => DeliveryMode::Direct,
            None => DeliveryMode::Broadcast,
        };
        let address = self.resolver.resolve(packet.packet_type(), packet.target());
        let options = self.policy.message_options(packet.packet_type(), mode);
        self.send_to(address, options, packet).await;
    }

    /// Publishes a request into an action's worker pool. The packet's
    /// target, if any, is ignored; the pool queue is the destination.
    pub async fn publish_balanced_request(&self, packet: Packet, action: &str) {
        // ---
        let address = self.resolver.balanced_request(action);
        let options = self
            .policy
            .message_options(packet.packet_type(), DeliveryMode::Balanced);
        self.send_to(address, options, packet).await;
    }

    /// Publishes an event to one consumer group's balanced queue.
    /// Publish once per group to reach several groups.
    pub async fn publish_balanced_event(&self, packet: Packet, event: &str, group: &str) {
        // ---
        let address = self.resolver.balanced_event(group, event);
        let options = self
            .policy
            .message_options(packet.packet_type(), DeliveryMode::Balanced);
        self.send_to(address, options, packet).await;
    }

    /// Opens a short-lived sender, ships the packet, closes the sender.
    ///
    /// Completion means the engine took responsibility for the message,
    /// not that anyone consumed it.
    async fn send_to(&self, address: Address, options: DeliveryOptions, packet: Packet) {
        // ---
        let Some(connection) = self.connection.as_ref() else {
            log_debug!("publish dropped while disconnected: {address}");
            return;
        };

        let spec = SenderSpec {
            name: format!("sender-{}", Uuid::new_v4()),
            address: address.clone(),
        };
        let message = OutboundMessage {
            body: packet.into_payload(),
            ttl: options.ttl,
            attributes: options.attributes,
        };

        let sender = match connection.open_sender(spec).await {
            Ok(sender) => sender,
            Err(err) => {
                log_error!("publish to {address} failed: {err}");
                return;
            }
        };

        if let Err(err) = sender.send(message).await {
            log_error!("publish to {address} failed: {err}");
        }
        if let Err(_err) = sender.close().await {
            log_debug!("sender close failed for {address}: {_err}");
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        // ---
        if self.state != next {
            log_debug!("connection state {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }
}
