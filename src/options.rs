// src/options.rs

//! Delivery policy: per-type broker settings and attribute merging.
//!
//! Policy decisions are made here and nowhere else. Consumers ask which
//! provisioning attributes to attach with, publishers ask which message
//! options to send with, and both ask whether a given (packet type,
//! delivery mode) pair needs settlement. The answers are pure functions
//! of the configuration; no I/O happens here.

use crate::{DeliveryMode, PacketType, TransporterConfig};
use serde_json::Value;
use std::time::Duration;

/// Free-form broker attributes keyed by name.
///
/// Attributes pass through the transporter uninterpreted, except for the
/// `ttl` key on messages (see [`OptionsPolicy::message_options`]).
pub type Attributes = serde_json::Map<String, Value>;

/// Message attribute key carrying the retention bound, in milliseconds.
const TTL_KEY: &str = "ttl";

// ---------------------------------------------------------------------------
// merge_over
// ---------------------------------------------------------------------------

/// Merges `overrides` over `base`: on key collision the override value
/// wins. Values are replaced whole; nested objects are not deep-merged.
pub fn merge_over(mut base: Attributes, overrides: &Attributes) -> Attributes {
    // ---
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    base
}

// ---------------------------------------------------------------------------
// DeliveryOptions
// ---------------------------------------------------------------------------

/// Resolved per-message delivery settings.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Whether consumption of this message must be settled with an
    /// explicit accept or reject decision.
    pub ack_required: bool,

    /// Retention bound after which an undelivered message may be
    /// discarded, `None` for unlimited.
    pub ttl: Option<Duration>,

    /// Remaining attributes, handed to the engine uninterpreted.
    pub attributes: Attributes,
}

// ---------------------------------------------------------------------------
// OptionsPolicy
// ---------------------------------------------------------------------------

/// Maps (packet type, delivery mode) to broker-level settings.
///
/// Attribute resolution is two-tier: a per-type base is computed first,
/// then the configured overrides are merged over it, so operator
/// configuration always wins on collision.
#[derive(Debug, Clone)]
pub struct OptionsPolicy {
    event_ttl: Option<Duration>,
    heartbeat_ttl: Option<Duration>,
    queue_overrides: Attributes,
    topic_overrides: Attributes,
    message_overrides: Attributes,
}

impl OptionsPolicy {
    pub fn new(config: &TransporterConfig) -> Self {
        Self {
            event_ttl: config.event_time_to_live,
            heartbeat_ttl: config.heartbeat_time_to_live,
            queue_overrides: config.queue_options.clone(),
            topic_overrides: config.topic_options.clone(),
            message_overrides: config.message_options.clone(),
        }
    }

    /// Whether consuming this (packet type, delivery mode) pair requires
    /// an explicit settlement decision.
    ///
    /// Acknowledgment is scoped to where redelivery matters: direct
    /// requests (a lost invocation strands its caller) and all balanced
    /// work (the pool must not silently lose a job). Everything else is
    /// fire-and-forget.
    pub fn ack_required(packet_type: PacketType, mode: DeliveryMode) -> bool {
        // ---
        mode.is_balanced() || (packet_type == PacketType::Request && mode == DeliveryMode::Direct)
    }

    /// Provisioning attributes for a queue consumer of `packet_type`.
    ///
    /// The per-type base is currently empty for every type; configured
    /// `queue_options` pass through and would win on any collision.
    pub fn queue_attributes(&self, _packet_type: PacketType) -> Attributes {
        merge_over(Attributes::new(), &self.queue_overrides)
    }

    /// Provisioning attributes for a topic consumer of `packet_type`.
    ///
    /// Same two-tier shape as [`Self::queue_attributes`], with the topic
    /// override set.
    pub fn topic_attributes(&self, _packet_type: PacketType) -> Attributes {
        merge_over(Attributes::new(), &self.topic_overrides)
    }

    /// Resolved settings for publishing one message.
    ///
    /// The per-type base carries the configured time-to-live for events
    /// and heartbeats. Configured `message_options` are merged over the
    /// base; a `ttl` override (milliseconds, numeric) therefore replaces
    /// the configured bound. The `ttl` key is extracted into the typed
    /// field and does not travel as a raw attribute; a non-numeric `ttl`
    /// value is dropped.
    pub fn message_options(&self, packet_type: PacketType, mode: DeliveryMode) -> DeliveryOptions {
        // ---
        let mut base = Attributes::new();

        let type_ttl = match packet_type {
            PacketType::Event => self.event_ttl,
            PacketType::Heartbeat => self.heartbeat_ttl,
            _ => None,
        };
        if let Some(ttl) = type_ttl {
            base.insert(TTL_KEY.to_string(), Value::from(ttl.as_millis() as u64));
        }

        let mut attributes = merge_over(base, &self.message_overrides);
        let ttl = attributes
            .remove(TTL_KEY)
            .and_then(|value| value.as_u64())
            .map(Duration::from_millis);

        DeliveryOptions {
            ack_required: Self::ack_required(packet_type, mode),
            ttl,
            attributes,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
