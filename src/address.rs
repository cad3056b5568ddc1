// src/address.rs

//! Broker address vocabulary and resolution.
//!
//! This module owns the mapping from protocol-level routing inputs (packet
//! type, optional target node, balanced action or event names) to the
//! concrete queue and topic names used on the broker. Resolution is pure
//! string work; no I/O happens here.
//!
//! Address shapes, for a namespace `MOL` and topic prefix `topic://`:
//!
//! - direct queue:     `MOL.REQUEST.node-2`
//! - broadcast topic:  `topic://MOL.EVENT`
//! - balanced request: `MOL.REQUESTB.math.add`
//! - balanced event:   `MOL.EVENTB.payments.user.created`

use crate::PacketType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A broker destination.
///
/// An `Address` names either a queue or a topic; which of the two is
/// engine-specific and encoded by the configured topic prefix. At this
/// level it is an opaque identifier.
///
/// Addresses are immutable, cheap to clone, and safe to share across
/// threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(Arc<str>);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AddressResolver
// ---------------------------------------------------------------------------

/// Deterministic mapping from routing inputs to broker addresses.
///
/// Two resolvers built with the same namespace and topic prefix always
/// produce byte-identical addresses for the same inputs. Every node in a
/// mesh relies on this to rendezvous on shared queues and topics without
/// coordination.
///
/// ```
/// use mesh_transporter::{AddressResolver, PacketType};
///
/// let resolver = AddressResolver::new("MOL", "topic://");
///
/// assert_eq!(
///     resolver.resolve(PacketType::Event, None).as_str(),
///     "topic://MOL.EVENT",
/// );
/// assert_eq!(
///     resolver.resolve(PacketType::Request, Some("node-2")).as_str(),
///     "MOL.REQUEST.node-2",
/// );
/// assert_eq!(
///     resolver.balanced_request("math.add").as_str(),
///     "MOL.REQUESTB.math.add",
/// );
/// ```
#[derive(Clone, Debug)]
pub struct AddressResolver {
    namespace: String,
    topic_prefix: String,
}

impl AddressResolver {
    pub fn new(namespace: impl Into<String>, topic_prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Resolves the address for a direct or broadcast packet.
    ///
    /// A present `target` selects the point-to-point queue for that node;
    /// an absent target selects the shared fan-out topic for the packet
    /// type.
    pub fn resolve(&self, packet_type: PacketType, target: Option<&str>) -> Address {
        // ---
        match target {
            Some(node) => Address::from(format!(
                "{}.{}.{}",
                self.namespace,
                packet_type.token(),
                node
            )),
            None => Address::from(format!(
                "{}{}.{}",
                self.topic_prefix,
                self.namespace,
                packet_type.token()
            )),
        }
    }

    /// Resolves the competing-consumer queue for an action.
    ///
    /// The `B` marker keeps the balanced queue disjoint from every
    /// node-targeted queue: node names live in the third address segment,
    /// so `REQUESTB` can never collide with `REQUEST.<node>`.
    pub fn balanced_request(&self, action: &str) -> Address {
        // ---
        Address::from(format!(
            "{}.{}B.{}",
            self.namespace,
            PacketType::Request.token(),
            action
        ))
    }

    /// Resolves the competing-consumer queue a consumer group shares for
    /// one event name.
    ///
    /// The group segment precedes the event name, so each group gets its
    /// own queue and each group sees each event exactly once.
    pub fn balanced_event(&self, group: &str, event: &str) -> Address {
        // ---
        Address::from(format!(
            "{}.{}B.{}.{}",
            self.namespace,
            PacketType::Event.token(),
            group,
            event
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
