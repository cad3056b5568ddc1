// src/packet.rs

//! Packet vocabulary shared by every layer of the transporter.
//!
//! A [`Packet`] is an already-serialized payload tagged with its protocol
//! type and an optional target node. The transporter never inspects the
//! payload; addressing and delivery policy are driven entirely by the
//! type tag and the presence of a target.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Protocol-level packet classification.
///
/// The serialized form (and the token embedded in broker addresses) is the
/// upper-cased variant name, e.g. `REQUEST` or `HEARTBEAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketType {
    /// Invocation of an action on another node
    Request,

    /// Reply to an earlier request
    Response,

    /// Emitted event
    Event,

    /// Node discovery probe
    Discover,

    /// Node shutdown notice
    Disconnect,

    /// Liveness beacon
    Heartbeat,

    /// Latency probe
    Ping,

    /// Reply to a ping
    Pong,

    /// Node capability announcement
    Info,

    /// Catch-all for unrecognized packets
    Unknown,
}

impl PacketType {
    /// Every packet type, in protocol order. Handy for wiring up the full
    /// set of subscriptions a node needs.
    pub const ALL: [PacketType; 10] = [
        PacketType::Request,
        PacketType::Response,
        PacketType::Event,
        PacketType::Discover,
        PacketType::Disconnect,
        PacketType::Heartbeat,
        PacketType::Ping,
        PacketType::Pong,
        PacketType::Info,
        PacketType::Unknown,
    ];

    /// Address token for this packet type.
    pub fn token(&self) -> &'static str {
        match self {
            PacketType::Request => "REQUEST",
            PacketType::Response => "RESPONSE",
            PacketType::Event => "EVENT",
            PacketType::Discover => "DISCOVER",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Heartbeat => "HEARTBEAT",
            PacketType::Ping => "PING",
            PacketType::Pong => "PONG",
            PacketType::Info => "INFO",
            PacketType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ---------------------------------------------------------------------------
// DeliveryMode
// ---------------------------------------------------------------------------

/// How a packet travels from publisher to consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Point-to-point queue addressed to a single named node
    Direct,

    /// Topic fan-out; every subscribed node receives a copy
    Broadcast,

    /// Competing-consumer queue; exactly one member of the worker pool
    /// receives each packet
    Balanced,
}

impl DeliveryMode {
    /// True for the competing-consumer mode.
    pub fn is_balanced(&self) -> bool {
        matches!(self, DeliveryMode::Balanced)
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// An outbound unit of work: serialized payload plus routing inputs.
#[derive(Debug, Clone)]
pub struct Packet {
    packet_type: PacketType,
    target: Option<String>,
    payload: Bytes,
}

impl Packet {
    /// Builds a packet with an explicit (possibly absent) target node.
    pub fn new(packet_type: PacketType, target: Option<String>, payload: Bytes) -> Self {
        Self {
            packet_type,
            target,
            payload,
        }
    }

    /// Builds a packet addressed to one named node.
    pub fn direct(packet_type: PacketType, target: impl Into<String>, payload: Bytes) -> Self {
        Self::new(packet_type, Some(target.into()), payload)
    }

    /// Builds a packet addressed to every subscriber of its type.
    pub fn broadcast(packet_type: PacketType, payload: Bytes) -> Self {
        Self::new(packet_type, None, payload)
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the packet, yielding the payload without copying.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_uppercase_variant_names() {
        for packet_type in PacketType::ALL {
            let token = packet_type.token();
            assert_eq!(token, token.to_uppercase());
            assert_eq!(packet_type.to_string(), token);
        }
    }

    #[test]
    fn serde_form_matches_address_token() {
        for packet_type in PacketType::ALL {
            let json = serde_json::to_string(&packet_type).unwrap();
            assert_eq!(json, format!("\"{}\"", packet_type.token()));

            let back: PacketType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, packet_type);
        }
    }

    #[test]
    fn direct_and_broadcast_constructors_set_target() {
        let direct = Packet::direct(PacketType::Request, "node-7", Bytes::from_static(b"{}"));
        assert_eq!(direct.target(), Some("node-7"));

        let broadcast = Packet::broadcast(PacketType::Event, Bytes::new());
        assert_eq!(broadcast.target(), None);
        assert!(broadcast.payload().is_empty());
    }

    #[test]
    fn only_balanced_mode_reports_balanced() {
        assert!(DeliveryMode::Balanced.is_balanced());
        assert!(!DeliveryMode::Direct.is_balanced());
        assert!(!DeliveryMode::Broadcast.is_balanced());
    }
}
