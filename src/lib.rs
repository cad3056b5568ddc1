//! Addressing and delivery policy for mesh packets over queue/topic brokers
//!
//! This library turns protocol-level routing inputs (packet type, target
//! node, balanced action or event names) into concrete broker addresses,
//! decides per-packet delivery settings (acknowledgment, time to live,
//! attributes), and drives credit-based flow control over a pluggable
//! engine. The engine moves the bytes; everything above it lives here.
//!
//! The in-process [`MemoryEngine`] is the reference implementation of
//! the engine contract and backs the test suite; wire-protocol engines
//! implement the same [`Engine`] trait outside this crate.

// Import all sub modules once...
mod address;
mod config;
mod credit;
mod dispatch;
mod domain;
mod engine;
mod error;
mod macros;
mod options;
mod packet;
mod registry;
mod transporter;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use transporter::{ConnectionState, Transporter};

pub use config::TransporterConfig;

pub use address::{Address, AddressResolver};
pub use dispatch::{wrap_handler, PacketHandler};
pub use error::{Result, TransporterError};
pub use options::{merge_over, Attributes, DeliveryOptions, OptionsPolicy};
pub use packet::{DeliveryMode, Packet, PacketType};

pub use engine::{MemoryEngine, SettlementStats};

// --- public re-exports
pub use domain::{
    //
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
