//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! engine implementations, protocols, or infrastructure concerns.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod engine;

// --- Engine domain re-exports ---

pub use engine::{
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
