//! Engine implementations.
//!
//! This module provides concrete implementations of the domain-level
//! engine traits. The in-process engine is always available; wire
//! engines plug in from outside the crate by implementing the same
//! traits.
//!
//! Policy code must not depend on engine-specific types.

mod memory;

pub use memory::{MemoryEngine, SettlementStats};
