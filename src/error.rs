use crate::Address;
use thiserror::Error;

/// Errors that can occur while driving a transporter
#[derive(Error, Debug)]
pub enum TransporterError {
    /// Broker endpoint could not be reached or refused the connection
    #[error("broker connection failed: {0}")]
    Connect(String),

    /// Consumer could not be attached to the given address
    #[error("subscribe failed for {address}: {reason}")]
    Subscribe { address: Address, reason: String },

    /// Engine-level failure on an established link
    #[error("engine error: {0}")]
    Engine(String),

    /// Operation attempted on a connection that has been closed
    #[error("connection is closed")]
    ConnectionClosed,

    /// JSON payload serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for transporter operations
pub type Result<T> = std::result::Result<T, TransporterError>;
