//! Error types for the milter transport.

use std::io;

/// Result type alias for milter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Milter transport errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the MTA connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The MTA sent something that is not valid milter protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A packet length exceeded the allowed maximum.
    #[error("Packet exceeds size limit: {0} bytes")]
    PacketTooLarge(usize),

    /// Session engine error.
    #[error(transparent)]
    Core(#[from] spamgate_core::Error),

    /// A blocking callback task panicked or was cancelled.
    #[error("Callback task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The listen address could not be parsed.
    #[error("Invalid socket specification: {0}")]
    InvalidSocket(String),
}

impl Error {
    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
