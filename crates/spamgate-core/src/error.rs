//! Error types for the session engine.

use std::io;

use thiserror::Error;

/// Broad category of a fault, used by the single reporting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Pipe or process creation failed.
    IpcSetup,
    /// Read, write, poll or close on a classifier pipe failed.
    Io,
    /// Reaping the classifier failed.
    Wait,
    /// Classifier output could not be split into headers and body.
    BodyBoundary,
    /// Configuration could not be parsed or validated.
    Config,
    /// An operation was attempted in the wrong lifecycle state.
    State,
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Pipe or process creation failed.
    #[error("IPC setup error ({op}): {source}")]
    IpcSetup {
        /// Step that failed.
        op: &'static str,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Classifier pipe I/O failed.
    #[error("{op} error: {source}")]
    Io {
        /// Operation that failed (`write`, `read`, `poll`, `close`).
        op: &'static str,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Waiting for the classifier to exit failed.
    #[error("waitpid error: {0}")]
    Wait(#[source] io::Error),

    /// Classifier output lacks a header/body separator.
    #[error("could not replace body: {0}")]
    BodyBoundary(#[from] spamgate_mime::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid network in an ignore list.
    #[error("Could not parse {entry:?} as a network: {reason}")]
    InvalidNetwork {
        /// Offending entry.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration file could not be decoded.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Returns the fault category of this error.
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        match self {
            Self::IpcSetup { .. } => FaultKind::IpcSetup,
            Self::Io { .. } => FaultKind::Io,
            Self::Wait(_) => FaultKind::Wait,
            Self::BodyBoundary(_) => FaultKind::BodyBoundary,
            Self::Config(_) | Self::InvalidNetwork { .. } | Self::Serde(_) => FaultKind::Config,
            Self::InvalidState(_) => FaultKind::State,
        }
    }

    pub(crate) const fn ipc_setup(op: &'static str, source: io::Error) -> Self {
        Self::IpcSetup { op, source }
    }

    pub(crate) const fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    pub(crate) fn invalid_network(entry: &str, reason: impl Into<String>) -> Self {
        Self::InvalidNetwork {
            entry: entry.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
