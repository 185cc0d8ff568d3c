//! Error types for header block operations.

/// Result type alias for header block operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Header block error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No blank line separates the header block from the body.
    #[error("Missing header/body boundary in {0} bytes of message text")]
    MissingBoundary(usize),
}
