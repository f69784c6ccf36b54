//! Error types for graft.

use thiserror::Error;

/// The main error type for graft core operations.
#[derive(Debug, Error)]
pub enum GraftError {
    /// Signal-related error.
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),
    /// An object was used from a thread other than the one that created it.
    #[error("Accessed from the wrong thread: {0}")]
    WrongThread(String),
}

/// Signal-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The connection ID is invalid or has already been disconnected.
    #[error("Invalid or disconnected connection ID")]
    InvalidConnection,
}

/// A specialized Result type for graft core operations.
pub type Result<T> = std::result::Result<T, GraftError>;
