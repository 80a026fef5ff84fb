//! Unified error handling for AXON.
//!
//! One error type for the whole channel subsystem so that callers never have
//! to juggle per-module error enums.

use thiserror::Error;

/// Main error type for AXON channel operations.
#[derive(Debug, Error)]
pub enum AxonError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared memory management errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// Operation referenced an object with no registered channel
    #[error("Channel not registered: {0}")]
    NotRegistered(String),

    /// The same role was registered twice for one object
    #[error("Channel already registered: {0}")]
    AlreadyRegistered(String),

    /// Invalid input/argument errors, including out-of-order acquire/release
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The channel has been placed in its terminal error state. Every later
    /// acquire on the channel reports this kind; it is not retryable.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Operation not supported on this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal errors with source location for debugging.
    /// Use the `axon_internal!()` macro to create these — it captures
    /// file/line automatically.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// use axon_core::axon_internal;
/// return Err(axon_internal!("unexpected header state: {:?}", state));
/// ```
#[macro_export]
macro_rules! axon_internal {
    ($($arg:tt)*) => {
        $crate::error::AxonError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using AxonError
pub type AxonResult<T> = std::result::Result<T, AxonError>;

impl From<toml::de::Error> for AxonError {
    fn from(err: toml::de::Error) -> Self {
        AxonError::Config(format!("TOML parse error: {}", err))
    }
}

// Helper methods
impl AxonError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        AxonError::Config(msg.into())
    }

    /// Create a memory error
    pub fn memory<S: Into<String>>(msg: S) -> Self {
        AxonError::Memory(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        AxonError::InvalidInput(msg.into())
    }

    /// Create a channel-closed error
    pub fn channel_closed<S: Into<String>>(msg: S) -> Self {
        AxonError::ChannelClosed(msg.into())
    }

    /// True if this error means the channel reached its terminal error state.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, AxonError::ChannelClosed(_))
    }
}
