//! Error types for sftpwire.

use thiserror::Error;

/// Main error type for all sftpwire operations.
#[derive(Debug, Error)]
pub enum SftpWireError {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupted framing. Fatal: the connection cannot be resynchronised.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame part arrived where the session cannot accept it.
    #[error("Unexpected frame part: {0}")]
    UnexpectedFramePart(&'static str),

    /// A body stream failed (overflow, underflow, abort, consumer failure).
    #[error(transparent)]
    Body(#[from] BodyFailure),

    /// A second consumer tried to attach to the same body stream.
    #[error("Body stream already has a consumer")]
    ConsumerAlreadyAttached,

    /// Data was pushed into a body stream that was already completed.
    #[error("Body stream is already complete")]
    BodyClosed,

    /// A packet could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Header plus declared body does not fit the 32-bit length prefix.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(u64),

    /// The handler future failed.
    #[error("Handler failed: {0}")]
    HandlerFailure(String),

    /// No route registered for the packet type.
    #[error("Handler not found for packet type: {0}")]
    HandlerNotFound(u8),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Failure recorded inside a body stream.
///
/// Cloneable so the same failure can be reported to the producer that
/// triggered it and to the consumer draining the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyFailure {
    /// More bytes were pushed than the header declared.
    #[error("Body overflow: declared {declared} bytes, received {received}")]
    Overflow { declared: u32, received: u64 },

    /// The stream was completed before all declared bytes arrived.
    #[error("Body underflow: {missing} of {declared} declared bytes missing")]
    Underflow { declared: u32, missing: u32 },

    /// The stream was torn down from outside (transport closed, session failed).
    #[error("Body aborted: {0}")]
    Aborted(String),

    /// A per-chunk unit of the consumer failed.
    #[error("Body consumer failed: {0}")]
    ConsumerFailed(String),
}

/// Result type alias using SftpWireError.
pub type Result<T> = std::result::Result<T, SftpWireError>;
