//! Error types for EdgeHub
//!
//! This module contains all error types used throughout the connectivity agent,
//! including transport errors, dispatch errors, correlation errors, bus errors,
//! and the main EdgeHubError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Connection-level failures
///
/// Any of these surfacing from a connected cycle triggers a reconnect. They
/// are never fatal.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {server}: {reason}")]
    ConnectionFailed { server: String, reason: String },
    #[error("failed to send message, error: {reason}")]
    SendFailed { reason: String },
    #[error("failed to receive message, error: {reason}")]
    ReceiveFailed { reason: String },
    #[error("connection closed")]
    Closed,
    #[error("handshake timed out after {duration_ms}ms")]
    HandshakeTimeout { duration_ms: u64 },
    #[error("failed to load TLS material from {path}: {reason}")]
    TlsMaterial { path: String, reason: String },
    #[error("network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
}

/// Inbound routing failures, logged and skipped by the inbound loop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to handle message, no handler found for the message, message group: {group}")]
    NoHandler { group: String },
}

/// Synchronous request/response correlation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("a waiter is already registered for message {id}")]
    DuplicateIdentifier { id: String },
    #[error("timeout to receive response for message {id} after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },
    #[error("waiter for message {id} was canceled")]
    Canceled { id: String },
}

/// Local message bus failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("unknown module group: {group}")]
    UnknownGroup { group: String },
    #[error("unknown module: {module}")]
    UnknownModule { module: String },
    #[error("inbox of module {module} is full")]
    InboxFull { module: String },
    #[error("inbox of module {module} is closed")]
    InboxClosed { module: String },
    #[error("inbox of module {module} is being read elsewhere")]
    InboxBusy { module: String },
}

/// Illegal connection cycle transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection state transition from {from} on {event}")]
pub struct StateTransitionError {
    pub from: String,
    pub event: String,
}

// ----------------------------------------------------------------------------
// Top-Level Error
// ----------------------------------------------------------------------------

/// Core error type for EdgeHub
#[derive(Debug, thiserror::Error)]
pub enum EdgeHubError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    #[error("correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("state transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Operation interrupted by cycle tear-down or shutdown
    #[error("operation canceled")]
    Canceled,

    #[error("task failed: {reason}")]
    Task { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl EdgeHubError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        EdgeHubError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a send failure, wrapping the underlying cause
    pub fn send_failed<T: ToString>(cause: T) -> Self {
        EdgeHubError::Transport(TransportError::SendFailed {
            reason: cause.to_string(),
        })
    }

    /// Create a receive failure, wrapping the underlying cause
    pub fn receive_failed<T: ToString>(cause: T) -> Self {
        EdgeHubError::Transport(TransportError::ReceiveFailed {
            reason: cause.to_string(),
        })
    }

    /// Create a connection establishment failure
    pub fn connection_failed<S: Into<String>, R: ToString>(server: S, reason: R) -> Self {
        EdgeHubError::Transport(TransportError::ConnectionFailed {
            server: server.into(),
            reason: reason.to_string(),
        })
    }

    /// Create a no-handler dispatch error for `group`
    pub fn no_handler<T: Into<String>>(group: T) -> Self {
        EdgeHubError::Dispatch(DispatchError::NoHandler {
            group: group.into(),
        })
    }

    /// Whether this error belongs to the connection-level class that triggers
    /// a reconnect
    pub fn is_transient_connection_error(&self) -> bool {
        matches!(self, EdgeHubError::Transport(_))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, EdgeHubError>;
pub type EdgeHubResult<T> = Result<T>;
