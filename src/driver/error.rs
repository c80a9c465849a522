//! Driver Error Types
//!
//! The failure taxonomy shared by wire, connection, pool and connector.

use std::fmt;

use thiserror::Error;

use crate::bolt::{BoltError, BoltErrorCode};

// ============================================================================
// DriverError
// ============================================================================

/// Driver error.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Socket or TLS could not be opened
    #[error("Cannot connect to {address}: {reason}")]
    ConnectFailure { address: String, reason: String },

    /// I/O failed mid-session; the connection is unusable
    #[error("Broken wire: {0}")]
    BrokenWire(String),

    /// Unexpected message, bad framing or failed negotiation
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// FAILURE reported by the server
    #[error("Server failure: {0}")]
    ServerFailure(#[from] ServerFailure),

    /// Operation on a transaction whose connection failed
    #[error("Transaction broken: {0}")]
    TransactionBroken(String),

    /// Misuse of the transaction API, such as opening a second one
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Pool at capacity or no eligible server
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Pull or discard on a result that is already exhausted
    #[error("No more work to do: {0}")]
    Exhausted(String),

    /// Feature the negotiated protocol version lacks
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Bad URI or options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Deadline passed
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl DriverError {
    pub fn connect_failure(address: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::ConnectFailure {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn broken_wire(msg: impl Into<String>) -> Self {
        Self::BrokenWire(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    pub fn transaction_broken(msg: impl Into<String>) -> Self {
        Self::TransactionBroken(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Failure of the transport itself rather than of a request.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ConnectFailure { .. } | Self::BrokenWire(_))
    }

    /// Whether the connector's retry loop may try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::ServerFailure(f) => f.is_transient() || f.is_not_a_leader(),
            _ => false,
        }
    }

    /// The server failure, if this is one.
    pub fn server_failure(&self) -> Option<&ServerFailure> {
        match self {
            Self::ServerFailure(f) => Some(f),
            _ => None,
        }
    }
}

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) => Self::BrokenWire(e.to_string()),
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

/// Driver result type.
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// ServerFailure
// ============================================================================

/// Top-level classification of a server status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClassification {
    /// The request was wrong; retrying will not help
    ClientError,
    /// The server failed to process a valid request
    DatabaseError,
    /// Temporary condition; the same request may succeed later
    TransientError,
    /// Code did not follow the `Neo.<Classification>.<Category>.<Title>` shape
    Unknown,
}

/// A FAILURE message from the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct ServerFailure {
    /// Status code, e.g. `Neo.ClientError.Statement.SyntaxError`
    pub code: String,
    /// Human readable message
    pub message: String,
}

impl ServerFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    fn part(&self, index: usize) -> Option<&str> {
        self.code.split('.').nth(index)
    }

    pub fn classification(&self) -> FailureClassification {
        match self.part(1) {
            Some("ClientError") => FailureClassification::ClientError,
            Some("DatabaseError") => FailureClassification::DatabaseError,
            Some("TransientError") => FailureClassification::TransientError,
            _ => FailureClassification::Unknown,
        }
    }

    /// Third code segment, e.g. `Statement`.
    pub fn category(&self) -> Option<&str> {
        self.part(2)
    }

    /// Fourth code segment, e.g. `SyntaxError`.
    pub fn title(&self) -> Option<&str> {
        self.part(3)
    }

    pub fn is_client_error(&self) -> bool {
        self.classification() == FailureClassification::ClientError
    }

    pub fn is_database_error(&self) -> bool {
        self.classification() == FailureClassification::DatabaseError
    }

    pub fn is_transient(&self) -> bool {
        self.classification() == FailureClassification::TransientError
    }

    /// Write sent to a server that cannot accept writes for this database.
    pub fn is_not_a_leader(&self) -> bool {
        self.code == BoltErrorCode::NOT_A_LEADER
            || self.code == BoltErrorCode::FORBIDDEN_ON_READ_ONLY_DATABASE
    }
}
