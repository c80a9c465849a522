//! Bolt protocol error types.

use std::fmt;
use std::io;

use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Protocol-level failures: framing, encoding, negotiation.
///
/// Server-reported FAILURE messages are not errors at this level; they are
/// ordinary responses and are interpreted by the driver.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// PackStream serialization error
    PackStream(PackStreamError),

    /// Message with an unexpected tag or field count
    Protocol(String),

    /// Message larger than the configured limit
    MessageTooLarge { size: usize, max: usize },
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::Handshake(e) => write!(f, "Handshake error: {}", e),
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
        }
    }
}

impl BoltError {
    /// Shorthand for [`BoltError::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        BoltError::Protocol(msg.into())
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::Handshake(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<HandshakeError> for BoltError {
    fn from(err: HandshakeError) -> Self {
        BoltError::Handshake(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Server replied with all zeros
    NoCompatibleVersion,

    /// Server picked a version that was not offered
    UnexpectedVersion { major: u8, minor: u8 },

    /// Reply starts with "HTTP"; the address is an HTTP port
    HttpResponse,

    /// Client offered zero or more than four versions
    InvalidProposal(usize),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::NoCompatibleVersion => {
                write!(f, "No compatible protocol version found")
            }
            HandshakeError::UnexpectedVersion { major, minor } => {
                write!(f, "Server agreed to version {}.{} which was not offered", major, minor)
            }
            HandshakeError::HttpResponse => {
                write!(f, "Server replied with HTTP; this looks like an HTTP port, not a Bolt port")
            }
            HandshakeError::InvalidProposal(n) => {
                write!(f, "Between one and four versions may be proposed, got {}", n)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Status codes the driver reacts to.
pub struct BoltErrorCode;

impl BoltErrorCode {
    pub const NOT_A_LEADER: &'static str = "Neo.ClientError.Cluster.NotALeader";
    pub const FORBIDDEN_ON_READ_ONLY_DATABASE: &'static str =
        "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";
    pub const UNAUTHORIZED: &'static str = "Neo.ClientError.Security.Unauthorized";
    pub const SYNTAX_ERROR: &'static str = "Neo.ClientError.Statement.SyntaxError";
    pub const DEADLOCK_DETECTED: &'static str = "Neo.TransientError.Transaction.DeadlockDetected";
    pub const DATABASE_UNAVAILABLE: &'static str =
        "Neo.TransientError.General.DatabaseUnavailable";
}
