//! Bolt protocol handshake.
//!
//! The Bolt handshake consists of:
//! 1. Client sends the 4-byte magic number (0x6060B017)
//! 2. Client sends 4 x 4-byte version proposals `00 00 minor major`, highest first
//! 3. Server responds with the agreed 4-byte version word, or zeros if none

mod negotiation;
mod version;

pub use negotiation::Handshake;
pub use version::{BoltVersion, Capabilities};

pub use super::error::HandshakeError;

/// Bolt protocol magic number.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the client handshake (magic + 4 versions).
pub const HANDSHAKE_SIZE: usize = 20;

/// Size of the server reply.
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;
