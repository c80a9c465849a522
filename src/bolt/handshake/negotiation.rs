//! Client side of the Bolt handshake.

use super::{BoltVersion, HandshakeError, BOLT_MAGIC, HANDSHAKE_SIZE};

/// The ASCII bytes "HTTP", seen when a Bolt client dials an HTTP port.
const HTTP_REPLY: [u8; 4] = *b"HTTP";

/// A handshake proposal.
///
/// 1. Client sends 20 bytes: the magic number then four version words,
///    highest preference first, zero-padded
/// 2. Server answers with one 4-byte word: the agreed version, or zeros
#[derive(Debug, Clone)]
pub struct Handshake {
    proposals: Vec<BoltVersion>,
}

impl Handshake {
    /// Propose `versions` in the given order of preference.
    pub fn new(versions: &[BoltVersion]) -> Result<Self, HandshakeError> {
        if versions.is_empty() || versions.len() > 4 {
            return Err(HandshakeError::InvalidProposal(versions.len()));
        }
        Ok(Self {
            proposals: versions.to_vec(),
        })
    }

    pub fn proposals(&self) -> &[BoltVersion] {
        &self.proposals
    }

    /// The 20 bytes the client writes.
    pub fn request(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut out = [0u8; HANDSHAKE_SIZE];
        out[..4].copy_from_slice(&BOLT_MAGIC);
        for (slot, version) in self.proposals.iter().enumerate() {
            let start = 4 + slot * 4;
            out[start..start + 4].copy_from_slice(&version.to_bytes());
        }
        out
    }

    /// Interpret the server's 4-byte reply.
    pub fn accept(&self, reply: [u8; 4]) -> Result<BoltVersion, HandshakeError> {
        if reply == [0, 0, 0, 0] {
            return Err(HandshakeError::NoCompatibleVersion);
        }
        if reply == HTTP_REPLY {
            return Err(HandshakeError::HttpResponse);
        }
        match BoltVersion::from_bytes(reply) {
            Some(version) if self.proposals.contains(&version) => Ok(version),
            _ => Err(HandshakeError::UnexpectedVersion {
                major: reply[3],
                minor: reply[2],
            }),
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            proposals: BoltVersion::DEFAULT_PROPOSAL.to_vec(),
        }
    }
}
