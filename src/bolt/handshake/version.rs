//! Bolt protocol versions and what each one can do.

use std::fmt;

/// Negotiable Bolt protocol versions, oldest first.
///
/// Each version is a strict superset of the previous one. The differences are
/// kept in a [`Capabilities`] row looked up once after negotiation instead of
/// being spread across version-specific code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoltVersion {
    /// Bolt 1: INIT, PULL_ALL/DISCARD_ALL, Cypher transactions
    V1,
    /// Bolt 2: Bolt 1 plus temporal and spatial value types
    V2,
    /// Bolt 3: HELLO/GOODBYE, explicit transaction messages, extra metadata
    V3,
    /// Bolt 4.0: multiple databases, PULL/DISCARD with record limits
    V4_0,
    /// Bolt 4.1: routing context in HELLO, NOOP keep-alive chunks
    V4_1,
}

/// Behavior switches for one protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Authenticate with HELLO instead of INIT
    pub hello: bool,
    /// GOODBYE is sent before closing
    pub goodbye: bool,
    /// BEGIN/COMMIT/ROLLBACK are messages rather than Cypher statements
    pub transaction_messages: bool,
    /// RUN and BEGIN carry an extra metadata map (mode, bookmarks, timeout)
    pub extra_metadata: bool,
    /// PULL and DISCARD take `{n, qid}` so a pull can be capped
    pub flow_control: bool,
    /// A target database may be named in the extra map
    pub database_selection: bool,
    /// HELLO carries the routing context
    pub routing_context: bool,
}

/// Static registry: `(major, minor)` to version and capabilities.
const REGISTRY: [((u8, u8), BoltVersion, Capabilities); 5] = [
    (
        (1, 0),
        BoltVersion::V1,
        Capabilities {
            hello: false,
            goodbye: false,
            transaction_messages: false,
            extra_metadata: false,
            flow_control: false,
            database_selection: false,
            routing_context: false,
        },
    ),
    (
        (2, 0),
        BoltVersion::V2,
        Capabilities {
            hello: false,
            goodbye: false,
            transaction_messages: false,
            extra_metadata: false,
            flow_control: false,
            database_selection: false,
            routing_context: false,
        },
    ),
    (
        (3, 0),
        BoltVersion::V3,
        Capabilities {
            hello: true,
            goodbye: true,
            transaction_messages: true,
            extra_metadata: true,
            flow_control: false,
            database_selection: false,
            routing_context: false,
        },
    ),
    (
        (4, 0),
        BoltVersion::V4_0,
        Capabilities {
            hello: true,
            goodbye: true,
            transaction_messages: true,
            extra_metadata: true,
            flow_control: true,
            database_selection: true,
            routing_context: false,
        },
    ),
    (
        (4, 1),
        BoltVersion::V4_1,
        Capabilities {
            hello: true,
            goodbye: true,
            transaction_messages: true,
            extra_metadata: true,
            flow_control: true,
            database_selection: true,
            routing_context: true,
        },
    ),
];

impl BoltVersion {
    /// All versions, newest first.
    pub const ALL: [BoltVersion; 5] = [
        BoltVersion::V4_1,
        BoltVersion::V4_0,
        BoltVersion::V3,
        BoltVersion::V2,
        BoltVersion::V1,
    ];

    /// Default handshake proposal.
    pub const DEFAULT_PROPOSAL: [BoltVersion; 4] = [
        BoltVersion::V4_1,
        BoltVersion::V4_0,
        BoltVersion::V3,
        BoltVersion::V2,
    ];

    fn entry(self) -> &'static ((u8, u8), BoltVersion, Capabilities) {
        &REGISTRY[self as usize]
    }

    /// Look up a version by its `(major, minor)` pair.
    pub fn from_pair(major: u8, minor: u8) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|((ma, mi), _, _)| *ma == major && *mi == minor)
            .map(|(_, version, _)| *version)
    }

    pub fn major(self) -> u8 {
        self.entry().0 .0
    }

    pub fn minor(self) -> u8 {
        self.entry().0 .1
    }

    /// Handshake encoding: `00 00 minor major`.
    pub fn to_bytes(self) -> [u8; 4] {
        [0x00, 0x00, self.minor(), self.major()]
    }

    /// Parse a handshake word. All zeros and unknown pairs yield `None`.
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::from_pair(bytes[3], bytes[2])
    }

    /// Behavior table for this version.
    pub fn capabilities(self) -> &'static Capabilities {
        &self.entry().2
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}
