//! Bolt protocol message types.
//!
//! Requests cover protocol versions 1 through 4.1. Tags are shared between
//! versions; where a version changed a message's shape (INIT/HELLO,
//! PULL_ALL/PULL) the request enum has one variant per shape.

pub mod request;
pub mod response;

pub use request::{AccessMode, AuthToken, BoltRequest};
pub use response::BoltResponse;

/// Bolt message tags.
pub mod tag {
    /// INIT (v1-v2) and HELLO (v3+)
    pub const HELLO: u8 = 0x01;
    /// GOODBYE (v3+)
    pub const GOODBYE: u8 = 0x02;
    pub const RESET: u8 = 0x0F;
    pub const RUN: u8 = 0x10;
    /// BEGIN (v3+)
    pub const BEGIN: u8 = 0x11;
    /// COMMIT (v3+)
    pub const COMMIT: u8 = 0x12;
    /// ROLLBACK (v3+)
    pub const ROLLBACK: u8 = 0x13;
    /// DISCARD_ALL (v1-v3) and DISCARD (v4+)
    pub const DISCARD: u8 = 0x2F;
    /// PULL_ALL (v1-v3) and PULL (v4+)
    pub const PULL: u8 = 0x3F;

    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;

    /// Whether `tag` is a message the server may send.
    pub fn is_response(tag: u8) -> bool {
        matches!(tag, SUCCESS | RECORD | IGNORED | FAILURE)
    }
}
