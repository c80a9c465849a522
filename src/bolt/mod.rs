//! # Bolt Protocol Implementation
//!
//! Low-level Bolt protocol pieces, independent of sockets and pools.
//!
//! ## Overview
//!
//! The Bolt protocol is a binary protocol used between graph database clients
//! and servers. This module provides:
//!
//! - **PackStream** - Binary serialization format for all message fields
//! - **Message Types** - Request/response messages for versions 1 to 4.1
//! - **Handshake** - Version negotiation and the per-version capability table
//! - **Codec** - Chunked message framing for Tokio
//!
//! ## Submodules
//!
//! - [`packstream`] - Binary serialization/deserialization
//! - [`message`] - Bolt message types (HELLO, RUN, PULL, etc.)
//! - [`handshake`] - Version negotiation
//! - [`codec`] - Tokio codec for async I/O
//! - [`error`] - Protocol error types
//!
//! ## Note
//!
//! Most users should use the [`crate::driver`] module instead of
//! interacting with the Bolt protocol directly.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use codec::BoltCodec;
pub use error::{BoltError, BoltErrorCode, BoltResult, HandshakeError};
pub use handshake::{BoltVersion, Capabilities, Handshake, BOLT_MAGIC};
pub use message::{AccessMode, AuthToken, BoltRequest, BoltResponse};
pub use packstream::{PackStreamError, Structure, Value, ValueMap};
