//! PackStream serialization format.
//!
//! PackStream is the compact, self-describing binary encoding used for every
//! field of every Bolt message. Supported values are null, booleans, 64-bit
//! integers and floats, byte arrays, strings, lists, string-keyed maps and
//! tagged structures.
//!
//! Structures other than the Bolt messages themselves (nodes, temporal and
//! spatial types) are decoded as plain [`Structure`] values; interpreting them
//! is left to the caller.

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod types;

pub use decoder::{unpack, Unpacker};
pub use encoder::{pack, Packer};
pub use types::{Structure, Value, ValueMap};

use std::fmt;

/// PackStream errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Input ended in the middle of a value
    UnexpectedEof,
    /// Marker byte not defined by PackStream
    UnknownMarker(u8),
    /// String bytes were not UTF-8
    InvalidUtf8(String),
    /// Map key was not a string
    InvalidMapKey,
    /// Value too large for the widest size marker
    TooLarge(&'static str, usize),
    /// A specific value type was required
    Unexpected {
        expected: &'static str,
        found: &'static str,
    },
    /// Bytes left over after a complete value
    TrailingBytes(usize),
    /// Lists, maps and structures nested deeper than the limit
    TooDeep(usize),
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "Unknown PackStream marker: 0x{:02X}", m),
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey => write!(f, "Map keys must be strings"),
            PackStreamError::TooLarge(kind, size) => write!(f, "{} too large: {}", kind, size),
            PackStreamError::Unexpected { expected, found } => {
                write!(f, "Expected {}, found {}", expected, found)
            }
            PackStreamError::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            PackStreamError::TooDeep(limit) => write!(f, "Values nested deeper than {}", limit),
        }
    }
}

impl std::error::Error for PackStreamError {}
