//! Bolt protocol codec for tokio_util.
//!
//! Implements chunked message framing as per the Bolt protocol.
//! A message is split into chunks of at most [`MAX_CHUNK_SIZE`] bytes, each
//! with a 2-byte big-endian length prefix, and terminated by an empty chunk.
//! An empty chunk with no message in front of it is a NOOP and is skipped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::BoltError;
use super::packstream::marker::{STRUCT_16, STRUCT_8, TINY_STRUCT};
use super::packstream::{pack, Structure, Unpacker, Value};

/// Largest payload a single chunk may carry.
pub const MAX_CHUNK_SIZE: usize = 0x7FFF;

/// End of message marker (0x00 0x00)
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Default cap on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Location of the next complete message in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    /// Offset of the first chunk header, after any NOOPs
    start: usize,
    /// Offset just past the terminating empty chunk
    end: usize,
    /// Total payload bytes across chunks
    payload_len: usize,
}

/// Bolt message codec for framing.
///
/// Decodes to raw [`Structure`]s; interpreting them as requests or responses
/// is up to the caller, so the same codec serves both ends of a connection.
#[derive(Debug, Clone)]
pub struct BoltCodec {
    max_message_size: usize,
}

impl BoltCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a codec with custom max message size.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Tag of the next complete message in `buf`, without consuming anything.
    ///
    /// Returns `None` while the message is still incomplete.
    pub fn peek_tag(&self, buf: &[u8]) -> Option<u8> {
        let frame = scan(buf)?;
        let mut head = [0u8; 4];
        let copied = copy_payload(&buf[frame.start..frame.end], &mut head);
        match head[0] {
            m if m & 0xF0 == TINY_STRUCT && copied >= 2 => Some(head[1]),
            STRUCT_8 if copied >= 3 => Some(head[2]),
            STRUCT_16 if copied >= 4 => Some(head[3]),
            _ => None,
        }
    }

    /// Append `data` to `dst` as a chunked message.
    pub fn write_chunked(data: &[u8], dst: &mut BytesMut) {
        dst.reserve(data.len() + 2 * (data.len() / MAX_CHUNK_SIZE + 2));
        for chunk in data.chunks(MAX_CHUNK_SIZE) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_slice(&END_MARKER);
    }
}

impl Default for BoltCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the next complete message. NOOPs in front of it are stepped over.
fn scan(buf: &[u8]) -> Option<Frame> {
    let mut pos = 0;
    while buf.len() >= pos + 2 && buf[pos..pos + 2] == END_MARKER {
        pos += 2;
    }
    let start = pos;
    let mut payload_len = 0;
    loop {
        if buf.len() < pos + 2 {
            return None;
        }
        let size = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
        pos += 2;
        if size == 0 {
            if payload_len == 0 {
                // Only NOOPs so far.
                return None;
            }
            return Some(Frame {
                start,
                end: pos,
                payload_len,
            });
        }
        if buf.len() < pos + size {
            return None;
        }
        payload_len += size;
        pos += size;
    }
}

/// Copy up to `out.len()` payload bytes out of a chunked frame.
fn copy_payload(mut chunks: &[u8], out: &mut [u8]) -> usize {
    let mut copied = 0;
    while copied < out.len() && chunks.len() >= 2 {
        let size = u16::from_be_bytes([chunks[0], chunks[1]]) as usize;
        chunks = &chunks[2..];
        if size == 0 || chunks.len() < size {
            break;
        }
        let take = size.min(out.len() - copied);
        out[copied..copied + take].copy_from_slice(&chunks[..take]);
        copied += take;
        chunks = &chunks[size..];
    }
    copied
}

impl Decoder for BoltCodec {
    type Item = Structure;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Drop NOOPs eagerly so idle keep-alives do not pile up.
        while src.len() >= 2 && src[..2] == END_MARKER {
            src.advance(2);
        }

        let frame = match scan(src) {
            Some(frame) => frame,
            None => return Ok(None),
        };
        if frame.payload_len > self.max_message_size {
            return Err(BoltError::MessageTooLarge {
                size: frame.payload_len,
                max: self.max_message_size,
            });
        }

        let mut payload = BytesMut::with_capacity(frame.payload_len);
        src.advance(frame.start);
        loop {
            let size = src.get_u16() as usize;
            if size == 0 {
                break;
            }
            payload.extend_from_slice(&src[..size]);
            src.advance(size);
        }

        let mut unpacker = Unpacker::new(&payload);
        let structure = unpacker.unpack_structure()?;
        if unpacker.remaining() > 0 {
            return Err(BoltError::protocol(format!(
                "{} bytes after message 0x{:02X}",
                unpacker.remaining(),
                structure.tag
            )));
        }
        Ok(Some(structure))
    }
}

impl Encoder<Structure> for BoltCodec {
    type Error = BoltError;

    fn encode(&mut self, item: Structure, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = pack(&Value::Structure(item))?;
        Self::write_chunked(&encoded, dst);
        Ok(())
    }
}
