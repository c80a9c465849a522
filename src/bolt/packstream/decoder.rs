//! PackStream decoder.

use bytes::Buf;

use super::marker::*;
use super::types::{Structure, Value, ValueMap};
use super::PackStreamError;

/// Deepest nesting of lists, maps and structures accepted.
pub const MAX_DEPTH: usize = 128;

/// Reads PackStream values from a byte slice, front to back.
pub struct Unpacker<'a> {
    buf: &'a [u8],
    depth: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, depth: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Unpack the next value.
    pub fn unpack(&mut self) -> Result<Value, PackStreamError> {
        let marker = self.u8()?;

        if is_tiny_int(marker) {
            return Ok(Value::Integer(marker as i8 as i64));
        }
        if let Some(len) = tiny_size(marker, TINY_STRING) {
            return self.string(len);
        }
        if let Some(len) = tiny_size(marker, TINY_LIST) {
            return self.list(len);
        }
        if let Some(len) = tiny_size(marker, TINY_MAP) {
            return self.map(len);
        }
        if let Some(len) = tiny_size(marker, TINY_STRUCT) {
            return self.structure(len);
        }

        match marker {
            NULL => Ok(Value::Null),
            TRUE => Ok(Value::Boolean(true)),
            FALSE => Ok(Value::Boolean(false)),
            FLOAT_64 => {
                self.need(8)?;
                Ok(Value::Float(self.buf.get_f64()))
            }
            INT_8 => {
                self.need(1)?;
                Ok(Value::Integer(self.buf.get_i8() as i64))
            }
            INT_16 => {
                self.need(2)?;
                Ok(Value::Integer(self.buf.get_i16() as i64))
            }
            INT_32 => {
                self.need(4)?;
                Ok(Value::Integer(self.buf.get_i32() as i64))
            }
            INT_64 => {
                self.need(8)?;
                Ok(Value::Integer(self.buf.get_i64()))
            }
            BYTES_8 | BYTES_16 | BYTES_32 => {
                let len = self.size(marker - BYTES_8)?;
                self.need(len)?;
                let bytes = self.buf[..len].to_vec();
                self.buf.advance(len);
                Ok(Value::Bytes(bytes))
            }
            STRING_8 | STRING_16 | STRING_32 => {
                let len = self.size(marker - STRING_8)?;
                self.string(len)
            }
            LIST_8 | LIST_16 | LIST_32 => {
                let len = self.size(marker - LIST_8)?;
                self.list(len)
            }
            MAP_8 | MAP_16 | MAP_32 => {
                let len = self.size(marker - MAP_8)?;
                self.map(len)
            }
            STRUCT_8 | STRUCT_16 => {
                let len = self.size(marker - STRUCT_8)?;
                self.structure(len)
            }
            other => Err(PackStreamError::UnknownMarker(other)),
        }
    }

    /// Unpack a structure, failing if the next value is anything else.
    pub fn unpack_structure(&mut self) -> Result<Structure, PackStreamError> {
        match self.unpack()? {
            Value::Structure(s) => Ok(s),
            other => Err(PackStreamError::Unexpected {
                expected: "Structure",
                found: other.type_name(),
            }),
        }
    }

    fn need(&self, n: usize) -> Result<(), PackStreamError> {
        if self.buf.remaining() < n {
            Err(PackStreamError::UnexpectedEof)
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, PackStreamError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a size field whose width is picked by the marker's offset in its family.
    fn size(&mut self, width: u8) -> Result<usize, PackStreamError> {
        match width {
            0 => Ok(self.u8()? as usize),
            1 => {
                self.need(2)?;
                Ok(self.buf.get_u16() as usize)
            }
            _ => {
                self.need(4)?;
                Ok(self.buf.get_u32() as usize)
            }
        }
    }

    fn descend(&mut self) -> Result<(), PackStreamError> {
        if self.depth >= MAX_DEPTH {
            return Err(PackStreamError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    fn string(&mut self, len: usize) -> Result<Value, PackStreamError> {
        self.need(len)?;
        let text = std::str::from_utf8(&self.buf[..len])
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?
            .to_string();
        self.buf.advance(len);
        Ok(Value::String(text))
    }

    fn list(&mut self, len: usize) -> Result<Value, PackStreamError> {
        self.descend()?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.unpack()?);
        }
        self.depth -= 1;
        Ok(Value::List(items))
    }

    fn map(&mut self, len: usize) -> Result<Value, PackStreamError> {
        self.descend()?;
        let mut map = ValueMap::new();
        for _ in 0..len {
            let key = match self.unpack()? {
                Value::String(key) => key,
                _ => return Err(PackStreamError::InvalidMapKey),
            };
            let value = self.unpack()?;
            map.insert(key, value);
        }
        self.depth -= 1;
        Ok(Value::Map(map))
    }

    fn structure(&mut self, len: usize) -> Result<Value, PackStreamError> {
        self.descend()?;
        let tag = self.u8()?;
        let mut fields = Vec::with_capacity(len);
        for _ in 0..len {
            fields.push(self.unpack()?);
        }
        self.depth -= 1;
        Ok(Value::Structure(Structure::new(tag, fields)))
    }
}

/// Unpack exactly one value from `data`; trailing bytes are an error.
pub fn unpack(data: &[u8]) -> Result<Value, PackStreamError> {
    let mut unpacker = Unpacker::new(data);
    let value = unpacker.unpack()?;
    if unpacker.remaining() > 0 {
        return Err(PackStreamError::TrailingBytes(unpacker.remaining()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::packstream::pack;

    #[test]
    fn decodes_sized_markers() {
        assert_eq!(unpack(&[INT_16, 0x01, 0x00]).unwrap(), Value::Integer(256));
        assert_eq!(unpack(&[0xFF]).unwrap(), Value::Integer(-1));
        assert_eq!(
            unpack(&[STRING_8, 2, b'o', b'k']).unwrap(),
            Value::String("ok".into())
        );
        assert_eq!(unpack(&[BYTES_8, 1, 9]).unwrap(), Value::Bytes(vec![9]));
    }

    #[test]
    fn nested_message_survives_packing() {
        let mut extra = ValueMap::new();
        extra.insert("db".into(), "neo4j".into());
        extra.insert("bookmarks".into(), Value::List(vec!["bm:1".into()]));
        let value = Value::Structure(Structure::new(
            0x10,
            vec!["UNWIND range(1, 5) AS n RETURN n".into(), Value::Map(ValueMap::new()), Value::Map(extra)],
        ));
        let bytes = pack(&value).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), value);
    }

    #[test]
    fn truncated_input_is_eof() {
        assert!(matches!(unpack(&[INT_32, 0x00]), Err(PackStreamError::UnexpectedEof)));
        assert!(matches!(unpack(&[0x85, b'a']), Err(PackStreamError::UnexpectedEof)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(unpack(&[0xE0]), Err(PackStreamError::UnknownMarker(0xE0))));
        assert!(matches!(unpack(&[0xA1, 0x01, 0x01]), Err(PackStreamError::InvalidMapKey)));
        assert!(matches!(unpack(&[0x01, 0x02]), Err(PackStreamError::TrailingBytes(1))));

        let mut nested = vec![TINY_LIST | 1; MAX_DEPTH + 1];
        nested.push(NULL);
        assert!(matches!(unpack(&nested), Err(PackStreamError::TooDeep(MAX_DEPTH))));
        let ok = &nested[1..];
        assert!(unpack(ok).is_ok());
    }
}
