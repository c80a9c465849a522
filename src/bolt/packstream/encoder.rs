//! PackStream encoder.

use bytes::{BufMut, BytesMut};

use super::marker::*;
use super::types::{Structure, Value, ValueMap};
use super::PackStreamError;

/// Writes PackStream values onto the end of a borrowed buffer.
pub struct Packer<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> Packer<'a> {
    /// Pack into `buf`, appending after any existing content.
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Pack any value.
    pub fn pack(&mut self, value: &Value) -> Result<(), PackStreamError> {
        match value {
            Value::Null => self.buf.put_u8(NULL),
            Value::Boolean(true) => self.buf.put_u8(TRUE),
            Value::Boolean(false) => self.buf.put_u8(FALSE),
            Value::Integer(i) => self.pack_int(*i),
            Value::Float(x) => {
                self.buf.put_u8(FLOAT_64);
                self.buf.put_f64(*x);
            }
            Value::Bytes(b) => {
                // Bytes have no tiny form.
                let len = b.len();
                if len <= u8::MAX as usize {
                    self.buf.put_u8(BYTES_8);
                    self.buf.put_u8(len as u8);
                } else if len <= u16::MAX as usize {
                    self.buf.put_u8(BYTES_16);
                    self.buf.put_u16(len as u16);
                } else if len <= u32::MAX as usize {
                    self.buf.put_u8(BYTES_32);
                    self.buf.put_u32(len as u32);
                } else {
                    return Err(PackStreamError::TooLarge("bytes", len));
                }
                self.buf.put_slice(b);
            }
            Value::String(s) => self.pack_str(s)?,
            Value::List(items) => {
                self.pack_header(items.len(), TINY_LIST, [LIST_8, LIST_16, LIST_32], "list")?;
                for item in items {
                    self.pack(item)?;
                }
            }
            Value::Map(map) => self.pack_map(map)?,
            Value::Structure(s) => self.pack_structure(s)?,
        }
        Ok(())
    }

    /// Pack an integer in the smallest width that holds it.
    pub fn pack_int(&mut self, value: i64) {
        if TINY_INT_RANGE.contains(&value) {
            self.buf.put_i8(value as i8);
        } else if let Ok(v) = i8::try_from(value) {
            self.buf.put_u8(INT_8);
            self.buf.put_i8(v);
        } else if let Ok(v) = i16::try_from(value) {
            self.buf.put_u8(INT_16);
            self.buf.put_i16(v);
        } else if let Ok(v) = i32::try_from(value) {
            self.buf.put_u8(INT_32);
            self.buf.put_i32(v);
        } else {
            self.buf.put_u8(INT_64);
            self.buf.put_i64(value);
        }
    }

    pub fn pack_str(&mut self, value: &str) -> Result<(), PackStreamError> {
        self.pack_header(value.len(), TINY_STRING, [STRING_8, STRING_16, STRING_32], "string")?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn pack_map(&mut self, map: &ValueMap) -> Result<(), PackStreamError> {
        self.pack_header(map.len(), TINY_MAP, [MAP_8, MAP_16, MAP_32], "map")?;
        for (key, value) in map {
            self.pack_str(key)?;
            self.pack(value)?;
        }
        Ok(())
    }

    pub fn pack_structure(&mut self, s: &Structure) -> Result<(), PackStreamError> {
        self.pack_structure_header(s.fields.len(), s.tag)?;
        for field in &s.fields {
            self.pack(field)?;
        }
        Ok(())
    }

    /// Marker and signature of a structure with `fields` fields.
    pub fn pack_structure_header(&mut self, fields: usize, tag: u8) -> Result<(), PackStreamError> {
        if fields <= TINY_MAX {
            self.buf.put_u8(TINY_STRUCT | fields as u8);
        } else if fields <= u8::MAX as usize {
            self.buf.put_u8(STRUCT_8);
            self.buf.put_u8(fields as u8);
        } else if fields <= u16::MAX as usize {
            self.buf.put_u8(STRUCT_16);
            self.buf.put_u16(fields as u16);
        } else {
            return Err(PackStreamError::TooLarge("structure", fields));
        }
        self.buf.put_u8(tag);
        Ok(())
    }

    fn pack_header(
        &mut self,
        size: usize,
        tiny: u8,
        [m8, m16, m32]: [u8; 3],
        kind: &'static str,
    ) -> Result<(), PackStreamError> {
        if size <= TINY_MAX {
            self.buf.put_u8(tiny | size as u8);
        } else if size <= u8::MAX as usize {
            self.buf.put_u8(m8);
            self.buf.put_u8(size as u8);
        } else if size <= u16::MAX as usize {
            self.buf.put_u8(m16);
            self.buf.put_u16(size as u16);
        } else if size <= u32::MAX as usize {
            self.buf.put_u8(m32);
            self.buf.put_u32(size as u32);
        } else {
            return Err(PackStreamError::TooLarge(kind, size));
        }
        Ok(())
    }
}

/// Pack a single value into a fresh buffer.
pub fn pack(value: &Value) -> Result<BytesMut, PackStreamError> {
    let mut buf = BytesMut::with_capacity(64);
    Packer::new(&mut buf).pack(value)?;
    Ok(buf)
}
