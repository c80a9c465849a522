//! PackStream marker bytes.
//!
//! Every encoded value starts with a marker byte. Small containers and
//! integers pack their size (or value) into the marker itself; larger ones
//! follow the marker with an 8, 16 or 32-bit big-endian size.

pub const NULL: u8 = 0xC0;
pub const FLOAT_64: u8 = 0xC1;
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

pub const BYTES_8: u8 = 0xCC;
pub const BYTES_16: u8 = 0xCD;
pub const BYTES_32: u8 = 0xCE;

pub const TINY_STRING: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;

pub const TINY_LIST: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;

pub const TINY_MAP: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;

pub const TINY_STRUCT: u8 = 0xB0;
pub const STRUCT_8: u8 = 0xDC;
pub const STRUCT_16: u8 = 0xDD;

/// Largest size that fits in a tiny marker's low nibble.
pub const TINY_MAX: usize = 0x0F;

/// Range of integers encoded directly as the marker byte.
pub const TINY_INT_RANGE: std::ops::RangeInclusive<i64> = -16..=127;

/// Size of a tiny container if `marker` belongs to the family starting at `base`.
#[inline]
pub fn tiny_size(marker: u8, base: u8) -> Option<usize> {
    if marker & 0xF0 == base {
        Some((marker & 0x0F) as usize)
    } else {
        None
    }
}

/// Whether `marker` is itself a tiny integer.
#[inline]
pub fn is_tiny_int(marker: u8) -> bool {
    marker < 0x80 || marker >= 0xF0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_size_matches_only_its_family() {
        assert_eq!(tiny_size(0x83, TINY_STRING), Some(3));
        assert_eq!(tiny_size(0xB1, TINY_STRUCT), Some(1));
        assert_eq!(tiny_size(0x93, TINY_STRING), None);
        assert_eq!(tiny_size(0xAF, TINY_MAP), Some(TINY_MAX));
    }

    #[test]
    fn tiny_int_markers() {
        assert!(is_tiny_int(0x00));
        assert!(is_tiny_int(0x7F));
        assert!(is_tiny_int(0xF0));
        assert!(!is_tiny_int(NULL));
        assert!(!is_tiny_int(TINY_STRING));
    }
}
