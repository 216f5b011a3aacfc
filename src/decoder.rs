//! Raw byte decoding for tag values
//!
//! Pure functions that turn the bytes returned by a driver into typed
//! [`Value`]s, and the inverse encoder used when writing tags.
//!
//! ```ignore
//! let spec = TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32)?;
//! assert_eq!(decode(&[0x42, 0x48, 0x00, 0x00], &spec)?, Value::Float(50.0));
//! ```

use crate::error::DecodeError;
use crate::types::{ByteOrder, DataType, TagSpec, Value};

/// Decode a tag from bytes starting at the tag's own byte offset
///
/// This is what [`Driver::read_block`](crate::backend::Driver::read_block)
/// returns when asked for exactly the tag's bytes. Multi-byte values are
/// big-endian.
pub fn decode(raw: &[u8], spec: &TagSpec) -> Result<Value, DecodeError> {
    decode_with(raw, spec, ByteOrder::BigEndian)
}

/// Decode a tag from a block buffer whose first byte sits at `buffer_start`
pub fn decode_at(buffer: &[u8], buffer_start: usize, spec: &TagSpec) -> Result<Value, DecodeError> {
    decode_at_with(buffer, buffer_start, spec, ByteOrder::BigEndian)
}

/// Like [`decode_at`] with an explicit byte order
pub fn decode_at_with(
    buffer: &[u8],
    buffer_start: usize,
    spec: &TagSpec,
    order: ByteOrder,
) -> Result<Value, DecodeError> {
    let needed = spec.size();
    let Some(rel) = spec.byte_offset().checked_sub(buffer_start) else {
        return Err(DecodeError::BufferTooShort {
            needed,
            available: 0,
        });
    };
    let available = buffer.len().saturating_sub(rel);
    if available < needed {
        return Err(DecodeError::BufferTooShort { needed, available });
    }
    decode_with(&buffer[rel..], spec, order)
}

/// Decode a tag from tag-relative bytes with an explicit byte order
pub fn decode_with(raw: &[u8], spec: &TagSpec, order: ByteOrder) -> Result<Value, DecodeError> {
    let data_type = spec.data_type();
    if !data_type.is_scalar() {
        return Err(DecodeError::UnsupportedType(data_type));
    }

    let needed = data_type.size_bytes();
    if raw.len() < needed {
        return Err(DecodeError::BufferTooShort {
            needed,
            available: raw.len(),
        });
    }

    let mut buf = [0u8; 8];
    buf[..needed].copy_from_slice(&raw[..needed]);
    if order == ByteOrder::LittleEndian {
        buf[..needed].reverse();
    }
    // buf now holds the value big-endian in its first `needed` bytes

    let value = match data_type {
        DataType::Bool => Value::Bool((buf[0] >> spec.bit_offset()) & 1 == 1),
        DataType::Byte => Value::Int(buf[0] as i64),
        DataType::Word => Value::Int(u16::from_be_bytes([buf[0], buf[1]]) as i64),
        DataType::DWord => {
            Value::Int(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64)
        }
        DataType::Int16 => Value::Int(i16::from_be_bytes([buf[0], buf[1]]) as i64),
        DataType::Int32 => {
            Value::Int(i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64)
        }
        DataType::Real32 => {
            Value::Float(f32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64)
        }
        DataType::Real64 => Value::Float(f64::from_be_bytes(buf)),
        DataType::Raw(_) => return Err(DecodeError::UnsupportedType(data_type)),
    };
    Ok(value)
}

/// Encode a value into the wire bytes for `spec`
///
/// For BOOL tags this returns a byte with only the tag's bit set (or
/// clear); callers that must preserve neighbouring bits combine it with
/// the current byte via [`merge_bit`]. Returns `None` when the value does
/// not fit the tag's type.
pub fn encode(value: &Value, spec: &TagSpec, order: ByteOrder) -> Option<Vec<u8>> {
    let mut bytes = match (spec.data_type(), value) {
        (DataType::Bool, Value::Bool(b)) => vec![(*b as u8) << spec.bit_offset()],
        (DataType::Bool, Value::Int(i)) if *i == 0 || *i == 1 => {
            vec![(*i as u8) << spec.bit_offset()]
        }
        (DataType::Byte, Value::Int(i)) => vec![u8::try_from(*i).ok()?],
        (DataType::Word, Value::Int(i)) => u16::try_from(*i).ok()?.to_be_bytes().to_vec(),
        (DataType::DWord, Value::Int(i)) => u32::try_from(*i).ok()?.to_be_bytes().to_vec(),
        (DataType::Int16, Value::Int(i)) => i16::try_from(*i).ok()?.to_be_bytes().to_vec(),
        (DataType::Int32, Value::Int(i)) => i32::try_from(*i).ok()?.to_be_bytes().to_vec(),
        (DataType::Real32, Value::Float(v)) => (*v as f32).to_be_bytes().to_vec(),
        (DataType::Real32, Value::Int(i)) => (*i as f32).to_be_bytes().to_vec(),
        (DataType::Real64, Value::Float(v)) => v.to_be_bytes().to_vec(),
        (DataType::Real64, Value::Int(i)) => (*i as f64).to_be_bytes().to_vec(),
        _ => return None,
    };
    if order == ByteOrder::LittleEndian && spec.data_type() != DataType::Bool {
        bytes.reverse();
    }
    Some(bytes)
}

/// Set or clear `bit` in `current`, leaving the other bits untouched
pub fn merge_bit(current: u8, bit: u8, set: bool) -> u8 {
    let mask = 1u8 << (bit & 7);
    if set {
        current | mask
    } else {
        current & !mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Area;

    fn tag(data_type: DataType) -> TagSpec {
        TagSpec::new("t", Area::DataBlock, 1, 0, data_type).unwrap()
    }

    #[test]
    fn test_decode_tank_level_real32() {
        let spec = TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        assert_eq!(
            decode(&[0x42, 0x48, 0x00, 0x00], &spec).unwrap(),
            Value::Float(50.0)
        );
    }

    #[test]
    fn test_decode_pump_on_bool() {
        let spec = TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap();
        assert_eq!(decode(&[0x01], &spec).unwrap(), Value::Bool(true));
        assert_eq!(decode(&[0xFE], &spec).unwrap(), Value::Bool(false));

        let bit7 = TagSpec::new_bool("High", Area::DataBlock, 1, 4, 7).unwrap();
        assert_eq!(decode(&[0x80], &bit7).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode(&[0xFF], &tag(DataType::Byte)).unwrap(), Value::Int(255));
        assert_eq!(
            decode(&[0xFF, 0xFE], &tag(DataType::Word)).unwrap(),
            Value::Int(65534)
        );
        assert_eq!(
            decode(&[0xFF, 0xFE], &tag(DataType::Int16)).unwrap(),
            Value::Int(-2)
        );
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF, 0xFF], &tag(DataType::DWord)).unwrap(),
            Value::Int(u32::MAX as i64)
        );
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF, 0xFF], &tag(DataType::Int32)).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_decode_real64() {
        let bytes = 1234.5f64.to_be_bytes();
        assert_eq!(
            decode(&bytes, &tag(DataType::Real64)).unwrap(),
            Value::Float(1234.5)
        );
    }

    #[test]
    fn test_decode_little_endian() {
        assert_eq!(
            decode_with(&[0x00, 0x00, 0x48, 0x42], &tag(DataType::Real32), ByteOrder::LittleEndian)
                .unwrap(),
            Value::Float(50.0)
        );
        assert_eq!(
            decode_with(&[0x34, 0x12], &tag(DataType::Word), ByteOrder::LittleEndian).unwrap(),
            Value::Int(0x1234)
        );
    }

    #[test]
    fn test_decode_buffer_too_short() {
        assert_eq!(
            decode(&[0x42, 0x48], &tag(DataType::Real32)),
            Err(DecodeError::BufferTooShort {
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_raw_is_unsupported() {
        assert_eq!(
            decode(&[0; 8], &tag(DataType::Raw(8))),
            Err(DecodeError::UnsupportedType(DataType::Raw(8)))
        );
    }

    #[test]
    fn test_decode_at_block_buffer() {
        // DB1 bytes 0..6: TankLevel REAL at 0, PumpOn bit 0 at 4
        let block = [0x42, 0x48, 0x00, 0x00, 0x01, 0x00];
        let level = TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        let pump = TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap();
        assert_eq!(decode_at(&block, 0, &level).unwrap(), Value::Float(50.0));
        assert_eq!(decode_at(&block, 0, &pump).unwrap(), Value::Bool(true));

        // Buffer starting after the tag
        assert!(matches!(
            decode_at(&block, 2, &level),
            Err(DecodeError::BufferTooShort { .. })
        ));
        // Tag runs past the end of the buffer
        let late = TagSpec::new("Late", Area::DataBlock, 1, 4, DataType::Real32).unwrap();
        assert_eq!(
            decode_at(&block, 0, &late),
            Err(DecodeError::BufferTooShort {
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_encode_values() {
        let level = tag(DataType::Real32);
        assert_eq!(
            encode(&Value::Float(50.0), &level, ByteOrder::BigEndian).unwrap(),
            vec![0x42, 0x48, 0x00, 0x00]
        );
        assert_eq!(
            encode(&Value::Int(-2), &tag(DataType::Int16), ByteOrder::BigEndian).unwrap(),
            vec![0xFF, 0xFE]
        );
        assert!(encode(&Value::Int(70000), &tag(DataType::Int16), ByteOrder::BigEndian).is_none());
        assert!(encode(&Value::Float(1.5), &tag(DataType::Word), ByteOrder::BigEndian).is_none());
        assert!(encode(&Value::Int(1), &tag(DataType::Raw(4)), ByteOrder::BigEndian).is_none());

        let bit3 = TagSpec::new_bool("b", Area::Marker, 0, 0, 3).unwrap();
        assert_eq!(
            encode(&Value::Bool(true), &bit3, ByteOrder::BigEndian).unwrap(),
            vec![0x08]
        );
    }

    #[test]
    fn test_merge_bit() {
        assert_eq!(merge_bit(0b1010_0000, 0, true), 0b1010_0001);
        assert_eq!(merge_bit(0b1010_0001, 5, false), 0b1000_0001);
        assert_eq!(merge_bit(0xFF, 7, true), 0xFF);
    }

    use proptest::prelude::*;

    fn any_scalar() -> impl Strategy<Value = DataType> {
        prop_oneof![
            Just(DataType::Byte),
            Just(DataType::Word),
            Just(DataType::DWord),
            Just(DataType::Int16),
            Just(DataType::Int32),
            Just(DataType::Real32),
            Just(DataType::Real64),
        ]
    }

    proptest! {
        #[test]
        fn test_decode_is_deterministic(
            data_type in any_scalar(),
            bytes in prop::collection::vec(any::<u8>(), 8..16)
        ) {
            let spec = tag(data_type);
            let first = decode(&bytes, &spec);
            let second = decode(&bytes, &spec);
            // compare bit patterns so NaN payloads count as equal
            match (first, second) {
                (Ok(Value::Float(a)), Ok(Value::Float(b))) => prop_assert_eq!(a.to_bits(), b.to_bits()),
                (a, b) => prop_assert_eq!(a, b),
            }
        }

        #[test]
        fn test_decode_at_matches_tag_relative_decode(
            data_type in any_scalar(),
            buffer in prop::collection::vec(any::<u8>(), 16..64),
            offset in 0usize..8
        ) {
            let spec = TagSpec::new("t", Area::DataBlock, 1, 100 + offset, data_type).unwrap();
            let via_block = decode_at(&buffer, 100, &spec);
            let direct = decode(&buffer[offset..], &spec);
            match (via_block, direct) {
                (Ok(Value::Float(a)), Ok(Value::Float(b))) => prop_assert_eq!(a.to_bits(), b.to_bits()),
                (a, b) => prop_assert_eq!(a, b),
            }
        }

        #[test]
        fn test_integer_encode_decode_agree(v in any::<i16>(), little in any::<bool>()) {
            let order = if little { ByteOrder::LittleEndian } else { ByteOrder::BigEndian };
            let spec = tag(DataType::Int16);
            let bytes = encode(&Value::Int(v as i64), &spec, order).unwrap();
            prop_assert_eq!(decode_with(&bytes, &spec, order).unwrap(), Value::Int(v as i64));
        }
    }
}
