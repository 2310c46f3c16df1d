//! Typed-value ↔ byte-buffer conversion.
//!
//! The [`Serializer`] collects typed writes into an internal buffer released
//! by [`Serializer::finish`]; the [`Deserializer`] consumes a buffer handed to
//! it at construction. Composite values are made self-describing on the wire
//! through the structural tokens (`begin_struct`, `begin_array`, ...), so both
//! peers only need to agree on the member's schema, not exchange it.
//!
//! Integers carry an explicit bit width to support sub-byte packing: fields
//! narrower than a byte pack contiguously LSB-first, while every byte-wide or
//! dynamically sized value starts on a byte boundary. Container lengths and
//! union indices are always 32-bit on the wire regardless of host word size.

mod deserializer;
mod serializer;

pub use deserializer::Deserializer;
pub use serializer::Serializer;

/// Wire type of array lengths, union indices and string/byte lengths.
pub(crate) type SizeType = u32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("buffer ended in the middle of a value")]
    UnexpectedEnd,
    #[error("invalid bit width {bits} for a {width}-bit value")]
    InvalidBitWidth { bits: u32, width: u32 },
    #[error("boolean byte must be 0 or 1, got {0}")]
    InvalidBool(u8),
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("union index 0 is reserved (indices are 1-based)")]
    InvalidUnionIndex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip_bit_for_bit() {
        let mut ser = Serializer::new();
        ser.write_u8(0x2A, 8);
        ser.write_i16(-1234, 16);
        ser.write_u32(0xDEAD_BEEF, 32);
        ser.write_i64(i64::MIN, 64);
        ser.write_bool(true);
        ser.write_f32(1.5);
        ser.write_f64(-0.25);
        ser.write_string("grün");
        ser.write_bytes(&[0x00, 0xFF, 0x7F]);
        let buf = ser.finish();

        let mut de = Deserializer::new(buf);
        assert_eq!(de.read_u8(8).unwrap(), 0x2A);
        assert_eq!(de.read_i16(16).unwrap(), -1234);
        assert_eq!(de.read_u32(32).unwrap(), 0xDEAD_BEEF);
        assert_eq!(de.read_i64(64).unwrap(), i64::MIN);
        assert!(de.read_bool().unwrap());
        assert_eq!(de.read_f32().unwrap(), 1.5);
        assert_eq!(de.read_f64().unwrap(), -0.25);
        assert_eq!(de.read_string().unwrap(), "grün");
        assert_eq!(de.read_bytes().unwrap(), vec![0x00, 0xFF, 0x7F]);
        assert!(de.is_empty());
    }

    #[test]
    fn sub_byte_fields_pack_into_a_single_byte() {
        let mut ser = Serializer::new();
        ser.write_u8(0b101, 3);
        ser.write_u8(0b01, 2);
        ser.write_u8(0b110, 3);
        let buf = ser.finish();
        // LSB-first: 3 + 2 + 3 bits fill exactly one byte.
        assert_eq!(buf, vec![0b110_01_101]);

        let mut de = Deserializer::new(buf);
        assert_eq!(de.read_u8(3).unwrap(), 0b101);
        assert_eq!(de.read_u8(2).unwrap(), 0b01);
        assert_eq!(de.read_u8(3).unwrap(), 0b110);
    }

    #[test]
    fn aligned_values_pad_partial_bytes() {
        let mut ser = Serializer::new();
        ser.write_u8(0b1, 1);
        ser.write_u8(0xAB, 8); // full byte realigns
        let buf = ser.finish();
        assert_eq!(buf, vec![0b0000_0001, 0xAB]);

        let mut de = Deserializer::new(buf);
        assert_eq!(de.read_u8(1).unwrap(), 1);
        assert_eq!(de.read_u8(8).unwrap(), 0xAB);
    }

    #[test]
    fn signed_sub_byte_values_sign_extend() {
        let mut ser = Serializer::new();
        ser.write_i8(-3, 4);
        ser.write_i32(-100, 12);
        let buf = ser.finish();

        let mut de = Deserializer::new(buf);
        assert_eq!(de.read_i8(4).unwrap(), -3);
        assert_eq!(de.read_i32(12).unwrap(), -100);
    }

    #[test]
    fn int32_wire_layout_is_little_endian() {
        let mut ser = Serializer::new();
        ser.write_i32(1, 32);
        assert_eq!(ser.finish(), vec![0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn structural_tokens_round_trip() {
        let mut ser = Serializer::new();
        ser.begin_struct();
        ser.begin_array(2);
        ser.write_u16(7, 16);
        ser.write_u16(9, 16);
        ser.end_array();
        ser.begin_optional(true);
        ser.write_string("present");
        ser.end_optional();
        ser.begin_optional(false);
        ser.end_optional();
        ser.begin_union(2);
        ser.write_u8(5, 8);
        ser.end_union();
        ser.end_struct();
        let buf = ser.finish();

        let mut de = Deserializer::new(buf);
        de.begin_struct();
        assert_eq!(de.begin_array().unwrap(), 2);
        assert_eq!(de.read_u16(16).unwrap(), 7);
        assert_eq!(de.read_u16(16).unwrap(), 9);
        de.end_array();
        assert!(de.begin_optional().unwrap());
        assert_eq!(de.read_string().unwrap(), "present");
        de.end_optional();
        assert!(!de.begin_optional().unwrap());
        de.end_optional();
        assert_eq!(de.begin_union().unwrap(), 2);
        assert_eq!(de.read_u8(8).unwrap(), 5);
        de.end_union();
        de.end_struct();
        assert!(de.is_empty());
    }

    #[test]
    fn truncated_buffer_fails_cleanly() {
        let mut de = Deserializer::new(vec![0x01, 0x00]);
        assert_eq!(
            de.read_u32(32).unwrap_err(),
            SerializationError::UnexpectedEnd
        );
    }

    #[test]
    fn invalid_bool_byte_is_rejected() {
        let mut de = Deserializer::new(vec![2]);
        assert_eq!(de.read_bool().unwrap_err(), SerializationError::InvalidBool(2));
    }

    #[test]
    fn empty_value_serializes_to_an_empty_buffer() {
        let ser = Serializer::new();
        assert!(ser.finish().is_empty());
    }
}
