use ember_value::Value;
use serde::Deserialize;
use serde_cbor::Value as CborValue;

use super::{take, DecodeError, Decoded, Format, ScalarDecoder};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_SIMPLE: u8 = 7;

pub struct Cbor;

impl ScalarDecoder for Cbor {
    const FORMAT: Format = Format::Cbor;

    fn decode(buf: &[u8]) -> Result<Decoded, DecodeError> {
        let Some(&initial) = buf.first() else {
            return Err(DecodeError::Empty);
        };
        // byte string, text, array, map, tag
        if !matches!(initial >> 5, MAJOR_UNSIGNED | MAJOR_NEGATIVE | MAJOR_SIMPLE) {
            return Err(DecodeError::NotScalar(initial));
        }
        let info = initial & 0x1f;
        if let 24..=27 = info {
            take(buf, 1, 1usize << (info - 24))?;
        }
        // Only the head item is read; trailing bytes are left alone.
        let mut de = serde_cbor::Deserializer::from_slice(buf);
        let item = CborValue::deserialize(&mut de)
            .map_err(|_| DecodeError::Invalid("malformed cbor head"))?;
        let value = match item {
            CborValue::Null => Value::None,
            CborValue::Bool(b) => Value::Bool(b),
            CborValue::Integer(i) => Value::Int(i64::try_from(i).map_err(|_| DecodeError::Overflow)?),
            CborValue::Float(x) => Value::Float(x),
            _ => return Err(DecodeError::NotScalar(initial)),
        };
        Ok(Decoded {
            value,
            consumed: de.byte_offset(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(b: &[u8]) -> Value {
        Cbor::decode(b).unwrap().value
    }

    #[test]
    fn simple_values() {
        assert_eq!(ok(&[0xf6]), Value::None);
        assert_eq!(ok(&[0xf7]), Value::None);
        assert_eq!(ok(&[0xf4]), Value::Bool(false));
        assert_eq!(ok(&[0xf5]), Value::Bool(true));
    }

    #[test]
    fn integers() {
        assert_eq!(ok(&[0x00]), Value::Int(0));
        assert_eq!(ok(&[0x17]), Value::Int(23));
        assert_eq!(ok(&[0x18, 0x18]), Value::Int(24));
        assert_eq!(ok(&[0x19, 0x03, 0xe8]), Value::Int(1000));
        assert_eq!(ok(&[0x1a, 0x00, 0x0f, 0x42, 0x40]), Value::Int(1_000_000));
        assert_eq!(ok(&[0x20]), Value::Int(-1));
        assert_eq!(ok(&[0x38, 0x63]), Value::Int(-100));
        assert_eq!(
            ok(&[0x3b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
            Value::Int(i64::MIN)
        );
    }

    #[test]
    fn integers_beyond_i64_fail() {
        assert_eq!(
            Cbor::decode(&[0x1b, 0x80, 0, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::Overflow)
        );
        assert_eq!(
            Cbor::decode(&[0x3b, 0x80, 0, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::Overflow)
        );
    }

    #[test]
    fn floats_of_every_width() {
        assert_eq!(ok(&[0xf9, 0x3c, 0x00]), Value::Float(1.0));
        assert_eq!(ok(&[0xf9, 0xc4, 0x00]), Value::Float(-4.0));
        assert_eq!(ok(&[0xf9, 0x00, 0x01]), Value::Float(2f64.powi(-24)));
        assert_eq!(ok(&[0xf9, 0x7c, 0x00]), Value::Float(f64::INFINITY));
        assert!(ok(&[0xf9, 0x7e, 0x00]).as_float().unwrap().is_nan());
        assert_eq!(ok(&[0xfa, 0x47, 0xc3, 0x50, 0x00]), Value::Float(100000.0));
        assert_eq!(
            ok(&[0xfb, 0x3f, 0xf1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9a]),
            Value::Float(1.1)
        );
    }

    #[test]
    fn non_scalars_fail() {
        assert_eq!(Cbor::decode(&[0x80]), Err(DecodeError::NotScalar(0x80)));
        assert_eq!(Cbor::decode(&[0xa0]), Err(DecodeError::NotScalar(0xa0)));
        assert_eq!(Cbor::decode(&[0x40]), Err(DecodeError::NotScalar(0x40)));
        assert_eq!(Cbor::decode(&[0x61, b'a']), Err(DecodeError::NotScalar(0x61)));
        assert_eq!(Cbor::decode(&[0xc1, 0x00]), Err(DecodeError::NotScalar(0xc1)));
    }

    #[test]
    fn malformed_heads() {
        assert!(matches!(
            Cbor::decode(&[0x19, 0x01]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            Cbor::decode(&[0xfb, 0x00]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(Cbor::decode(&[0x1c]), Err(DecodeError::Invalid(_))));
        assert!(matches!(Cbor::decode(&[0x1f]), Err(DecodeError::Invalid(_))));
        assert!(matches!(Cbor::decode(&[0xff]), Err(DecodeError::Invalid(_))));
        assert!(matches!(Cbor::decode(&[0xe0]), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let d = Cbor::decode(&[0x18, 0x64, 0xff, 0xff]).unwrap();
        assert_eq!(d.value, Value::Int(100));
        assert_eq!(d.consumed, 2);
    }
}
