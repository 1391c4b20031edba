use ember_value::Value;
use rmp::decode::{self as rmpd, NumValueReadError, ValueReadError};
use rmp::Marker;

use super::{take, DecodeError, Decoded, Format, ScalarDecoder};

pub struct MsgPack;

impl ScalarDecoder for MsgPack {
    const FORMAT: Format = Format::MsgPack;

    fn decode(buf: &[u8]) -> Result<Decoded, DecodeError> {
        let Some(&first) = buf.first() else {
            return Err(DecodeError::Empty);
        };
        let marker = Marker::from_u8(first);
        take(buf, 1, payload_len(marker))?;
        let mut rd = buf;
        let value = match marker {
            Marker::Null => {
                rmpd::read_nil(&mut rd).map_err(read_failed)?;
                Value::None
            }
            Marker::True | Marker::False => Value::Bool(rmpd::read_bool(&mut rd).map_err(read_failed)?),
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => {
                let i = rmpd::read_int::<i64, _>(&mut rd).map_err(|e| match e {
                    NumValueReadError::OutOfRange => DecodeError::Overflow,
                    _ => DecodeError::Invalid("msgpack integer"),
                })?;
                Value::Int(i)
            }
            Marker::F32 => Value::Float(rmpd::read_f32(&mut rd).map_err(read_failed)? as f64),
            Marker::F64 => Value::Float(rmpd::read_f64(&mut rd).map_err(read_failed)?),
            // fixmap, fixarray, fixstr, never-used 0xc1, bin, ext, str, array, map.
            _ => return Err(DecodeError::NotScalar(first)),
        };
        Ok(Decoded {
            value,
            consumed: buf.len() - rd.len(),
        })
    }
}

/// Bytes that follow the marker of a scalar.
fn payload_len(marker: Marker) -> usize {
    match marker {
        Marker::U8 | Marker::I8 => 1,
        Marker::U16 | Marker::I16 => 2,
        Marker::U32 | Marker::I32 | Marker::F32 => 4,
        Marker::U64 | Marker::I64 | Marker::F64 => 8,
        _ => 0,
    }
}

fn read_failed<E: rmp::decode::RmpReadErr>(_: ValueReadError<E>) -> DecodeError {
    DecodeError::Invalid("msgpack read")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(b: &[u8]) -> Value {
        MsgPack::decode(b).unwrap().value
    }

    #[test]
    fn single_byte_markers() {
        assert_eq!(ok(&[0xc0]), Value::None);
        assert_eq!(ok(&[0xc2]), Value::Bool(false));
        assert_eq!(ok(&[0xc3]), Value::Bool(true));
        assert_eq!(ok(&[0x05]), Value::Int(5));
        assert_eq!(ok(&[0x7f]), Value::Int(127));
        assert_eq!(ok(&[0xff]), Value::Int(-1));
        assert_eq!(ok(&[0xe0]), Value::Int(-32));
    }

    #[test]
    fn sized_integers_are_big_endian() {
        assert_eq!(ok(&[0xcc, 0xff]), Value::Int(255));
        assert_eq!(ok(&[0xcd, 0x01, 0x00]), Value::Int(256));
        assert_eq!(ok(&[0xce, 0x00, 0x01, 0x00, 0x00]), Value::Int(65536));
        assert_eq!(ok(&[0xd0, 0x80]), Value::Int(-128));
        assert_eq!(ok(&[0xd1, 0xff, 0x00]), Value::Int(-256));
        assert_eq!(ok(&[0xd2, 0xff, 0xff, 0xff, 0xfe]), Value::Int(-2));
        assert_eq!(
            ok(&[0xd3, 0x80, 0, 0, 0, 0, 0, 0, 0]),
            Value::Int(i64::MIN)
        );
        assert_eq!(
            ok(&[0xcf, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
            Value::Int(i64::MAX)
        );
    }

    #[test]
    fn uint64_beyond_i64_fails() {
        assert_eq!(
            MsgPack::decode(&[0xcf, 0x80, 0, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::Overflow)
        );
    }

    #[test]
    fn floats() {
        let mut b = vec![0xcb];
        b.extend_from_slice(&(-3.5f64).to_be_bytes());
        assert_eq!(ok(&b), Value::Float(-3.5));
        let mut b = vec![0xca];
        b.extend_from_slice(&(0.5f32).to_be_bytes());
        assert_eq!(ok(&b), Value::Float(0.5));
    }

    #[test]
    fn truncation_and_trailing_bytes() {
        assert_eq!(
            MsgPack::decode(&[0xcd, 0x01]),
            Err(DecodeError::Truncated {
                needed: 3,
                available: 2
            })
        );
        assert!(matches!(
            MsgPack::decode(&[0xcb, 0, 0]),
            Err(DecodeError::Truncated { .. })
        ));
        let d = MsgPack::decode(&[0xcc, 0x10, 0xc0, 0xc0]).unwrap();
        assert_eq!(d.value, Value::Int(16));
        assert_eq!(d.consumed, 2);
    }

    #[test]
    fn containers_and_strings_are_rejected() {
        for marker in [0x80, 0x90, 0xa1, 0xc1, 0xc4, 0xd4, 0xd9, 0xdc, 0xde] {
            assert_eq!(
                MsgPack::decode(&[marker, 0, 0, 0, 0]),
                Err(DecodeError::NotScalar(marker))
            );
        }
    }
}
