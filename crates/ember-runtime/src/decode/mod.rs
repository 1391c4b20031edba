//! Leading-scalar decoders for JSON, MessagePack and CBOR.
//!
//! Each decoder reads exactly one self-describing scalar token (null, bool,
//! integer, float) from the start of a buffer and ignores whatever follows.
//! Composite and string tokens are rejected rather than skipped. Decoding is
//! synchronous, bounded by the token length, and never touches the arena.

use ember_value::Value;

pub mod cbor;
pub mod json;
pub mod msgpack;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    MsgPack,
    Cbor,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Json, Format::MsgPack, Format::Cbor];

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::MsgPack => "msgpack",
            Format::Cbor => "cbor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "json" => Some(Format::Json),
            "msgpack" => Some(Format::MsgPack),
            "cbor" => Some(Format::Cbor),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decoded {
    pub value: Value,
    /// Bytes consumed by the scalar token, leading whitespace included.
    pub consumed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty input")]
    Empty,
    #[error("truncated input: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("leading token 0x{0:02x} is not a scalar")]
    NotScalar(u8),
    #[error("malformed input: {0}")]
    Invalid(&'static str),
    #[error("integer does not fit in 64 bits")]
    Overflow,
}

pub trait ScalarDecoder {
    const FORMAT: Format;

    fn decode(buf: &[u8]) -> Result<Decoded, DecodeError>;
}

pub fn decode(format: Format, buf: &[u8]) -> Result<Decoded, DecodeError> {
    match format {
        Format::Json => json::Json::decode(buf),
        Format::MsgPack => msgpack::MsgPack::decode(buf),
        Format::Cbor => cbor::Cbor::decode(buf),
    }
}

/// Status-flag form of [`decode`]. On failure the value is `None` and carries
/// no meaning.
pub fn parse_scalar(format: Format, buf: &[u8]) -> (bool, Value) {
    match decode(format, buf) {
        Ok(d) => (true, d.value),
        Err(_) => (false, Value::None),
    }
}

/// Returns the `n` bytes at `off`, or `Truncated` if the buffer ends early.
pub(crate) fn take(buf: &[u8], off: usize, n: usize) -> Result<&[u8], DecodeError> {
    let end = off.checked_add(n).ok_or(DecodeError::Overflow)?;
    buf.get(off..end).ok_or(DecodeError::Truncated {
        needed: end,
        available: buf.len(),
    })
}
