use ember_value::Value;

use super::{DecodeError, Decoded, Format, ScalarDecoder};

pub struct Json;

impl ScalarDecoder for Json {
    const FORMAT: Format = Format::Json;

    fn decode(buf: &[u8]) -> Result<Decoded, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::Empty);
        }
        let start = buf
            .iter()
            .position(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
            .ok_or(DecodeError::Invalid("expected a value"))?;
        match buf[start] {
            b'n' => literal(buf, start, b"null", Value::None),
            b't' => literal(buf, start, b"true", Value::Bool(true)),
            b'f' => literal(buf, start, b"false", Value::Bool(false)),
            b'-' | b'0'..=b'9' => number(buf, start),
            b @ (b'{' | b'[' | b'"') => Err(DecodeError::NotScalar(b)),
            _ => Err(DecodeError::Invalid("unexpected character")),
        }
    }
}

/// Integer-only convenience: the leading token as an `i64`, or 0 when it is
/// missing, malformed, or not an integer.
pub fn parse_int(buf: &[u8]) -> i64 {
    match Json::decode(buf) {
        Ok(Decoded {
            value: Value::Int(i),
            ..
        }) => i,
        _ => 0,
    }
}

fn literal(buf: &[u8], start: usize, lit: &[u8], value: Value) -> Result<Decoded, DecodeError> {
    let rest = &buf[start..];
    if rest.starts_with(lit) {
        return Ok(Decoded {
            value,
            consumed: start + lit.len(),
        });
    }
    if lit.starts_with(rest) {
        return Err(DecodeError::Truncated {
            needed: start + lit.len(),
            available: buf.len(),
        });
    }
    Err(DecodeError::Invalid("bad literal"))
}

fn digits_from(buf: &[u8], mut i: usize) -> usize {
    while i < buf.len() && buf[i].is_ascii_digit() {
        i += 1;
    }
    i
}

fn require_digit(buf: &[u8], i: usize, what: &'static str) -> Result<(), DecodeError> {
    match buf.get(i) {
        None => Err(DecodeError::Truncated {
            needed: i + 1,
            available: buf.len(),
        }),
        Some(b) if b.is_ascii_digit() => Ok(()),
        Some(_) => Err(DecodeError::Invalid(what)),
    }
}

fn number(buf: &[u8], start: usize) -> Result<Decoded, DecodeError> {
    let mut i = start;
    let negative = buf[i] == b'-';
    if negative {
        i += 1;
    }
    require_digit(buf, i, "expected digit")?;
    let int_start = i;
    if buf[i] == b'0' {
        i += 1;
        if buf.get(i).is_some_and(|b| b.is_ascii_digit()) {
            return Err(DecodeError::Invalid("leading zero"));
        }
    } else {
        i = digits_from(buf, i);
    }
    let int_end = i;

    let mut is_float = false;
    if buf.get(i) == Some(&b'.') {
        require_digit(buf, i + 1, "expected fraction digit")?;
        i = digits_from(buf, i + 1);
        is_float = true;
    }
    if matches!(buf.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(buf.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        require_digit(buf, j, "expected exponent digit")?;
        i = digits_from(buf, j);
        is_float = true;
    }

    let value = if is_float {
        let f: f64 = lexical_core::parse(&buf[start..i])
            .map_err(|_| DecodeError::Invalid("bad float literal"))?;
        if !f.is_finite() {
            return Err(DecodeError::Overflow);
        }
        Value::Float(f)
    } else {
        Value::Int(parse_i64(&buf[int_start..int_end], negative)?)
    };
    Ok(Decoded { value, consumed: i })
}

// Accumulates toward the sign so i64::MIN is representable.
fn parse_i64(digits: &[u8], negative: bool) -> Result<i64, DecodeError> {
    let mut acc: i64 = 0;
    for &d in digits {
        let d = (d - b'0') as i64;
        acc = acc.checked_mul(10).ok_or(DecodeError::Overflow)?;
        acc = if negative {
            acc.checked_sub(d)
        } else {
            acc.checked_add(d)
        }
        .ok_or(DecodeError::Overflow)?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(s: &str) -> Value {
        Json::decode(s.as_bytes()).unwrap().value
    }

    fn err(s: &str) -> DecodeError {
        Json::decode(s.as_bytes()).unwrap_err()
    }

    #[test]
    fn literals() {
        assert_eq!(ok("null"), Value::None);
        assert_eq!(ok("true"), Value::Bool(true));
        assert_eq!(ok("false"), Value::Bool(false));
    }

    #[test]
    fn numbers() {
        assert_eq!(ok("42"), Value::Int(42));
        assert_eq!(ok("-3.5"), Value::Float(-3.5));
        assert_eq!(ok("0"), Value::Int(0));
        assert_eq!(ok("-0"), Value::Int(0));
        assert_eq!(ok("1E+2"), Value::Float(100.0));
        assert_eq!(ok("2.5e-1"), Value::Float(0.25));
        assert_eq!(ok("9223372036854775807"), Value::Int(i64::MAX));
        assert_eq!(ok("-9223372036854775808"), Value::Int(i64::MIN));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let d = Json::decode(b"  17, 18").unwrap();
        assert_eq!(d.value, Value::Int(17));
        assert_eq!(d.consumed, 4);
        assert_eq!(ok("null]"), Value::None);
        assert_eq!(ok("1.5xyz"), Value::Float(1.5));
    }

    #[test]
    fn composites_and_strings_are_not_scalars() {
        assert_eq!(err("{}"), DecodeError::NotScalar(b'{'));
        assert_eq!(err(" [1]"), DecodeError::NotScalar(b'['));
        assert_eq!(err("\"s\""), DecodeError::NotScalar(b'"'));
    }

    #[test]
    fn truncated_tokens() {
        assert!(matches!(err("tru"), DecodeError::Truncated { .. }));
        assert!(matches!(err("-"), DecodeError::Truncated { .. }));
        assert!(matches!(err("1."), DecodeError::Truncated { .. }));
        assert!(matches!(err("1e+"), DecodeError::Truncated { .. }));
    }

    #[test]
    fn malformed_tokens() {
        assert_eq!(err("nul!"), DecodeError::Invalid("bad literal"));
        assert_eq!(err("01"), DecodeError::Invalid("leading zero"));
        assert_eq!(err("+1"), DecodeError::Invalid("unexpected character"));
        assert_eq!(err("1.e5"), DecodeError::Invalid("expected fraction digit"));
        assert_eq!(err("   "), DecodeError::Invalid("expected a value"));
    }

    #[test]
    fn out_of_range_numbers_fail() {
        assert_eq!(err("9223372036854775808"), DecodeError::Overflow);
        assert_eq!(err("-9223372036854775809"), DecodeError::Overflow);
        assert_eq!(err("1e400"), DecodeError::Overflow);
    }

    #[test]
    fn legacy_int_wrapper() {
        assert_eq!(parse_int(b"123"), 123);
        assert_eq!(parse_int(b"-5 "), -5);
        assert_eq!(parse_int(b"1.5"), 0);
        assert_eq!(parse_int(b"true"), 0);
        assert_eq!(parse_int(b""), 0);
    }
}
