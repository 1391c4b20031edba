use std::fmt;

use crate::arena::ArenaRef;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Ref(ArenaRef),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    None,
    Ref,
}

impl ValueKind {
    pub const ALL: [ValueKind; 5] = [
        ValueKind::Int,
        ValueKind::Float,
        ValueKind::Bool,
        ValueKind::None,
        ValueKind::Ref,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::None => "none",
            ValueKind::Ref => "ref",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "int" => Some(ValueKind::Int),
            "float" => Some(ValueKind::Float),
            "bool" => Some(ValueKind::Bool),
            "none" => Some(ValueKind::None),
            "ref" => Some(ValueKind::Ref),
            _ => None,
        }
    }

    /// Stable tag used across the C ABI. Zero is never a valid tag.
    pub fn tag(self) -> u32 {
        match self {
            ValueKind::Int => 1,
            ValueKind::Float => 2,
            ValueKind::Bool => 3,
            ValueKind::None => 4,
            ValueKind::Ref => 5,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(ValueKind::Int),
            2 => Some(ValueKind::Float),
            3 => Some(ValueKind::Bool),
            4 => Some(ValueKind::None),
            5 => Some(ValueKind::Ref),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::None => ValueKind::None,
            Value::Ref(_) => ValueKind::Ref,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<ArenaRef> {
        match *self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn truthy(&self) -> bool {
        match *self {
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            Value::Bool(b) => b,
            Value::None => false,
            Value::Ref(_) => true,
        }
    }

    /// The zero value stored in a freshly allocated slot of `kind`.
    ///
    /// Ref slots have no zero value and read back as `None` until written.
    pub fn zero_of(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Bool => Value::Bool(false),
            ValueKind::None | ValueKind::Ref => Value::None,
        }
    }

    /// Payload bits for a heap slot. The kind lives in layout metadata, not
    /// in the word.
    pub fn to_word(&self) -> u64 {
        match *self {
            Value::Int(i) => i as u64,
            Value::Float(f) => f.to_bits(),
            Value::Bool(b) => u64::from(b),
            Value::None => 0,
            Value::Ref(r) => ((r.offset as u64) << 32) | r.len as u64,
        }
    }

    /// Inverse of [`Value::to_word`]. A zero word in a ref slot means the
    /// slot was never written and decodes as `None`.
    pub fn from_word(kind: ValueKind, word: u64, generation: u32) -> Value {
        match kind {
            ValueKind::Int => Value::Int(word as i64),
            ValueKind::Float => Value::Float(f64::from_bits(word)),
            ValueKind::Bool => Value::Bool(word != 0),
            ValueKind::None => Value::None,
            ValueKind::Ref => {
                if word == 0 {
                    return Value::None;
                }
                Value::Ref(ArenaRef {
                    generation,
                    offset: (word >> 32) as u32,
                    len: word as u32,
                })
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => {
                if x.is_nan() {
                    f.write_str("nan")
                } else if x.is_infinite() {
                    f.write_str(if x > 0.0 { "inf" } else { "-inf" })
                } else if x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::None => f.write_str("None"),
            Value::Ref(r) => write!(f, "<ref {}:{}+{}>", r.generation, r.offset, r.len),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ArenaRef> for Value {
    fn from(r: ArenaRef) -> Self {
        Value::Ref(r)
    }
}
