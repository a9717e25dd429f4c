//! Numeric values crossing the host/guest boundary.
//!
//! Guests only ever see the four core numeric types. The supervisor's HTTP
//! surface only distinguishes integers from floats, so [`ArgType`] is the
//! coarse view and [`NumKind`] the engine-native one.

use std::fmt;

/// Engine-native numeric type tag.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum NumKind {
    I32,
    I64,
    F32,
    F64,
}

impl NumKind {
    /// The semantic argument type this native type is parsed as.
    pub fn arg_type(self) -> ArgType {
        match self {
            Self::I32 | Self::I64 => ArgType::Int,
            Self::F32 | Self::F64 => ArgType::Float,
        }
    }
}

impl fmt::Display for NumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
        }
    }
}

/// Semantic argument type used when parsing arguments from requests.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Float,
}

impl ArgType {
    /// Parses a textual argument into a value of this type.
    ///
    /// Integers are widened to `i64` and floats to `f64`; the call path narrows
    /// them to the declared parameter type.
    pub fn parse(self, text: &str) -> Option<Value> {
        let text = text.trim();
        match self {
            Self::Int => text.parse::<i64>().ok().map(Value::I64),
            Self::Float => text.parse::<f64>().ok().map(Value::F64),
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
        }
    }
}

/// A numeric value passed to or returned from a guest function.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn kind(&self) -> NumKind {
        match self {
            Self::I32(_) => NumKind::I32,
            Self::I64(_) => NumKind::I64,
            Self::F32(_) => NumKind::F32,
            Self::F64(_) => NumKind::F64,
        }
    }

    /// Converts this value to `kind`.
    ///
    /// Integers narrow only when they fit. Floats never convert to integers.
    pub fn coerce(self, kind: NumKind) -> Option<Value> {
        match (self, kind) {
            (v, k) if v.kind() == k => Some(v),
            (Self::I64(v), NumKind::I32) => i32::try_from(v).ok().map(Self::I32),
            (Self::I32(v), NumKind::I64) => Some(Self::I64(v.into())),
            (v, NumKind::F32) => v.as_f64().map(|x| Self::F32(x as f32)),
            (v, NumKind::F64) => v.as_f64().map(Self::F64),
            _ => None,
        }
    }

    /// Integer view of the value, `None` for floats.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v),
            Self::F32(_) | Self::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v as f64),
            Self::F32(v) => Some(v.into()),
            Self::F64(v) => Some(v),
        }
    }

    /// Interprets the value as a guest pointer (an unsigned 32-bit offset).
    pub fn as_ptr(&self) -> Option<u32> {
        match *self {
            Self::I32(v) => Some(v as u32),
            Self::I64(v) => u32::try_from(v).ok(),
            Self::F32(_) | Self::F64(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
        }
    }
}

/// Parameter and result types of an exported function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<NumKind>,
    pub results: Vec<NumKind>,
}

impl Signature {
    /// Semantic parameter types in declaration order.
    pub fn arg_types(&self) -> Vec<ArgType> {
        self.params.iter().map(|kind| kind.arg_type()).collect()
    }
}
