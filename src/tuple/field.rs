use std::cmp::Ordering;
use std::fmt::Display;
use std::io::{Read, Write};

use crate::common::STRING_LEN;
use crate::error::{DbError, Result};

/// The field types supported by the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Str,
}

impl Type {
    /// Returns how many bytes a serialized field of this type occupies.
    pub fn len(&self) -> usize {
        match self {
            Type::Int => std::mem::size_of::<i32>(),
            Type::Str => std::mem::size_of::<u32>() + STRING_LEN,
        }
    }

    /// Parses a field of this type from a reader positioned at its first byte.
    pub fn parse(&self, reader: &mut impl Read) -> Result<Field> {
        match self {
            Type::Int => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf)?;
                Ok(Field::Int(i32::from_be_bytes(buf)))
            }
            Type::Str => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf)?;
                let len = (u32::from_be_bytes(buf) as usize).min(STRING_LEN);
                let mut payload = [0u8; STRING_LEN];
                reader.read_exact(&mut payload)?;
                let val = std::str::from_utf8(&payload[..len])
                    .map_err(|e| DbError::Db(format!("invalid string field: {e}")))?
                    .to_owned();
                Ok(Field::Str(val))
            }
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Str => write!(f, "string"),
        }
    }
}

/// Comparison operators usable in filter and join predicates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Equals,
    GreaterThan,
    LessThan,
    LessThanOrEq,
    GreaterThanOrEq,
    Like,
    NotEquals,
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Op::Equals => "=",
            Op::GreaterThan => ">",
            Op::LessThan => "<",
            Op::LessThanOrEq => "<=",
            Op::GreaterThanOrEq => ">=",
            Op::Like => "like",
            Op::NotEquals => "<>",
        };
        write!(f, "{s}")
    }
}

fn compare<T: PartialOrd>(left: &T, right: &T, op: Op) -> bool {
    match op {
        Op::Equals | Op::Like => left == right,
        Op::NotEquals => left != right,
        Op::LessThan => left < right,
        Op::LessThanOrEq => left <= right,
        Op::GreaterThan => left > right,
        Op::GreaterThanOrEq => left >= right,
    }
}

/// A single typed value. String payloads are stored unpadded, so equality,
/// ordering and hashing never depend on serialization padding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// Creates a string field, truncating the payload to the fixed width.
    pub fn str(val: impl Into<String>) -> Self {
        let mut val = val.into();
        if val.len() > STRING_LEN {
            val.truncate(STRING_LEN);
        }
        Field::Str(val)
    }

    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::Str,
        }
    }

    /// Evaluates `self op other`. `Like` is substring containment on strings
    /// and plain equality on integers.
    pub fn compare(&self, op: Op, other: &Field) -> bool {
        match (self, other) {
            (Field::Int(left), Field::Int(right)) => compare(left, right, op),
            (Field::Str(left), Field::Str(right)) => match op {
                Op::Like => left.contains(right.as_str()),
                _ => compare(left, right, op),
            },
            _ => false,
        }
    }

    /// Writes the fixed-width byte form of this field.
    pub fn serialize(&self, writer: &mut impl Write) -> Result<()> {
        match self {
            Field::Int(val) => writer.write_all(&val.to_be_bytes())?,
            Field::Str(val) => {
                let bytes = val.as_bytes();
                writer.write_all(&(bytes.len() as u32).to_be_bytes())?;
                writer.write_all(bytes)?;
                let padding = [0u8; STRING_LEN];
                writer.write_all(&padding[bytes.len()..])?;
            }
        }
        Ok(())
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Field::Int(val) => *val,
            _ => unreachable!(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Field::Str(val) => val,
            _ => unreachable!(),
        }
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Field::Int(left), Field::Int(right)) => left.cmp(right),
            (Field::Str(left), Field::Str(right)) => left.cmp(right),
            (Field::Int(_), Field::Str(_)) => Ordering::Less,
            (Field::Str(_), Field::Int(_)) => Ordering::Greater,
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(val) => Display::fmt(val, f),
            Field::Str(val) => Display::fmt(val, f),
        }
    }
}
