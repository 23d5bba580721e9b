//! The closed value type every document field is drawn from (§3).
use std::fmt;

use crate::{
    bytes::ConvexBytes,
    document_id::DocumentId,
    numeric::check_finite_float,
    object::ConvexObject,
    size::Size,
};

/// `string | float64 | int64 | boolean | null | bytes | id(table) | array<T>
/// | object<...>`. `union<...>` and `literal<v>` from §3 are validator-level
/// constraints on these eight kinds, not additional value kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum ConvexValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(ConvexBytes),
    Id(DocumentId),
    Array(Vec<ConvexValue>),
    Object(ConvexObject),
}

impl ConvexValue {
    pub fn validate_finite(&self) -> anyhow::Result<()> {
        match self {
            ConvexValue::Float64(n) => check_finite_float(*n),
            ConvexValue::Array(items) => {
                for item in items {
                    item.validate_finite()?;
                }
                Ok(())
            },
            ConvexValue::Object(obj) => {
                for (_, v) in obj.iter() {
                    v.validate_finite()?;
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ConvexValue::Null => "null",
            ConvexValue::Boolean(_) => "boolean",
            ConvexValue::Int64(_) => "int64",
            ConvexValue::Float64(_) => "float64",
            ConvexValue::String(_) => "string",
            ConvexValue::Bytes(_) => "bytes",
            ConvexValue::Id(_) => "id",
            ConvexValue::Array(_) => "array",
            ConvexValue::Object(_) => "object",
        }
    }
}

impl Size for ConvexValue {
    fn size(&self) -> usize {
        match self {
            ConvexValue::Null | ConvexValue::Boolean(_) => 1,
            ConvexValue::Int64(_) | ConvexValue::Float64(_) => 9,
            ConvexValue::String(s) => 1 + s.len(),
            ConvexValue::Bytes(b) => 1 + b.len(),
            ConvexValue::Id(_) => 1 + crate::document_id::ID_ENCODED_LEN,
            ConvexValue::Array(items) => 1 + items.iter().map(Size::size).sum::<usize>(),
            ConvexValue::Object(obj) => obj.size(),
        }
    }

    fn nesting(&self) -> usize {
        match self {
            ConvexValue::Array(items) => 1 + items.iter().map(Size::nesting).max().unwrap_or(0),
            ConvexValue::Object(obj) => obj.nesting(),
            _ => 0,
        }
    }
}

impl fmt::Display for ConvexValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvexValue::Null => write!(f, "null"),
            ConvexValue::Boolean(b) => write!(f, "{b}"),
            ConvexValue::Int64(n) => write!(f, "{n}"),
            ConvexValue::Float64(n) => write!(f, "{n}"),
            ConvexValue::String(s) => write!(f, "{s:?}"),
            ConvexValue::Bytes(b) => write!(f, "{b:?}"),
            ConvexValue::Id(id) => write!(f, "{id}"),
            ConvexValue::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            },
            ConvexValue::Object(obj) => write!(f, "{obj}"),
        }
    }
}

impl From<bool> for ConvexValue {
    fn from(b: bool) -> Self {
        ConvexValue::Boolean(b)
    }
}

impl From<i64> for ConvexValue {
    fn from(n: i64) -> Self {
        ConvexValue::Int64(n)
    }
}

impl From<f64> for ConvexValue {
    fn from(n: f64) -> Self {
        ConvexValue::Float64(n)
    }
}

impl From<String> for ConvexValue {
    fn from(s: String) -> Self {
        ConvexValue::String(s)
    }
}

impl From<&str> for ConvexValue {
    fn from(s: &str) -> Self {
        ConvexValue::String(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_and_infinite_at_any_depth() {
        assert!(ConvexValue::Float64(f64::NAN).validate_finite().is_err());
        let nested = ConvexValue::Array(vec![ConvexValue::Float64(f64::INFINITY)]);
        assert!(nested.validate_finite().is_err());
    }

    #[test]
    fn accepts_ordinary_values() {
        assert!(ConvexValue::from(42i64).validate_finite().is_ok());
        assert!(ConvexValue::from(3.5).validate_finite().is_ok());
        assert!(ConvexValue::Null.validate_finite().is_ok());
    }
}
