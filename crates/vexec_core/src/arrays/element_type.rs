use std::fmt;

use serde::{Deserialize, Serialize};
use vexec_error::{DbError, Result};

/// Element type tag for vectors and blocks.
///
/// This is the only type information the core interprets. It's used to pick
/// the right block hash and aggregator specializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Type of the constant-null block. Has no backing values.
    Null,
    Int,
    Long,
    Double,
    Bytes,
    Boolean,
}

impl ElementType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Bytes => "bytes",
            Self::Boolean => "boolean",
        }
    }

    /// Tag used in the block wire encoding.
    pub const fn wire_tag(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int => 1,
            Self::Long => 2,
            Self::Double => 3,
            Self::Bytes => 4,
            Self::Boolean => 5,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Null,
            1 => Self::Int,
            2 => Self::Long,
            3 => Self::Double,
            4 => Self::Bytes,
            5 => Self::Boolean,
            other => {
                return Err(DbError::new("Unknown element type tag").with_field("tag", other));
            }
        })
    }

    /// If this is a numeric type that can be summed, averaged, etc.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Double)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_roundtrip() {
        for typ in [
            ElementType::Null,
            ElementType::Int,
            ElementType::Long,
            ElementType::Double,
            ElementType::Bytes,
            ElementType::Boolean,
        ] {
            assert_eq!(typ, ElementType::from_wire_tag(typ.wire_tag()).unwrap());
        }
        ElementType::from_wire_tag(42).unwrap_err();
    }
}
