use std::hash::{Hash, Hasher};
use std::sync::Arc;

use vexec_error::{DbError, Result};

use super::element_type::ElementType;
use super::value_buffer::{
    BooleanBuffer,
    BytesBuffer,
    DoubleBuffer,
    IntBuffer,
    LongBuffer,
    ValueBuffer,
    VectorValue,
};

/// Physical encoding of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorEncoding {
    Constant,
    Array,
    Filter,
}

impl VectorEncoding {
    pub const fn wire_tag(&self) -> u8 {
        match self {
            Self::Constant => 0,
            Self::Array => 1,
            Self::Filter => 2,
        }
    }
}

/// An immutable, positionally indexed sequence of values of a single type.
///
/// Vectors are cheap to clone, all payloads are reference counted.
#[derive(Debug, Clone)]
pub enum TypedVector<B: ValueBuffer> {
    /// A single value repeated for every position.
    ///
    /// The buffer holds exactly one value.
    Constant { value: Arc<B>, len: usize },
    /// One value per position.
    Array(Arc<B>),
    /// A selection of positions from a base vector. Payload is never copied.
    Filter {
        base: Arc<TypedVector<B>>,
        positions: Arc<[usize]>,
    },
}

impl<B: ValueBuffer> TypedVector<B> {
    pub fn new_constant(value: &B::Item, len: usize) -> Self {
        let mut buf = B::default();
        buf.push(value);
        TypedVector::Constant {
            value: Arc::new(buf),
            len,
        }
    }

    pub fn new_array(values: B) -> Self {
        TypedVector::Array(Arc::new(values))
    }

    pub fn empty() -> Self {
        TypedVector::Array(Arc::new(B::default()))
    }

    pub fn element_type(&self) -> ElementType {
        B::ELEMENT_TYPE
    }

    pub fn position_count(&self) -> usize {
        match self {
            Self::Constant { len, .. } => *len,
            Self::Array(values) => values.len(),
            Self::Filter { positions, .. } => positions.len(),
        }
    }

    pub fn encoding(&self) -> VectorEncoding {
        match self {
            Self::Constant { .. } => VectorEncoding::Constant,
            Self::Array(_) => VectorEncoding::Array,
            Self::Filter { .. } => VectorEncoding::Filter,
        }
    }

    /// Get the value at a position.
    ///
    /// Panics if the position is out of bounds.
    #[inline]
    pub fn get(&self, position: usize) -> &B::Item {
        match self {
            Self::Constant { value, len } => {
                assert!(position < *len, "position {position} out of bounds ({len})");
                value.get(0)
            }
            Self::Array(values) => values.get(position),
            Self::Filter { base, positions } => base.get(positions[position]),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &B::Item> + '_ {
        (0..self.position_count()).map(|idx| self.get(idx))
    }

    /// Create a view over a selection of positions.
    ///
    /// A constant vector stays constant, everything else produces a filter
    /// vector referencing this one.
    pub fn filter(&self, positions: &[usize]) -> Result<Self> {
        let count = self.position_count();
        if let Some(&bad) = positions.iter().find(|&&p| p >= count) {
            return Err(DbError::new("Filter position out of bounds")
                .with_field("position", bad)
                .with_field("position_count", count));
        }

        Ok(match self {
            Self::Constant { value, .. } => Self::Constant {
                value: value.clone(),
                len: positions.len(),
            },
            // Avoid stacking filters, compose the positions instead.
            Self::Filter {
                base,
                positions: existing,
            } => Self::Filter {
                base: base.clone(),
                positions: positions.iter().map(|&p| existing[p]).collect(),
            },
            Self::Array(_) => Self::Filter {
                base: Arc::new(self.clone()),
                positions: positions.into(),
            },
        })
    }

    /// Structural equality, independent of encoding.
    pub fn values_eq(&self, other: &Self) -> bool {
        self.position_count() == other.position_count()
            && self.iter().zip(other.iter()).all(|(a, b)| a.value_eq(b))
    }
}

impl<B: ValueBuffer> PartialEq for TypedVector<B> {
    fn eq(&self, other: &Self) -> bool {
        self.values_eq(other)
    }
}

impl<B: ValueBuffer> Eq for TypedVector<B> {}

impl<B: ValueBuffer> Hash for TypedVector<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.position_count());
        for v in self.iter() {
            v.hash_value(state);
        }
    }
}

pub type IntVector = TypedVector<IntBuffer>;
pub type LongVector = TypedVector<LongBuffer>;
pub type DoubleVector = TypedVector<DoubleBuffer>;
pub type BytesVector = TypedVector<BytesBuffer>;
pub type BooleanVector = TypedVector<BooleanBuffer>;

/// A vector of any element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Vector {
    Int(IntVector),
    Long(LongVector),
    Double(DoubleVector),
    Bytes(BytesVector),
    Boolean(BooleanVector),
}

impl Vector {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Int(_) => ElementType::Int,
            Self::Long(_) => ElementType::Long,
            Self::Double(_) => ElementType::Double,
            Self::Bytes(_) => ElementType::Bytes,
            Self::Boolean(_) => ElementType::Boolean,
        }
    }

    pub fn position_count(&self) -> usize {
        match self {
            Self::Int(v) => v.position_count(),
            Self::Long(v) => v.position_count(),
            Self::Double(v) => v.position_count(),
            Self::Bytes(v) => v.position_count(),
            Self::Boolean(v) => v.position_count(),
        }
    }

    pub fn encoding(&self) -> VectorEncoding {
        match self {
            Self::Int(v) => v.encoding(),
            Self::Long(v) => v.encoding(),
            Self::Double(v) => v.encoding(),
            Self::Bytes(v) => v.encoding(),
            Self::Boolean(v) => v.encoding(),
        }
    }

    pub fn filter(&self, positions: &[usize]) -> Result<Self> {
        Ok(match self {
            Self::Int(v) => Self::Int(v.filter(positions)?),
            Self::Long(v) => Self::Long(v.filter(positions)?),
            Self::Double(v) => Self::Double(v.filter(positions)?),
            Self::Bytes(v) => Self::Bytes(v.filter(positions)?),
            Self::Boolean(v) => Self::Boolean(v.filter(positions)?),
        })
    }
}
