use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

use vexec_error::{DbError, Result};

use super::bitmap::Bitmap;
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
use super::vector::{TypedVector, Vector};

/// Column values for a page.
///
/// Each position holds zero (null), one or many values. When every position
/// holds exactly one value, the block is just a wrapper around its vector and
/// can be read through [`TypedBlock::as_vector`] without any index
/// indirection.
#[derive(Debug, Clone)]
pub struct TypedBlock<B: ValueBuffer> {
    vector: TypedVector<B>,
    position_count: usize,
    /// Present when a position holds zero or multiple values.
    ///
    /// Length is `position_count + 1`, values for position `p` are
    /// `first_value_indexes[p]..first_value_indexes[p + 1]`.
    first_value_indexes: Option<Arc<[usize]>>,
    /// Set bits indicate null positions.
    nulls: Option<Arc<Bitmap>>,
    /// If any position holds more than one value.
    multivalued: bool,
}

impl<B: ValueBuffer> TypedBlock<B> {
    /// Create a dense, single-valued block.
    pub fn from_vector(vector: TypedVector<B>) -> Self {
        TypedBlock {
            position_count: vector.position_count(),
            vector,
            first_value_indexes: None,
            nulls: None,
            multivalued: false,
        }
    }

    /// Create a block with explicit value indexes and nulls.
    ///
    /// Positions with zero values are marked null. Positions marked null must
    /// have zero values.
    pub fn try_new(
        vector: TypedVector<B>,
        position_count: usize,
        first_value_indexes: Option<Vec<usize>>,
        nulls: Option<Bitmap>,
    ) -> Result<Self> {
        let first_value_indexes = match first_value_indexes {
            Some(indexes) => indexes,
            None => {
                if nulls.as_ref().is_some_and(|n| n.has_any_true()) {
                    return Err(DbError::new("Null positions require first value indexes"));
                }
                if vector.position_count() != position_count {
                    return Err(DbError::new("Vector length does not match position count")
                        .with_field("vector", vector.position_count())
                        .with_field("positions", position_count));
                }
                return Ok(Self::from_vector(vector));
            }
        };

        if first_value_indexes.len() != position_count + 1 {
            return Err(DbError::new("Invalid first value indexes length")
                .with_field("len", first_value_indexes.len())
                .with_field("positions", position_count));
        }
        if first_value_indexes[0] != 0
            || first_value_indexes[position_count] != vector.position_count()
        {
            return Err(DbError::new("First value indexes do not span the vector")
                .with_field("vector", vector.position_count()));
        }
        if let Some(nulls) = &nulls {
            if nulls.len() != position_count {
                return Err(DbError::new("Null bitmap length does not match position count")
                    .with_field("nulls", nulls.len())
                    .with_field("positions", position_count));
            }
        }

        let mut null_bits = Bitmap::new_with_all_false(position_count);
        let mut multivalued = false;
        let mut single_valued = true;
        for p in 0..position_count {
            let (start, end) = (first_value_indexes[p], first_value_indexes[p + 1]);
            if end < start {
                return Err(DbError::new("First value indexes must not decrease")
                    .with_field("position", p));
            }
            let count = end - start;
            let marked_null = nulls.as_ref().is_some_and(|n| n.value(p));
            if marked_null && count != 0 {
                return Err(DbError::new("Null position holds values").with_field("position", p));
            }
            if count == 0 {
                null_bits.set_unchecked(p, true);
            }
            multivalued |= count > 1;
            single_valued &= count == 1;
        }

        if single_valued {
            return Ok(Self::from_vector(vector));
        }

        let nulls = if null_bits.has_any_true() {
            Some(Arc::new(null_bits))
        } else {
            None
        };

        Ok(TypedBlock {
            vector,
            position_count,
            first_value_indexes: Some(first_value_indexes.into()),
            nulls,
            multivalued,
        })
    }

    pub fn element_type(&self) -> ElementType {
        B::ELEMENT_TYPE
    }

    pub fn position_count(&self) -> usize {
        self.position_count
    }

    /// Total number of values across all positions.
    pub fn total_value_count(&self) -> usize {
        self.vector.position_count()
    }

    /// The underlying vector if this block is dense and single valued.
    pub fn as_vector(&self) -> Option<&TypedVector<B>> {
        if self.first_value_indexes.is_none() && self.nulls.is_none() {
            Some(&self.vector)
        } else {
            None
        }
    }

    /// The vector holding every value of this block.
    pub fn vector(&self) -> &TypedVector<B> {
        &self.vector
    }

    pub fn first_value_indexes(&self) -> Option<&[usize]> {
        self.first_value_indexes.as_deref()
    }

    pub fn nulls(&self) -> Option<&Bitmap> {
        self.nulls.as_deref()
    }

    pub fn may_have_nulls(&self) -> bool {
        self.nulls.is_some()
    }

    pub fn may_have_multivalued(&self) -> bool {
        self.multivalued
    }

    pub fn null_count(&self) -> usize {
        self.nulls.as_ref().map(|n| n.count_trues()).unwrap_or(0)
    }

    pub fn is_null(&self, position: usize) -> bool {
        self.nulls.as_ref().is_some_and(|n| n.value(position))
    }

    /// Index into the vector of the first value at a position.
    pub fn first_value_index(&self, position: usize) -> usize {
        match &self.first_value_indexes {
            Some(indexes) => indexes[position],
            None => position,
        }
    }

    pub fn value_count(&self, position: usize) -> usize {
        match &self.first_value_indexes {
            Some(indexes) => indexes[position + 1] - indexes[position],
            None => 1,
        }
    }

    /// Range of value indexes for a position.
    pub fn value_range(&self, position: usize) -> Range<usize> {
        match &self.first_value_indexes {
            Some(indexes) => indexes[position]..indexes[position + 1],
            None => position..position + 1,
        }
    }

    /// Get a value by its value index.
    #[inline]
    pub fn get_value(&self, value_index: usize) -> &B::Item {
        self.vector.get(value_index)
    }

    /// Iterate the values at a position.
    pub fn values(&self, position: usize) -> impl Iterator<Item = &B::Item> + '_ {
        self.value_range(position).map(|idx| self.vector.get(idx))
    }

    /// Create a block containing only the selected positions.
    ///
    /// Values are not copied, the returned block references this block's
    /// vector through a filter.
    pub fn filter(&self, positions: &[usize]) -> Result<Self> {
        if let Some(&bad) = positions.iter().find(|&&p| p >= self.position_count) {
            return Err(DbError::new("Filter position out of bounds")
                .with_field("position", bad)
                .with_field("position_count", self.position_count));
        }

        if self.first_value_indexes.is_none() {
            return Ok(Self::from_vector(self.vector.filter(positions)?));
        }

        let mut value_indexes = Vec::new();
        let mut first_value_indexes = Vec::with_capacity(positions.len() + 1);
        first_value_indexes.push(0);
        for &p in positions {
            value_indexes.extend(self.value_range(p));
            first_value_indexes.push(value_indexes.len());
        }

        Self::try_new(
            self.vector.filter(&value_indexes)?,
            positions.len(),
            Some(first_value_indexes),
            None,
        )
    }

    /// Structural equality, independent of encoding.
    pub fn values_eq(&self, other: &Self) -> bool {
        if self.position_count != other.position_count {
            return false;
        }
        (0..self.position_count).all(|p| {
            self.is_null(p) == other.is_null(p)
                && self.value_count(p) == other.value_count(p)
                && self
                    .values(p)
                    .zip(other.values(p))
                    .all(|(a, b)| a.value_eq(b))
        })
    }

    fn hash_positions<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.position_count);
        for p in 0..self.position_count {
            if self.is_null(p) {
                state.write_u8(0);
                continue;
            }
            state.write_u8(1);
            state.write_usize(self.value_count(p));
            for v in self.values(p) {
                v.hash_value(state);
            }
        }
    }
}

impl<B: ValueBuffer> PartialEq for TypedBlock<B> {
    fn eq(&self, other: &Self) -> bool {
        self.values_eq(other)
    }
}

impl<B: ValueBuffer> Eq for TypedBlock<B> {}

pub type IntBlock = TypedBlock<IntBuffer>;
pub type LongBlock = TypedBlock<LongBuffer>;
pub type DoubleBlock = TypedBlock<DoubleBuffer>;
pub type BytesBlock = TypedBlock<BytesBuffer>;
pub type BooleanBlock = TypedBlock<BooleanBuffer>;

/// A block of any element type.
#[derive(Debug, Clone)]
pub enum Block {
    /// Every position is null. No backing storage.
    Null(usize),
    Int(IntBlock),
    Long(LongBlock),
    Double(DoubleBlock),
    Bytes(BytesBlock),
    Boolean(BooleanBlock),
}

/// Dispatch over the typed variants of a block.
macro_rules! match_typed {
    ($block:expr, $b:ident => $typed:expr, null($n:ident) => $null:expr) => {
        match $block {
            Block::Null($n) => $null,
            Block::Int($b) => $typed,
            Block::Long($b) => $typed,
            Block::Double($b) => $typed,
            Block::Bytes($b) => $typed,
            Block::Boolean($b) => $typed,
        }
    };
}

impl Block {
    pub fn new_constant_null(position_count: usize) -> Self {
        Block::Null(position_count)
    }

    pub fn from_vector(vector: Vector) -> Self {
        match vector {
            Vector::Int(v) => Block::Int(TypedBlock::from_vector(v)),
            Vector::Long(v) => Block::Long(TypedBlock::from_vector(v)),
            Vector::Double(v) => Block::Double(TypedBlock::from_vector(v)),
            Vector::Bytes(v) => Block::Bytes(TypedBlock::from_vector(v)),
            Vector::Boolean(v) => Block::Boolean(TypedBlock::from_vector(v)),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match_typed!(self, b => b.element_type(), null(_n) => ElementType::Null)
    }

    pub fn position_count(&self) -> usize {
        match_typed!(self, b => b.position_count(), null(n) => *n)
    }

    pub fn total_value_count(&self) -> usize {
        match_typed!(self, b => b.total_value_count(), null(_n) => 0)
    }

    pub fn is_null(&self, position: usize) -> bool {
        match_typed!(self, b => b.is_null(position), null(_n) => true)
    }

    pub fn value_count(&self, position: usize) -> usize {
        match_typed!(self, b => b.value_count(position), null(_n) => 0)
    }

    pub fn may_have_nulls(&self) -> bool {
        match_typed!(self, b => b.may_have_nulls(), null(n) => *n > 0)
    }

    pub fn may_have_multivalued(&self) -> bool {
        match_typed!(self, b => b.may_have_multivalued(), null(_n) => false)
    }

    /// Check if every position in this block is null.
    pub fn all_null(&self) -> bool {
        match_typed!(self, b => b.null_count() == b.position_count(), null(_n) => true)
    }

    /// The underlying vector if this block is dense and single valued.
    pub fn as_vector(&self) -> Option<Vector> {
        match self {
            Block::Null(_) => None,
            Block::Int(b) => b.as_vector().cloned().map(Vector::Int),
            Block::Long(b) => b.as_vector().cloned().map(Vector::Long),
            Block::Double(b) => b.as_vector().cloned().map(Vector::Double),
            Block::Bytes(b) => b.as_vector().cloned().map(Vector::Bytes),
            Block::Boolean(b) => b.as_vector().cloned().map(Vector::Boolean),
        }
    }

    pub fn filter(&self, positions: &[usize]) -> Result<Self> {
        Ok(match self {
            Block::Null(n) => {
                if let Some(&bad) = positions.iter().find(|&&p| p >= *n) {
                    return Err(DbError::new("Filter position out of bounds")
                        .with_field("position", bad)
                        .with_field("position_count", *n));
                }
                Block::Null(positions.len())
            }
            Block::Int(b) => Block::Int(b.filter(positions)?),
            Block::Long(b) => Block::Long(b.filter(positions)?),
            Block::Double(b) => Block::Double(b.filter(positions)?),
            Block::Bytes(b) => Block::Bytes(b.filter(positions)?),
            Block::Boolean(b) => Block::Boolean(b.filter(positions)?),
        })
    }

    /// Get a typed reference to this block.
    pub fn as_typed<B: ValueBuffer>(&self) -> Option<&TypedBlock<B>> {
        B::block_ref(self)
    }

    /// Get a typed reference to this block, erroring if the element type
    /// doesn't match.
    pub fn try_as_typed<B: ValueBuffer>(&self) -> Result<&TypedBlock<B>> {
        B::block_ref(self).ok_or_else(|| {
            DbError::unsupported_type("Unexpected block element type")
                .with_field("expected", B::ELEMENT_TYPE)
                .with_field("got", self.element_type())
        })
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Block::Int(a), Block::Int(b)) => a == b,
            (Block::Long(a), Block::Long(b)) => a == b,
            (Block::Double(a), Block::Double(b)) => a == b,
            (Block::Bytes(a), Block::Bytes(b)) => a == b,
            (Block::Boolean(a), Block::Boolean(b)) => a == b,
            // Different types only compare equal when there's no values to
            // compare.
            (a, b) => a.position_count() == b.position_count() && a.all_null() && b.all_null(),
        }
    }
}

impl Eq for Block {}

impl Hash for Block {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Block::Null(n) => {
                state.write_usize(*n);
                for _ in 0..*n {
                    state.write_u8(0);
                }
            }
            Block::Int(b) => b.hash_positions(state),
            Block::Long(b) => b.hash_positions(state),
            Block::Double(b) => b.hash_positions(state),
            Block::Bytes(b) => b.hash_positions(state),
            Block::Boolean(b) => b.hash_positions(state),
        }
    }
}
