use vexec_error::{DbError, Result};

use super::block::{Block, TypedBlock};
use super::element_type::ElementType;
use super::value::Value;
use super::value_buffer::{
    BooleanBuffer,
    BytesBuffer,
    DoubleBuffer,
    IntBuffer,
    LongBuffer,
    ValueBuffer,
};
use super::vector::TypedVector;
use crate::buffer::buffer_manager::{BufferManagerRef, Reservation, reserve_vec};

/// Builds a block one position at a time.
///
/// Growth of the working buffers is reserved against the buffer manager for
/// the lifetime of the builder. The built block is handed off to the caller
/// and the reservation released.
#[derive(Debug)]
pub struct TypedBlockBuilder<B: ValueBuffer> {
    values: B,
    /// Value offsets for every completed position, starts with a single 0.
    first_value_indexes: Vec<usize>,
    /// Start of the currently open multivalue entry.
    open_entry: Option<usize>,
    /// If every completed position holds exactly one value.
    single_valued: bool,
    reservation: Reservation,
}

impl<B: ValueBuffer> TypedBlockBuilder<B> {
    pub fn new(manager: &BufferManagerRef) -> Self {
        TypedBlockBuilder {
            values: B::default(),
            first_value_indexes: vec![0],
            open_entry: None,
            single_valued: true,
            reservation: Reservation::new(manager),
        }
    }

    /// Create a builder with room for an estimated number of positions.
    pub fn try_with_capacity(manager: &BufferManagerRef, positions: usize) -> Result<Self> {
        let mut builder = Self::new(manager);
        reserve_vec(
            &mut builder.first_value_indexes,
            positions,
            &mut builder.reservation,
        )?;
        Ok(builder)
    }

    /// Number of completed positions.
    pub fn position_count(&self) -> usize {
        self.first_value_indexes.len() - 1
    }

    /// Bytes currently reserved by this builder.
    pub fn memory_usage(&self) -> usize {
        self.reservation.size()
    }

    fn push_position_end(&mut self) -> Result<()> {
        reserve_vec(&mut self.first_value_indexes, 1, &mut self.reservation)?;
        let start = self.first_value_indexes[self.first_value_indexes.len() - 1];
        let end = self.values.len();
        self.single_valued &= end - start == 1;
        self.first_value_indexes.push(end);
        Ok(())
    }

    /// Append a value.
    ///
    /// Outside of a position entry, this completes a new position.
    pub fn append_value(&mut self, value: &B::Item) -> Result<()> {
        self.values.reserve_for(value, &mut self.reservation)?;
        self.values.push(value);
        if self.open_entry.is_none() {
            self.push_position_end()?;
        }
        Ok(())
    }

    /// Append a null position.
    pub fn append_null(&mut self) -> Result<()> {
        if self.open_entry.is_some() {
            return Err(DbError::invalid_state(
                "Cannot append null inside of a position entry",
            ));
        }
        self.push_position_end()
    }

    /// Begin a position holding zero or more values.
    pub fn begin_position_entry(&mut self) -> Result<()> {
        if self.open_entry.is_some() {
            return Err(DbError::invalid_state("Position entry already open")
                .with_field("position", self.position_count()));
        }
        self.open_entry = Some(self.values.len());
        Ok(())
    }

    /// Complete the currently open position. An entry without any values is
    /// null.
    pub fn end_position_entry(&mut self) -> Result<()> {
        if self.open_entry.take().is_none() {
            return Err(DbError::invalid_state("No position entry open")
                .with_field("position", self.position_count()));
        }
        self.push_position_end()
    }

    /// Append positions `start..end` of another block.
    pub fn copy_from(&mut self, block: &TypedBlock<B>, start: usize, end: usize) -> Result<()> {
        if start > end || end > block.position_count() {
            return Err(DbError::new("Invalid copy range")
                .with_field("start", start)
                .with_field("end", end)
                .with_field("position_count", block.position_count()));
        }

        for p in start..end {
            match block.value_count(p) {
                0 => self.append_null()?,
                1 => self.append_value(block.get_value(block.first_value_index(p)))?,
                _ => {
                    self.begin_position_entry()?;
                    for idx in block.value_range(p) {
                        self.append_value(block.get_value(idx))?;
                    }
                    self.end_position_entry()?;
                }
            }
        }

        Ok(())
    }

    /// Append a single value read from another block by value index.
    pub fn append_value_from(&mut self, block: &TypedBlock<B>, value_index: usize) -> Result<()> {
        self.append_value(block.get_value(value_index))
    }

    /// Produce the block.
    pub fn build(self) -> Result<TypedBlock<B>> {
        if self.open_entry.is_some() {
            return Err(DbError::invalid_state(
                "Cannot build block with an open position entry",
            ));
        }

        let position_count = self.position_count();
        if self.single_valued {
            if position_count == 1 {
                return Ok(TypedBlock::from_vector(TypedVector::new_constant(
                    self.values.get(0),
                    1,
                )));
            }
            return Ok(TypedBlock::from_vector(TypedVector::new_array(self.values)));
        }

        TypedBlock::try_new(
            TypedVector::new_array(self.values),
            position_count,
            Some(self.first_value_indexes),
            None,
        )
    }
}

/// Builds a dense vector.
#[derive(Debug)]
pub struct TypedVectorBuilder<B: ValueBuffer> {
    values: B,
    reservation: Reservation,
}

impl<B: ValueBuffer> TypedVectorBuilder<B> {
    pub fn new(manager: &BufferManagerRef) -> Self {
        TypedVectorBuilder {
            values: B::default(),
            reservation: Reservation::new(manager),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn append(&mut self, value: &B::Item) -> Result<()> {
        self.values.reserve_for(value, &mut self.reservation)?;
        self.values.push(value);
        Ok(())
    }

    pub fn build(self) -> TypedVector<B> {
        if self.values.len() == 1 {
            TypedVector::new_constant(self.values.get(0), 1)
        } else {
            TypedVector::new_array(self.values)
        }
    }
}

/// Block builder for any element type.
#[derive(Debug)]
pub enum BlockBuilder {
    Null { position_count: usize },
    Int(TypedBlockBuilder<IntBuffer>),
    Long(TypedBlockBuilder<LongBuffer>),
    Double(TypedBlockBuilder<DoubleBuffer>),
    Bytes(TypedBlockBuilder<BytesBuffer>),
    Boolean(TypedBlockBuilder<BooleanBuffer>),
}

macro_rules! match_builder {
    ($builder:expr, $b:ident => $typed:expr, null($n:ident) => $null:expr) => {
        match $builder {
            BlockBuilder::Null { position_count: $n } => $null,
            BlockBuilder::Int($b) => $typed,
            BlockBuilder::Long($b) => $typed,
            BlockBuilder::Double($b) => $typed,
            BlockBuilder::Bytes($b) => $typed,
            BlockBuilder::Boolean($b) => $typed,
        }
    };
}

impl BlockBuilder {
    pub fn new(element_type: ElementType, manager: &BufferManagerRef) -> Self {
        match element_type {
            ElementType::Null => BlockBuilder::Null { position_count: 0 },
            ElementType::Int => BlockBuilder::Int(TypedBlockBuilder::new(manager)),
            ElementType::Long => BlockBuilder::Long(TypedBlockBuilder::new(manager)),
            ElementType::Double => BlockBuilder::Double(TypedBlockBuilder::new(manager)),
            ElementType::Bytes => BlockBuilder::Bytes(TypedBlockBuilder::new(manager)),
            ElementType::Boolean => BlockBuilder::Boolean(TypedBlockBuilder::new(manager)),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            BlockBuilder::Null { .. } => ElementType::Null,
            BlockBuilder::Int(_) => ElementType::Int,
            BlockBuilder::Long(_) => ElementType::Long,
            BlockBuilder::Double(_) => ElementType::Double,
            BlockBuilder::Bytes(_) => ElementType::Bytes,
            BlockBuilder::Boolean(_) => ElementType::Boolean,
        }
    }

    pub fn position_count(&self) -> usize {
        match_builder!(self, b => b.position_count(), null(n) => *n)
    }

    pub fn append_null(&mut self) -> Result<()> {
        match_builder!(self, b => b.append_null(), null(n) => {
            *n += 1;
            Ok(())
        })
    }

    pub fn begin_position_entry(&mut self) -> Result<()> {
        match_builder!(
            self,
            b => b.begin_position_entry(),
            null(_n) => Err(DbError::unsupported_type("Cannot open an entry in a null builder"))
        )
    }

    pub fn end_position_entry(&mut self) -> Result<()> {
        match_builder!(
            self,
            b => b.end_position_entry(),
            null(_n) => Err(DbError::unsupported_type("Cannot close an entry in a null builder"))
        )
    }

    /// Append a scalar value, or a multivalued position for `Value::Multi`.
    pub fn append_scalar(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => return self.append_null(),
            Value::Multi(values) => {
                if matches!(self, BlockBuilder::Null { .. }) && values.is_empty() {
                    return self.append_null();
                }
                self.begin_position_entry()?;
                for value in values {
                    self.append_entry_value(value)?;
                }
                return self.end_position_entry();
            }
            _ => (),
        }
        self.append_entry_value(value)
    }

    fn append_entry_value(&mut self, value: &Value) -> Result<()> {
        match (self, value) {
            (BlockBuilder::Int(b), Value::Int(v)) => b.append_value(v),
            (BlockBuilder::Long(b), Value::Long(v)) => b.append_value(v),
            (BlockBuilder::Double(b), Value::Double(v)) => b.append_value(v),
            (BlockBuilder::Bytes(b), Value::Bytes(v)) => b.append_value(v),
            (BlockBuilder::Boolean(b), Value::Bool(v)) => b.append_value(v),
            (builder, value) => Err(DbError::unsupported_type(
                "Value does not match builder element type",
            )
            .with_field("element_type", builder.element_type())
            .with_field("value", format!("{value:?}"))),
        }
    }

    /// Produce the block. A builder that only saw nulls produces the
    /// constant-null block.
    pub fn build(self) -> Result<Block> {
        let block = match self {
            BlockBuilder::Null { position_count } => return Ok(Block::Null(position_count)),
            BlockBuilder::Int(b) => Block::Int(b.build()?),
            BlockBuilder::Long(b) => Block::Long(b.build()?),
            BlockBuilder::Double(b) => Block::Double(b.build()?),
            BlockBuilder::Bytes(b) => Block::Bytes(b.build()?),
            BlockBuilder::Boolean(b) => Block::Boolean(b.build()?),
        };

        if block.position_count() > 0 && block.all_null() {
            return Ok(Block::Null(block.position_count()));
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use vexec_error::ErrorKind;

    use super::*;
    use crate::arrays::vector::VectorEncoding;
    use crate::buffer::buffer_manager::{BufferManager, NopBufferManager, TrackingBufferManager};

    #[test]
    fn single_value_builds_constant() {
        let mut builder = TypedBlockBuilder::<LongBuffer>::new(&NopBufferManager::new_ref());
        builder.append_value(&42).unwrap();
        let block = builder.build().unwrap();

        let vector = block.as_vector().unwrap();
        assert_eq!(VectorEncoding::Constant, vector.encoding());
        assert_eq!(42, *vector.get(0));
    }

    #[test]
    fn dense_builds_array() {
        let mut builder = TypedBlockBuilder::<IntBuffer>::new(&NopBufferManager::new_ref());
        for v in 0..10 {
            builder.append_value(&v).unwrap();
        }
        let block = builder.build().unwrap();
        let vector = block.as_vector().unwrap();
        assert_eq!(VectorEncoding::Array, vector.encoding());
        assert_eq!(10, block.position_count());
    }

    #[test]
    fn nulls_and_multivalues() {
        let mut builder = TypedBlockBuilder::<BytesBuffer>::new(&NopBufferManager::new_ref());
        builder.append_value(b"a").unwrap();
        builder.append_null().unwrap();
        builder.begin_position_entry().unwrap();
        builder.append_value(b"b").unwrap();
        builder.append_value(b"c").unwrap();
        builder.end_position_entry().unwrap();
        builder.begin_position_entry().unwrap();
        builder.end_position_entry().unwrap();
        let block = builder.build().unwrap();

        assert_eq!(4, block.position_count());
        assert!(block.as_vector().is_none());
        assert!(block.is_null(1));
        assert!(block.is_null(3));
        assert_eq!(
            vec![&b"b"[..], &b"c"[..]],
            block.values(2).collect::<Vec<_>>()
        );
    }

    #[test]
    fn entry_misuse_is_invalid_state() {
        let mut builder = TypedBlockBuilder::<IntBuffer>::new(&NopBufferManager::new_ref());
        let err = builder.end_position_entry().unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));

        builder.begin_position_entry().unwrap();
        let err = builder.begin_position_entry().unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));
        let err = builder.append_null().unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));

        let err = builder.build().unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidState));
    }

    #[test]
    fn copy_from_preserves_framing() {
        let manager = NopBufferManager::new_ref();
        let mut builder = TypedBlockBuilder::<LongBuffer>::new(&manager);
        builder.append_value(&1).unwrap();
        builder.append_null().unwrap();
        builder.begin_position_entry().unwrap();
        builder.append_value(&2).unwrap();
        builder.append_value(&3).unwrap();
        builder.end_position_entry().unwrap();
        let source = builder.build().unwrap();

        let mut builder = TypedBlockBuilder::<LongBuffer>::new(&manager);
        builder.copy_from(&source, 1, 3).unwrap();
        builder.append_value_from(&source, 0).unwrap();
        let copied = builder.build().unwrap();

        assert_eq!(3, copied.position_count());
        assert!(copied.is_null(0));
        assert_eq!(vec![2, 3], copied.values(1).copied().collect::<Vec<_>>());
        assert_eq!(vec![1], copied.values(2).copied().collect::<Vec<_>>());
    }

    #[test]
    fn memory_released_after_build() {
        let manager = TrackingBufferManager::new_ref(None);
        let manager_ref: BufferManagerRef = manager.clone();
        let mut builder = TypedBlockBuilder::<DoubleBuffer>::new(&manager_ref);
        for v in 0..100 {
            builder.append_value(&(v as f64)).unwrap();
        }
        assert!(manager.reserved_bytes() > 0);
        assert_eq!(builder.memory_usage(), manager.reserved_bytes());

        let _block = builder.build().unwrap();
        assert_eq!(0, manager.reserved_bytes());
    }

    #[test]
    fn builder_refused_past_limit() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(Some(64));
        let mut builder = TypedBlockBuilder::<LongBuffer>::new(&manager);
        let err = (0..100)
            .try_for_each(|v| builder.append_value(&v))
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::MemoryLimitExceeded));
    }

    #[test]
    fn all_null_builds_null_block() {
        let mut builder = BlockBuilder::new(ElementType::Double, &NopBufferManager::new_ref());
        builder.append_scalar(&Value::Null).unwrap();
        builder.append_scalar(&Value::Multi(Vec::new())).unwrap();
        assert_eq!(Block::Null(2), builder.build().unwrap());
    }

    #[test]
    fn append_scalar_wrong_type() {
        let mut builder = BlockBuilder::new(ElementType::Int, &NopBufferManager::new_ref());
        let err = builder.append_scalar(&Value::Long(4)).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsupportedType));
    }
}
