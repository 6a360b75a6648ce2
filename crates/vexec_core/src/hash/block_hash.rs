use std::fmt::Debug;

use tracing::trace;
use vexec_error::{DbError, Result};

use super::bytes_hash::BytesRefHash;
use super::long_hash::LongHash;
use super::ord_to_group;
use crate::arrays::block::{Block, TypedBlock};
use crate::arrays::builder::TypedVectorBuilder;
use crate::arrays::element_type::ElementType;
use crate::arrays::page::Page;
use crate::arrays::value_buffer::{
    BytesBuffer,
    LongBuffer,
    PrimitiveBuffer,
    PrimitiveValue,
    ValueBuffer,
    canonical_double_bits,
};
use crate::arrays::vector::{LongVector, TypedVector};
use crate::buffer::buffer_manager::BufferManagerRef;
use crate::dedupe::{ALWAYS_COPY_MISSING, MultivalueDedupe};

/// Maps the values of a single key channel to dense group ids.
///
/// Group ids are assigned in first-seen order starting at 0 and are stable
/// for the lifetime of the hash.
pub trait BlockHash: Debug + Send {
    /// Add the key column of a page, returning a long block of group ids.
    ///
    /// Null positions produce null group ids, multivalued positions produce
    /// every distinct group id of their values.
    fn add(&mut self, page: &Page) -> Result<Block>;

    /// One key per group id, in group id order.
    ///
    /// The returned block is independent of the hash.
    fn keys(&self) -> Result<Block>;

    /// Every group id in use.
    fn non_empty(&self) -> LongVector;

    fn group_count(&self) -> usize;

    /// Bytes reserved by this hash.
    fn memory_usage(&self) -> usize;

    /// Release all storage. Idempotent.
    fn close(&mut self);
}

/// Create a block hash for a key channel.
pub fn new_block_hash(
    channel: usize,
    element_type: ElementType,
    manager: &BufferManagerRef,
) -> Result<Box<dyn BlockHash>> {
    new_block_hash_with_threshold(channel, element_type, ALWAYS_COPY_MISSING, manager)
}

/// Create a block hash for a key channel, deduplicating multivalued keys
/// with the given adaptive threshold.
pub fn new_block_hash_with_threshold(
    channel: usize,
    element_type: ElementType,
    dedupe_threshold: usize,
    manager: &BufferManagerRef,
) -> Result<Box<dyn BlockHash>> {
    let t = dedupe_threshold;
    Ok(match element_type {
        ElementType::Int => Box::new(NumericBlockHash::<i32>::new(channel, t, manager)),
        ElementType::Long => Box::new(NumericBlockHash::<i64>::new(channel, t, manager)),
        ElementType::Double => Box::new(NumericBlockHash::<f64>::new(channel, t, manager)),
        ElementType::Boolean => Box::new(NumericBlockHash::<bool>::new(channel, t, manager)),
        ElementType::Bytes => Box::new(BytesBlockHash::new(channel, t, manager)),
        ElementType::Null => {
            return Err(DbError::unsupported_type(
                "Cannot group on the null element type",
            ));
        }
    })
}

/// Resolve group ids for every position of a key block.
///
/// Multivalued positions are deduplicated before their values are added, so
/// each position holds every group id at most once.
fn add_block<B, F>(
    block: &TypedBlock<B>,
    dedupe_threshold: usize,
    manager: &BufferManagerRef,
    mut add: F,
) -> Result<Block>
where
    B: ValueBuffer,
    F: FnMut(&B::Item) -> Result<i64>,
{
    if let Some(vector) = block.as_vector() {
        if let TypedVector::Constant { value, len } = vector {
            let group = ord_to_group(add(value.get(0))?);
            return Ok(Block::Long(TypedBlock::from_vector(
                LongVector::new_constant(&group, *len),
            )));
        }

        let mut builder = TypedVectorBuilder::<LongBuffer>::new(manager);
        for value in vector.iter() {
            builder.append(&ord_to_group(add(value)?))?;
        }
        return Ok(Block::Long(TypedBlock::from_vector(builder.build())));
    }

    MultivalueDedupe::new(block, manager)
        .with_threshold(dedupe_threshold)
        .hash_add(add)
}

/// Fixed-width values that can be reinterpreted as a 64 bit hash key.
pub trait NumericKey: PrimitiveValue {
    fn to_key(self) -> u64;
    fn from_key(key: u64) -> Self;
}

impl NumericKey for i32 {
    fn to_key(self) -> u64 {
        self as i64 as u64
    }

    fn from_key(key: u64) -> Self {
        key as i64 as i32
    }
}

impl NumericKey for i64 {
    fn to_key(self) -> u64 {
        self as u64
    }

    fn from_key(key: u64) -> Self {
        key as i64
    }
}

impl NumericKey for f64 {
    fn to_key(self) -> u64 {
        canonical_double_bits(self)
    }

    fn from_key(key: u64) -> Self {
        f64::from_bits(key)
    }
}

impl NumericKey for bool {
    fn to_key(self) -> u64 {
        self as u64
    }

    fn from_key(key: u64) -> Self {
        key != 0
    }
}

/// Block hash for int, long, double and boolean keys.
#[derive(Debug)]
pub struct NumericBlockHash<T: NumericKey> {
    channel: usize,
    hash: LongHash,
    dedupe_threshold: usize,
    manager: BufferManagerRef,
    _key: std::marker::PhantomData<T>,
}

impl<T: NumericKey> NumericBlockHash<T> {
    pub fn new(channel: usize, dedupe_threshold: usize, manager: &BufferManagerRef) -> Self {
        NumericBlockHash {
            channel,
            hash: LongHash::new(manager),
            dedupe_threshold,
            manager: manager.clone(),
            _key: std::marker::PhantomData,
        }
    }
}

impl<T: NumericKey> BlockHash for NumericBlockHash<T> {
    fn add(&mut self, page: &Page) -> Result<Block> {
        let block = page.block(self.channel)?;
        if let Block::Null(n) = block {
            return Ok(Block::Null(*n));
        }
        let block = block.try_as_typed::<PrimitiveBuffer<T>>()?;
        let hash = &mut self.hash;
        let groups = add_block(block, self.dedupe_threshold, &self.manager, |v| {
            hash.add(v.to_key())
        })?;
        trace!(
            positions = page.position_count(),
            groups = self.hash.len(),
            "added page to numeric block hash"
        );
        Ok(groups)
    }

    fn keys(&self) -> Result<Block> {
        let mut builder = TypedVectorBuilder::<PrimitiveBuffer<T>>::new(&self.manager);
        for &key in self.hash.keys() {
            builder.append(&T::from_key(key))?;
        }
        Ok(PrimitiveBuffer::<T>::into_block(TypedBlock::from_vector(
            builder.build(),
        )))
    }

    fn non_empty(&self) -> LongVector {
        group_range(self.hash.len())
    }

    fn group_count(&self) -> usize {
        self.hash.len()
    }

    fn memory_usage(&self) -> usize {
        self.hash.memory_usage()
    }

    fn close(&mut self) {
        self.hash.close();
    }
}

/// Block hash for byte string keys.
#[derive(Debug)]
pub struct BytesBlockHash {
    channel: usize,
    hash: BytesRefHash,
    dedupe_threshold: usize,
    manager: BufferManagerRef,
}

impl BytesBlockHash {
    pub fn new(channel: usize, dedupe_threshold: usize, manager: &BufferManagerRef) -> Self {
        BytesBlockHash {
            channel,
            hash: BytesRefHash::new(manager),
            dedupe_threshold,
            manager: manager.clone(),
        }
    }
}

impl BlockHash for BytesBlockHash {
    fn add(&mut self, page: &Page) -> Result<Block> {
        let block = page.block(self.channel)?;
        if let Block::Null(n) = block {
            return Ok(Block::Null(*n));
        }
        let block = block.try_as_typed::<BytesBuffer>()?;
        let hash = &mut self.hash;
        let groups = add_block(block, self.dedupe_threshold, &self.manager, |v| hash.add(v))?;
        trace!(
            positions = page.position_count(),
            groups = self.hash.len(),
            "added page to bytes block hash"
        );
        Ok(groups)
    }

    fn keys(&self) -> Result<Block> {
        let mut builder = TypedVectorBuilder::<BytesBuffer>::new(&self.manager);
        for id in 0..self.hash.len() {
            builder.append(self.hash.get(id))?;
        }
        Ok(Block::Bytes(TypedBlock::from_vector(builder.build())))
    }

    fn non_empty(&self) -> LongVector {
        group_range(self.hash.len())
    }

    fn group_count(&self) -> usize {
        self.hash.len()
    }

    fn memory_usage(&self) -> usize {
        self.hash.memory_usage()
    }

    fn close(&mut self) {
        self.hash.close();
    }
}

fn group_range(count: usize) -> LongVector {
    let groups: Vec<i64> = (0..count as i64).collect();
    LongVector::new_array(groups.into())
}

#[cfg(test)]
mod tests {
    use vexec_error::ErrorKind;

    use super::*;
    use crate::arrays::value::{Value, block_values, page_from_rows};
    use crate::buffer::buffer_manager::{NopBufferManager, TrackingBufferManager};

    fn single_column_page(typ: ElementType, values: Vec<Value>) -> Page {
        let rows: Vec<_> = values.into_iter().map(|v| vec![v]).collect();
        page_from_rows(&[typ], &rows, &NopBufferManager::new_ref()).unwrap()
    }

    fn longs(vals: &[i64]) -> Vec<Value> {
        vals.iter().map(|&v| Value::Long(v)).collect()
    }

    #[test]
    fn group_ids_stable_across_pages() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash(0, ElementType::Long, &manager).unwrap();

        let groups = hash
            .add(&single_column_page(ElementType::Long, longs(&[5, 3, 5, 9])))
            .unwrap();
        assert_eq!(longs(&[0, 1, 0, 2]), block_values(&groups));

        let groups = hash
            .add(&single_column_page(ElementType::Long, longs(&[9, 4, 3])))
            .unwrap();
        assert_eq!(longs(&[2, 3, 1]), block_values(&groups));

        assert_eq!(4, hash.group_count());
        assert_eq!(longs(&[5, 3, 9, 4]), block_values(&hash.keys().unwrap()));
        assert_eq!(
            vec![0, 1, 2, 3],
            hash.non_empty().iter().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn multivalued_and_null_positions() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash(0, ElementType::Bytes, &manager).unwrap();

        let page = single_column_page(
            ElementType::Bytes,
            vec![
                Value::Multi(vec!["a".into(), "b".into(), "a".into()]),
                Value::Null,
                "b".into(),
                Value::Multi(vec!["c".into(), "c".into()]),
            ],
        );
        let groups = hash.add(&page).unwrap();

        assert_eq!(
            vec![
                Value::Multi(vec![Value::Long(0), Value::Long(1)]),
                Value::Null,
                Value::Long(1),
                Value::Long(2),
            ],
            block_values(&groups)
        );
        assert_eq!(
            vec![Value::from("a"), Value::from("b"), Value::from("c")],
            block_values(&hash.keys().unwrap())
        );
    }

    #[test]
    fn constant_key_block() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash(0, ElementType::Int, &manager).unwrap();
        let page = Page::try_new([Block::from_vector(crate::arrays::vector::Vector::Int(
            TypedVector::new_constant(&8, 3),
        ))])
        .unwrap();

        let groups = hash.add(&page).unwrap();
        assert_eq!(longs(&[0, 0, 0]), block_values(&groups));
        assert_eq!(1, hash.group_count());
    }

    #[test]
    fn null_block_gives_null_groups() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash(0, ElementType::Double, &manager).unwrap();
        let page = Page::try_new([Block::new_constant_null(3)]).unwrap();
        let groups = hash.add(&page).unwrap();
        assert!(groups.all_null());
        assert_eq!(3, groups.position_count());
        assert_eq!(0, hash.group_count());
    }

    #[test]
    fn double_and_boolean_keys() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash(0, ElementType::Double, &manager).unwrap();
        let page = single_column_page(
            ElementType::Double,
            vec![1.5.into(), (-0.0).into(), 1.5.into(), f64::NAN.into()],
        );
        assert_eq!(longs(&[0, 1, 0, 2]), block_values(&hash.add(&page).unwrap()));

        let mut hash = new_block_hash(0, ElementType::Boolean, &manager).unwrap();
        let page = single_column_page(
            ElementType::Boolean,
            vec![true.into(), false.into(), true.into()],
        );
        assert_eq!(longs(&[0, 1, 0]), block_values(&hash.add(&page).unwrap()));
        assert_eq!(
            vec![Value::Bool(true), Value::Bool(false)],
            block_values(&hash.keys().unwrap())
        );
    }

    #[test]
    fn nan_keys_share_a_group() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash(0, ElementType::Double, &manager).unwrap();
        let page = single_column_page(
            ElementType::Double,
            vec![
                f64::NAN.into(),
                (-f64::NAN).into(),
                f64::from_bits(0x7ff8_0000_0000_0001).into(),
                0.0.into(),
                (-0.0).into(),
            ],
        );

        assert_eq!(longs(&[0, 0, 0, 1, 2]), block_values(&hash.add(&page).unwrap()));
        assert_eq!(3, hash.group_count());
    }

    #[test]
    fn multivalued_keys_with_sorting_dedupe() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash_with_threshold(0, ElementType::Long, 0, &manager).unwrap();
        let page = single_column_page(
            ElementType::Long,
            vec![
                Value::Multi(longs(&[9, 4, 9])),
                Value::Multi(longs(&[4, 4])),
            ],
        );

        // Sorted values are added in ascending order.
        assert_eq!(
            vec![Value::Multi(longs(&[0, 1])), Value::Long(0)],
            block_values(&hash.add(&page).unwrap())
        );
        assert_eq!(longs(&[4, 9]), block_values(&hash.keys().unwrap()));
    }

    #[test]
    fn keys_valid_after_close() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);
        let mut hash = new_block_hash(0, ElementType::Long, &manager).unwrap();
        hash.add(&single_column_page(ElementType::Long, longs(&[1, 2, 3])))
            .unwrap();

        let keys = hash.keys().unwrap();
        assert!(hash.memory_usage() > 0);
        hash.close();
        hash.close();

        assert_eq!(0, manager.reserved_bytes());
        assert_eq!(longs(&[1, 2, 3]), block_values(&keys));
    }

    #[test]
    fn wrong_key_type() {
        let manager = NopBufferManager::new_ref();
        let mut hash = new_block_hash(0, ElementType::Long, &manager).unwrap();
        let err = hash
            .add(&single_column_page(ElementType::Int, vec![1.into()]))
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsupportedType));

        let err = new_block_hash(0, ElementType::Null, &manager).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsupportedType));
    }
}
