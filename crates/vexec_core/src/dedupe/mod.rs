//! Removes duplicate values from multivalued positions.
//!
//! Three strategies produce the same set of values per position:
//!
//! - copy missing: keep the first occurrence of each value, scanning every
//!   retained value for each candidate. Quadratic, but fast for small
//!   positions and preserves first-seen order.
//! - copy and sort: sort the position then collapse runs. Output is ascending.
//! - adaptive: copy missing below a threshold, copy and sort above.

use std::cmp::Ordering;

use vexec_error::Result;

use crate::arrays::block::{Block, TypedBlock};
use crate::arrays::builder::TypedBlockBuilder;
use crate::arrays::value_buffer::{LongBuffer, ValueBuffer, VectorValue};
use crate::buffer::buffer_manager::{BufferManagerRef, Reservation, reserve_vec};
use crate::hash::ord_to_group;

/// Positions with fewer values than this are deduplicated with copy missing.
pub const ALWAYS_COPY_MISSING: usize = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Adaptive,
    CopyAndSort,
    CopyMissing,
}

/// Deduplicates the positions of a single block.
#[derive(Debug)]
pub struct MultivalueDedupe<'a, B: ValueBuffer> {
    block: &'a TypedBlock<B>,
    manager: BufferManagerRef,
    threshold: usize,
    /// Value indexes retained for the current position.
    work: Vec<usize>,
    reservation: Reservation,
}

impl<'a, B: ValueBuffer> MultivalueDedupe<'a, B> {
    pub fn new(block: &'a TypedBlock<B>, manager: &BufferManagerRef) -> Self {
        MultivalueDedupe {
            block,
            manager: manager.clone(),
            threshold: ALWAYS_COPY_MISSING,
            work: Vec::new(),
            reservation: Reservation::new(manager),
        }
    }

    /// Set the value count at which the adaptive strategy switches to
    /// sorting.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn dedupe_to_block_adaptive(&mut self) -> Result<TypedBlock<B>> {
        self.dedupe_to_block(Strategy::Adaptive)
    }

    pub fn dedupe_to_block_using_copy_and_sort(&mut self) -> Result<TypedBlock<B>> {
        self.dedupe_to_block(Strategy::CopyAndSort)
    }

    pub fn dedupe_to_block_using_copy_missing(&mut self) -> Result<TypedBlock<B>> {
        self.dedupe_to_block(Strategy::CopyMissing)
    }

    /// Deduplicate each position then add every retained value to a hash,
    /// producing a long block of group ids.
    ///
    /// This is how block hashes resolve keys that aren't a plain vector.
    /// `add` follows the hash convention of returning `-1 - id` for newly
    /// inserted values. A position left with a single value after
    /// deduplication gets a single group id.
    pub fn hash_add<F>(&mut self, mut add: F) -> Result<Block>
    where
        F: FnMut(&B::Item) -> Result<i64>,
    {
        let block = self.block;
        let mut builder =
            TypedBlockBuilder::<LongBuffer>::try_with_capacity(&self.manager, block.position_count())?;

        for p in 0..block.position_count() {
            match block.value_count(p) {
                0 => builder.append_null()?,
                1 => {
                    let group = ord_to_group(add(block.get_value(block.first_value_index(p)))?);
                    builder.append_value(&group)?;
                }
                _ => {
                    self.dedupe_position(p, Strategy::Adaptive)?;
                    if let [idx] = self.work.as_slice() {
                        builder.append_value(&ord_to_group(add(block.get_value(*idx))?))?;
                        continue;
                    }
                    builder.begin_position_entry()?;
                    for &idx in &self.work {
                        builder.append_value(&ord_to_group(add(block.get_value(idx))?))?;
                    }
                    builder.end_position_entry()?;
                }
            }
        }

        Ok(Block::Long(builder.build()?))
    }

    fn dedupe_to_block(&mut self, strategy: Strategy) -> Result<TypedBlock<B>> {
        let block = self.block;
        if !block.may_have_multivalued() {
            return Ok(block.clone());
        }

        let mut builder = TypedBlockBuilder::<B>::try_with_capacity(&self.manager, block.position_count())?;
        for p in 0..block.position_count() {
            match block.value_count(p) {
                0 => builder.append_null()?,
                1 => builder.append_value_from(block, block.first_value_index(p))?,
                _ => {
                    self.dedupe_position(p, strategy)?;
                    if let [idx] = self.work.as_slice() {
                        builder.append_value_from(block, *idx)?;
                    } else {
                        builder.begin_position_entry()?;
                        for &idx in &self.work {
                            builder.append_value_from(block, idx)?;
                        }
                        builder.end_position_entry()?;
                    }
                }
            }
        }

        builder.build()
    }

    /// Fill `work` with the distinct value indexes of a position.
    fn dedupe_position(&mut self, position: usize, strategy: Strategy) -> Result<()> {
        let range = self.block.value_range(position);
        let strategy = match strategy {
            Strategy::Adaptive if range.len() < self.threshold => Strategy::CopyMissing,
            Strategy::Adaptive => Strategy::CopyAndSort,
            other => other,
        };

        self.work.clear();
        reserve_vec(&mut self.work, range.len(), &mut self.reservation)?;

        let block = self.block;
        match strategy {
            Strategy::CopyMissing => {
                for idx in range {
                    let value = block.get_value(idx);
                    if !self
                        .work
                        .iter()
                        .any(|&kept| block.get_value(kept).value_eq(value))
                    {
                        self.work.push(idx);
                    }
                }
            }
            _ => {
                self.work.extend(range);
                self.work
                    .sort_by(|&a, &b| block.get_value(a).value_cmp(block.get_value(b)));
                self.work.dedup_by(|&mut a, &mut b| {
                    block.get_value(a).value_cmp(block.get_value(b)) == Ordering::Equal
                });
            }
        }

        Ok(())
    }
}

/// Deduplicate a block of any element type using the adaptive strategy.
pub fn dedupe_block(block: &Block, threshold: usize, manager: &BufferManagerRef) -> Result<Block> {
    Ok(match block {
        Block::Null(n) => Block::Null(*n),
        Block::Int(b) => Block::Int(adaptive(b, threshold, manager)?),
        Block::Long(b) => Block::Long(adaptive(b, threshold, manager)?),
        Block::Double(b) => Block::Double(adaptive(b, threshold, manager)?),
        Block::Bytes(b) => Block::Bytes(adaptive(b, threshold, manager)?),
        Block::Boolean(b) => Block::Boolean(adaptive(b, threshold, manager)?),
    })
}

fn adaptive<B: ValueBuffer>(
    block: &TypedBlock<B>,
    threshold: usize,
    manager: &BufferManagerRef,
) -> Result<TypedBlock<B>> {
    MultivalueDedupe::new(block, manager)
        .with_threshold(threshold)
        .dedupe_to_block_adaptive()
}
