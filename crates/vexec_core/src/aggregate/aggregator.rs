use std::fmt::Debug;

use vexec_error::{DbError, Result};

use super::state::AggregateState;
use super::{Aggregator, AggregatorMode, GroupingAggregator};
use crate::arrays::block::{Block, LongBlock, TypedBlock};
use crate::arrays::builder::TypedBlockBuilder;
use crate::arrays::element_type::ElementType;
use crate::arrays::page::Page;
use crate::arrays::value_buffer::{BytesBuffer, PrimitiveBuffer, PrimitiveValue, ValueBuffer};
use crate::arrays::vector::LongVector;
use crate::buffer::buffer_manager::{BufferManagerRef, Reservation, reserve_vec};

/// Call `f` with the position and value for every value in a block.
///
/// Null positions are skipped, multivalued positions call `f` once per value.
fn for_each_typed<B, F>(block: &TypedBlock<B>, mut f: F) -> Result<()>
where
    B: ValueBuffer,
    F: FnMut(usize, &B::Item) -> Result<()>,
{
    if let Some(vector) = block.as_vector() {
        for p in 0..vector.position_count() {
            f(p, vector.get(p))?;
        }
        return Ok(());
    }
    for p in 0..block.position_count() {
        for idx in block.value_range(p) {
            f(p, block.get_value(idx))?;
        }
    }
    Ok(())
}

fn unsupported_input(expected: &str, block: &Block) -> DbError {
    DbError::unsupported_type("Unsupported aggregate input block")
        .with_field("expected", expected)
        .with_field("got", block.element_type())
}

/// Raw input value consumed by an aggregate state.
pub trait InputValue: Copy + Debug + Send + Sync + 'static {
    /// Call `f` with the position and value of every value in the block.
    fn for_each_value<F>(block: &Block, f: F) -> Result<()>
    where
        F: FnMut(usize, Self) -> Result<()>;
}

impl InputValue for i64 {
    fn for_each_value<F>(block: &Block, mut f: F) -> Result<()>
    where
        F: FnMut(usize, Self) -> Result<()>,
    {
        match block {
            Block::Null(_) => Ok(()),
            Block::Int(b) => for_each_typed(b, |p, &v| f(p, v as i64)),
            Block::Long(b) => for_each_typed(b, |p, &v| f(p, v)),
            other => Err(unsupported_input("int or long", other)),
        }
    }
}

impl InputValue for f64 {
    fn for_each_value<F>(block: &Block, mut f: F) -> Result<()>
    where
        F: FnMut(usize, Self) -> Result<()>,
    {
        match block {
            Block::Null(_) => Ok(()),
            Block::Int(b) => for_each_typed(b, |p, &v| f(p, v as f64)),
            Block::Long(b) => for_each_typed(b, |p, &v| f(p, v as f64)),
            Block::Double(b) => for_each_typed(b, |p, &v| f(p, v)),
            other => Err(unsupported_input("numeric", other)),
        }
    }
}

/// Any value, used for counting.
impl InputValue for () {
    fn for_each_value<F>(block: &Block, mut f: F) -> Result<()>
    where
        F: FnMut(usize, Self) -> Result<()>,
    {
        match block {
            Block::Null(_) => Ok(()),
            Block::Int(b) => for_each_typed(b, |p, _| f(p, ())),
            Block::Long(b) => for_each_typed(b, |p, _| f(p, ())),
            Block::Double(b) => for_each_typed(b, |p, _| f(p, ())),
            Block::Bytes(b) => for_each_typed(b, |p, _| f(p, ())),
            Block::Boolean(b) => for_each_typed(b, |p, _| f(p, ())),
        }
    }
}

/// Final value produced by an aggregate state.
pub trait OutputValue: PrimitiveValue + Send + Sync + 'static {
    fn build_block<I>(values: I, manager: &BufferManagerRef) -> Result<Block>
    where
        I: IntoIterator<Item = Option<Self>>,
    {
        let mut builder = TypedBlockBuilder::<PrimitiveBuffer<Self>>::new(manager);
        for value in values {
            match value {
                Some(v) => builder.append_value(&v)?,
                None => builder.append_null()?,
            }
        }
        Ok(PrimitiveBuffer::<Self>::into_block(builder.build()?))
    }
}

impl OutputValue for i64 {}
impl OutputValue for f64 {}

/// Build the final or intermediate output for a sequence of states.
fn evaluate_states<'a, S, I>(
    mode: AggregatorMode,
    states: I,
    manager: &BufferManagerRef,
) -> Result<Block>
where
    S: AggregateState,
    I: IntoIterator<Item = &'a S>,
{
    if mode.is_output_final() {
        return S::Output::build_block(states.into_iter().map(|s| s.finalize()), manager);
    }

    let mut buf = vec![0; S::SIZE];
    let mut builder = TypedBlockBuilder::<BytesBuffer>::new(manager);
    for state in states {
        state.serialize(&mut buf, 0);
        builder.append_value(&buf)?;
    }
    Ok(Block::Bytes(builder.build()?))
}

/// Deserialize every intermediate state in a block.
fn for_each_intermediate<S, F>(block: &Block, mut f: F) -> Result<()>
where
    S: AggregateState,
    F: FnMut(usize, S) -> Result<()>,
{
    match block {
        Block::Null(_) => Ok(()),
        Block::Bytes(b) => for_each_typed(b, |p, bytes| {
            if bytes.len() != S::SIZE {
                return Err(DbError::new("Unexpected intermediate state size")
                    .with_field("expected", S::SIZE)
                    .with_field("got", bytes.len()));
            }
            f(p, S::deserialize(bytes, 0)?)
        }),
        other => Err(unsupported_input("bytes", other)),
    }
}

/// Aggregator producing a single row.
#[derive(Debug)]
pub struct UngroupedAggregator<S: AggregateState> {
    channel: usize,
    mode: AggregatorMode,
    state: S,
    manager: BufferManagerRef,
    reservation: Reservation,
}

impl<S: AggregateState> UngroupedAggregator<S> {
    pub fn try_new(channel: usize, mode: AggregatorMode, manager: &BufferManagerRef) -> Result<Self> {
        Ok(UngroupedAggregator {
            channel,
            mode,
            state: S::default(),
            manager: manager.clone(),
            reservation: Reservation::try_with_size(manager, std::mem::size_of::<S>())?,
        })
    }
}

impl<S: AggregateState> Aggregator for UngroupedAggregator<S> {
    fn process_page(&mut self, page: &Page) -> Result<()> {
        let block = page.block(self.channel)?;
        let state = &mut self.state;
        if self.mode.is_input_raw() {
            S::Input::for_each_value(block, |_, v| state.update(v))
        } else {
            for_each_intermediate::<S, _>(block, |_, other| state.merge(&other))
        }
    }

    fn evaluate(&self) -> Result<Block> {
        evaluate_states(self.mode, [&self.state], &self.manager)
    }

    fn output_type(&self) -> ElementType {
        output_type::<S>(self.mode)
    }

    fn memory_usage(&self) -> usize {
        self.reservation.size()
    }

    fn close(&mut self) {
        self.state = S::default();
        self.reservation.release_all();
    }
}

pub(crate) fn output_type<S: AggregateState>(mode: AggregatorMode) -> ElementType {
    if mode.is_output_final() {
        S::Output::ELEMENT_TYPE
    } else {
        ElementType::Bytes
    }
}

/// States indexed by group id, grown on demand.
#[derive(Debug)]
struct GroupStates<S> {
    states: Vec<S>,
    reservation: Reservation,
}

impl<S: AggregateState> GroupStates<S> {
    fn get_mut(&mut self, group: i64) -> Result<&mut S> {
        let idx = usize::try_from(group)
            .map_err(|_| DbError::new("Negative group id").with_field("group", group))?;
        if idx >= self.states.len() {
            let additional = idx + 1 - self.states.len();
            reserve_vec(&mut self.states, additional, &mut self.reservation)?;
            self.states.resize_with(idx + 1, S::default);
        }
        Ok(&mut self.states[idx])
    }
}

/// Aggregator producing a row per group.
#[derive(Debug)]
pub struct GroupedAggregator<S: AggregateState> {
    channel: usize,
    mode: AggregatorMode,
    states: GroupStates<S>,
    manager: BufferManagerRef,
}

impl<S: AggregateState> GroupedAggregator<S> {
    pub fn new(channel: usize, mode: AggregatorMode, manager: &BufferManagerRef) -> Self {
        GroupedAggregator {
            channel,
            mode,
            states: GroupStates {
                states: Vec::new(),
                reservation: Reservation::new(manager),
            },
            manager: manager.clone(),
        }
    }
}

/// Group ids for a page, `None` if every group id is null.
fn group_id_block<'a>(group_ids: &'a Block, page: &Page) -> Result<Option<&'a LongBlock>> {
    if group_ids.position_count() != page.position_count() {
        return Err(DbError::new("Group ids do not match page positions")
            .with_field("group_ids", group_ids.position_count())
            .with_field("page", page.position_count()));
    }
    match group_ids {
        Block::Null(_) => Ok(None),
        Block::Long(b) => Ok(Some(b)),
        other => Err(unsupported_input("long group ids", other)),
    }
}

impl<S: AggregateState> GroupingAggregator for GroupedAggregator<S> {
    fn process_page(&mut self, group_ids: &Block, page: &Page) -> Result<()> {
        let ids = match group_id_block(group_ids, page)? {
            Some(ids) => ids,
            None => return Ok(()),
        };
        let block = page.block(self.channel)?;
        let states = &mut self.states;

        if self.mode.is_input_raw() {
            S::Input::for_each_value(block, |p, v| {
                for &group in ids.values(p) {
                    states.get_mut(group)?.update(v)?;
                }
                Ok(())
            })
        } else {
            for_each_intermediate::<S, _>(block, |p, other| {
                for &group in ids.values(p) {
                    states.get_mut(group)?.merge(&other)?;
                }
                Ok(())
            })
        }
    }

    fn evaluate(&self, selected: &LongVector) -> Result<Block> {
        let empty = S::default();
        let states = selected.iter().map(|&group| {
            usize::try_from(group)
                .ok()
                .and_then(|idx| self.states.states.get(idx))
                .unwrap_or(&empty)
        });
        evaluate_states(self.mode, states, &self.manager)
    }

    fn output_type(&self) -> ElementType {
        output_type::<S>(self.mode)
    }

    fn memory_usage(&self) -> usize {
        self.states.reservation.size()
    }

    fn close(&mut self) {
        self.states.states = Vec::new();
        self.states.reservation.release_all();
    }
}
