use std::fmt::Debug;
use std::marker::PhantomData;

use bytes::{Buf, BufMut};
use vexec_error::{DbError, Result};

use super::aggregator::{InputValue, OutputValue};
use crate::arrays::value_buffer::{VectorValue, ensure_remaining};

/// Accumulator for a single aggregate.
///
/// States serialize to a fixed number of bytes so that intermediate results
/// can be handed between stages as a bytes block with one state per position.
pub trait AggregateState: Default + Debug + Send + Sync + 'static {
    type Input: InputValue;
    type Output: OutputValue;

    /// Serialized size in bytes.
    const SIZE: usize;

    /// Update this state with some input.
    fn update(&mut self, input: Self::Input) -> Result<()>;

    /// Merge other state into this state.
    fn merge(&mut self, other: &Self) -> Result<()>;

    /// Produce the final value, `None` for null.
    fn finalize(&self) -> Option<Self::Output>;

    /// Write exactly `SIZE` bytes at `offset`, returning bytes written.
    ///
    /// Panics if the buffer is too small.
    fn serialize(&self, buf: &mut [u8], offset: usize) -> usize;

    /// Read a state previously written by `serialize`.
    fn deserialize(buf: &[u8], offset: usize) -> Result<Self>;
}

fn state_bytes(buf: &[u8], offset: usize, size: usize) -> Result<&[u8]> {
    let bytes = buf.get(offset..).unwrap_or_default();
    ensure_remaining(&bytes, size)?;
    Ok(bytes)
}

/// Count of non-null values.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CountState {
    count: i64,
}

impl AggregateState for CountState {
    type Input = ();
    type Output = i64;

    const SIZE: usize = 8;

    fn update(&mut self, _input: ()) -> Result<()> {
        self.count += 1;
        Ok(())
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        self.count += other.count;
        Ok(())
    }

    fn finalize(&self) -> Option<i64> {
        Some(self.count)
    }

    fn serialize(&self, buf: &mut [u8], offset: usize) -> usize {
        let mut out = &mut buf[offset..];
        out.put_i64_le(self.count);
        Self::SIZE
    }

    fn deserialize(buf: &[u8], offset: usize) -> Result<Self> {
        let mut buf = state_bytes(buf, offset, Self::SIZE)?;
        Ok(CountState {
            count: buf.get_i64_le(),
        })
    }
}

/// Integer sum, errors on overflow.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SumLongState {
    sum: i64,
}

fn checked_add(a: i64, b: i64) -> Result<i64> {
    a.checked_add(b).ok_or_else(|| {
        DbError::new("Long overflow")
            .with_field("left", a)
            .with_field("right", b)
    })
}

impl AggregateState for SumLongState {
    type Input = i64;
    type Output = i64;

    const SIZE: usize = 8;

    fn update(&mut self, input: i64) -> Result<()> {
        self.sum = checked_add(self.sum, input)?;
        Ok(())
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        self.update(other.sum)
    }

    fn finalize(&self) -> Option<i64> {
        Some(self.sum)
    }

    fn serialize(&self, buf: &mut [u8], offset: usize) -> usize {
        let mut out = &mut buf[offset..];
        out.put_i64_le(self.sum);
        Self::SIZE
    }

    fn deserialize(buf: &[u8], offset: usize) -> Result<Self> {
        let mut buf = state_bytes(buf, offset, Self::SIZE)?;
        Ok(SumLongState {
            sum: buf.get_i64_le(),
        })
    }
}

/// Kahan summation of doubles.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CompensatedSumState {
    value: f64,
    delta: f64,
}

impl CompensatedSumState {
    fn add(&mut self, value: f64, delta: f64) {
        if !value.is_finite() || !self.value.is_finite() {
            // Compensation is meaningless once infinities or NaNs are involved.
            self.value += value;
            return;
        }
        let corrected = value + (self.delta + delta);
        let updated = self.value + corrected;
        self.delta = corrected - (updated - self.value);
        self.value = updated;
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl AggregateState for CompensatedSumState {
    type Input = f64;
    type Output = f64;

    const SIZE: usize = 16;

    fn update(&mut self, input: f64) -> Result<()> {
        self.add(input, 0.0);
        Ok(())
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        self.add(other.value, other.delta);
        Ok(())
    }

    fn finalize(&self) -> Option<f64> {
        Some(self.value)
    }

    fn serialize(&self, buf: &mut [u8], offset: usize) -> usize {
        let mut out = &mut buf[offset..];
        out.put_f64_le(self.value);
        out.put_f64_le(self.delta);
        Self::SIZE
    }

    fn deserialize(buf: &[u8], offset: usize) -> Result<Self> {
        let mut buf = state_bytes(buf, offset, Self::SIZE)?;
        Ok(CompensatedSumState {
            value: buf.get_f64_le(),
            delta: buf.get_f64_le(),
        })
    }
}

/// Fixed-width value held by an extreme state.
pub trait ExtremeValue: VectorValue + InputValue + OutputValue + Copy + Default {
    fn put<W: BufMut>(self, buf: &mut W);
    fn get<R: Buf>(buf: &mut R) -> Self;
}

impl ExtremeValue for i64 {
    fn put<W: BufMut>(self, buf: &mut W) {
        buf.put_i64_le(self)
    }

    fn get<R: Buf>(buf: &mut R) -> Self {
        buf.get_i64_le()
    }
}

impl ExtremeValue for f64 {
    fn put<W: BufMut>(self, buf: &mut W) {
        buf.put_f64_le(self)
    }

    fn get<R: Buf>(buf: &mut R) -> Self {
        buf.get_f64_le()
    }
}

/// Picks which of two values an extreme state keeps.
pub trait Extreme: Debug + Default + Send + Sync + 'static {
    /// If `candidate` should replace `current`.
    fn replaces<T: VectorValue>(current: &T, candidate: &T) -> bool;
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Max;

impl Extreme for Max {
    fn replaces<T: VectorValue>(current: &T, candidate: &T) -> bool {
        candidate.value_cmp(current).is_gt()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Min;

impl Extreme for Min {
    fn replaces<T: VectorValue>(current: &T, candidate: &T) -> bool {
        candidate.value_cmp(current).is_lt()
    }
}

/// Min or max of values, null if no values were seen.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ExtremeState<T, E> {
    value: T,
    seen: bool,
    _e: PhantomData<E>,
}

impl<T: ExtremeValue, E: Extreme> AggregateState for ExtremeState<T, E> {
    type Input = T;
    type Output = T;

    const SIZE: usize = 9;

    fn update(&mut self, input: T) -> Result<()> {
        if !self.seen || E::replaces(&self.value, &input) {
            self.value = input;
            self.seen = true;
        }
        Ok(())
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        if other.seen {
            self.update(other.value)?;
        }
        Ok(())
    }

    fn finalize(&self) -> Option<T> {
        self.seen.then_some(self.value)
    }

    fn serialize(&self, buf: &mut [u8], offset: usize) -> usize {
        let mut out = &mut buf[offset..];
        self.value.put(&mut out);
        out.put_u8(self.seen as u8);
        Self::SIZE
    }

    fn deserialize(buf: &[u8], offset: usize) -> Result<Self> {
        let mut buf = state_bytes(buf, offset, Self::SIZE)?;
        Ok(ExtremeState {
            value: T::get(&mut buf),
            seen: buf.get_u8() != 0,
            _e: PhantomData,
        })
    }
}

pub type MaxLongState = ExtremeState<i64, Max>;
pub type MinLongState = ExtremeState<i64, Min>;
pub type MaxDoubleState = ExtremeState<f64, Max>;
pub type MinDoubleState = ExtremeState<f64, Min>;

/// Average of integers, null if count is zero.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LongAvgState {
    sum: i64,
    count: i64,
}

impl AggregateState for LongAvgState {
    type Input = i64;
    type Output = f64;

    const SIZE: usize = 16;

    fn update(&mut self, input: i64) -> Result<()> {
        self.sum = checked_add(self.sum, input)?;
        self.count += 1;
        Ok(())
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        self.sum = checked_add(self.sum, other.sum)?;
        self.count += other.count;
        Ok(())
    }

    fn finalize(&self) -> Option<f64> {
        (self.count != 0).then(|| self.sum as f64 / self.count as f64)
    }

    fn serialize(&self, buf: &mut [u8], offset: usize) -> usize {
        let mut out = &mut buf[offset..];
        out.put_i64_le(self.sum);
        out.put_i64_le(self.count);
        Self::SIZE
    }

    fn deserialize(buf: &[u8], offset: usize) -> Result<Self> {
        let mut buf = state_bytes(buf, offset, Self::SIZE)?;
        Ok(LongAvgState {
            sum: buf.get_i64_le(),
            count: buf.get_i64_le(),
        })
    }
}

/// Average of doubles using a compensated sum.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DoubleAvgState {
    sum: CompensatedSumState,
    count: i64,
}

impl AggregateState for DoubleAvgState {
    type Input = f64;
    type Output = f64;

    const SIZE: usize = CompensatedSumState::SIZE + 8;

    fn update(&mut self, input: f64) -> Result<()> {
        self.sum.update(input)?;
        self.count += 1;
        Ok(())
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        self.sum.merge(&other.sum)?;
        self.count += other.count;
        Ok(())
    }

    fn finalize(&self) -> Option<f64> {
        (self.count != 0).then(|| self.sum.value() / self.count as f64)
    }

    fn serialize(&self, buf: &mut [u8], offset: usize) -> usize {
        let n = self.sum.serialize(buf, offset);
        let mut rest = &mut buf[offset + n..];
        rest.put_i64_le(self.count);
        Self::SIZE
    }

    fn deserialize(buf: &[u8], offset: usize) -> Result<Self> {
        let sum = CompensatedSumState::deserialize(buf, offset)?;
        let mut rest = state_bytes(buf, offset + CompensatedSumState::SIZE, 8)?;
        Ok(DoubleAvgState {
            sum,
            count: rest.get_i64_le(),
        })
    }
}
