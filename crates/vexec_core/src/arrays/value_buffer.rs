use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hasher;

use bytes::{Buf, BufMut};
use vexec_error::{DbError, Result};

use super::block::{Block, TypedBlock};
use super::element_type::ElementType;
use crate::buffer::buffer_manager::{Reservation, next_capacity, reserve_vec};

/// A single value stored in a vector.
///
/// Equality, ordering and hashing are total so that they can be used for
/// grouping and deduplication. Doubles compare by their bit pattern for
/// equality, with every NaN collapsed to a single pattern, and by `total_cmp`
/// for ordering.
pub trait VectorValue: Debug + Send + Sync + 'static {
    fn value_eq(&self, other: &Self) -> bool;
    fn value_cmp(&self, other: &Self) -> Ordering;
    fn hash_value<H: Hasher>(&self, state: &mut H);
}

macro_rules! impl_ord_vector_value {
    ($($t:ty),*) => {
        $(
            impl VectorValue for $t {
                fn value_eq(&self, other: &Self) -> bool {
                    self == other
                }

                fn value_cmp(&self, other: &Self) -> Ordering {
                    self.cmp(other)
                }

                fn hash_value<H: Hasher>(&self, state: &mut H) {
                    std::hash::Hash::hash(self, state)
                }
            }
        )*
    };
}

impl_ord_vector_value!(i32, i64, bool, [u8]);

/// Bit pattern of a double used for equality and hashing.
///
/// All NaNs map to the same pattern. Negative and positive zero stay distinct.
pub fn canonical_double_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

impl VectorValue for f64 {
    fn value_eq(&self, other: &Self) -> bool {
        canonical_double_bits(*self) == canonical_double_bits(*other)
    }

    fn value_cmp(&self, other: &Self) -> Ordering {
        f64::from_bits(canonical_double_bits(*self))
            .total_cmp(&f64::from_bits(canonical_double_bits(*other)))
    }

    fn hash_value<H: Hasher>(&self, state: &mut H) {
        state.write_u64(canonical_double_bits(*self))
    }
}

/// Flat storage for the values of a vector.
///
/// The storage is append-only while building, and immutable once wrapped in a
/// vector.
pub trait ValueBuffer: Debug + Clone + Default + Send + Sync + 'static {
    type Item: VectorValue + ?Sized;

    const ELEMENT_TYPE: ElementType;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the value at an index.
    ///
    /// Panics if out of bounds.
    fn get(&self, idx: usize) -> &Self::Item;

    /// Push a value without accounting for any growth.
    fn push(&mut self, value: &Self::Item);

    /// Ensure there's room to push `value`, growing geometrically and
    /// accounting the growth against the reservation.
    fn reserve_for(&mut self, value: &Self::Item, reservation: &mut Reservation) -> Result<()>;

    fn write_value<W: BufMut>(value: &Self::Item, buf: &mut W);

    /// Decode a single value and push it onto this buffer.
    fn read_value<R: Buf>(&mut self, buf: &mut R) -> Result<()>;

    fn into_block(block: TypedBlock<Self>) -> Block;

    /// Try to get a typed reference to a block of this buffer's type.
    fn block_ref(block: &Block) -> Option<&TypedBlock<Self>>;
}

pub(crate) fn ensure_remaining<R: Buf>(buf: &R, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(DbError::new("Unexpected end of buffer")
            .with_field("needed", needed)
            .with_field("remaining", buf.remaining()));
    }
    Ok(())
}

/// Fixed-width value that can be stored in a [`PrimitiveBuffer`].
pub trait PrimitiveValue: VectorValue + Copy + Default + PartialEq {
    const ELEMENT_TYPE: ElementType;

    fn write<W: BufMut>(self, buf: &mut W);
    fn read<R: Buf>(buf: &mut R) -> Result<Self>;

    fn wrap_block(block: TypedBlock<PrimitiveBuffer<Self>>) -> Block;
    fn block_ref(block: &Block) -> Option<&TypedBlock<PrimitiveBuffer<Self>>>;
}

macro_rules! impl_primitive_value {
    ($t:ty, $elem:ident, $size:expr, $put:ident, $get:ident) => {
        impl PrimitiveValue for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$elem;

            fn write<W: BufMut>(self, buf: &mut W) {
                buf.$put(self)
            }

            fn read<R: Buf>(buf: &mut R) -> Result<Self> {
                ensure_remaining(buf, $size)?;
                Ok(buf.$get())
            }

            fn wrap_block(block: TypedBlock<PrimitiveBuffer<Self>>) -> Block {
                Block::$elem(block)
            }

            fn block_ref(block: &Block) -> Option<&TypedBlock<PrimitiveBuffer<Self>>> {
                match block {
                    Block::$elem(b) => Some(b),
                    _ => None,
                }
            }
        }
    };
}

impl_primitive_value!(i32, Int, 4, put_i32_le, get_i32_le);
impl_primitive_value!(i64, Long, 8, put_i64_le, get_i64_le);
impl_primitive_value!(f64, Double, 8, put_f64_le, get_f64_le);

impl PrimitiveValue for bool {
    const ELEMENT_TYPE: ElementType = ElementType::Boolean;

    fn write<W: BufMut>(self, buf: &mut W) {
        buf.put_u8(self as u8)
    }

    fn read<R: Buf>(buf: &mut R) -> Result<Self> {
        ensure_remaining(buf, 1)?;
        match buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DbError::new("Invalid boolean byte").with_field("byte", other)),
        }
    }

    fn wrap_block(block: TypedBlock<PrimitiveBuffer<Self>>) -> Block {
        Block::Boolean(block)
    }

    fn block_ref(block: &Block) -> Option<&TypedBlock<PrimitiveBuffer<Self>>> {
        match block {
            Block::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

/// Storage for fixed-width values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimitiveBuffer<T> {
    values: Vec<T>,
}

impl<T: PrimitiveValue> PrimitiveBuffer<T> {
    pub fn with_capacity(cap: usize) -> Self {
        PrimitiveBuffer {
            values: Vec::with_capacity(cap),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }
}

impl<T: PrimitiveValue> From<Vec<T>> for PrimitiveBuffer<T> {
    fn from(values: Vec<T>) -> Self {
        PrimitiveBuffer { values }
    }
}

impl<T: PrimitiveValue> ValueBuffer for PrimitiveBuffer<T> {
    type Item = T;

    const ELEMENT_TYPE: ElementType = T::ELEMENT_TYPE;

    fn len(&self) -> usize {
        self.values.len()
    }

    fn get(&self, idx: usize) -> &T {
        &self.values[idx]
    }

    fn push(&mut self, value: &T) {
        self.values.push(*value)
    }

    fn reserve_for(&mut self, _value: &T, reservation: &mut Reservation) -> Result<()> {
        reserve_vec(&mut self.values, 1, reservation)
    }

    fn write_value<W: BufMut>(value: &T, buf: &mut W) {
        value.write(buf)
    }

    fn read_value<R: Buf>(&mut self, buf: &mut R) -> Result<()> {
        self.values.push(T::read(buf)?);
        Ok(())
    }

    fn into_block(block: TypedBlock<Self>) -> Block {
        T::wrap_block(block)
    }

    fn block_ref(block: &Block) -> Option<&TypedBlock<Self>> {
        T::block_ref(block)
    }
}

/// Storage for variable length byte strings.
///
/// Values are stored back to back in `data`, `offsets` holds `len + 1`
/// entries with value `i` spanning `offsets[i]..offsets[i + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BytesBuffer {
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl Default for BytesBuffer {
    fn default() -> Self {
        BytesBuffer {
            offsets: vec![0],
            data: Vec::new(),
        }
    }
}

impl<V: AsRef<[u8]>> FromIterator<V> for BytesBuffer {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        let mut buf = BytesBuffer::default();
        for v in iter {
            buf.push(v.as_ref());
        }
        buf
    }
}

impl ValueBuffer for BytesBuffer {
    type Item = [u8];

    const ELEMENT_TYPE: ElementType = ElementType::Bytes;

    fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    fn get(&self, idx: usize) -> &[u8] {
        &self.data[self.offsets[idx]..self.offsets[idx + 1]]
    }

    fn push(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
        self.offsets.push(self.data.len());
    }

    fn reserve_for(&mut self, value: &[u8], reservation: &mut Reservation) -> Result<()> {
        reserve_vec(&mut self.offsets, 1, reservation)?;
        let needed = self.data.len() + value.len();
        if needed > self.data.capacity() {
            let new_cap = next_capacity(self.data.capacity(), needed);
            reservation.grow(new_cap - self.data.capacity())?;
            self.data.reserve_exact(new_cap - self.data.len());
        }
        Ok(())
    }

    fn write_value<W: BufMut>(value: &[u8], buf: &mut W) {
        super::wire::write_vint(buf, value.len() as u64);
        buf.put_slice(value);
    }

    fn read_value<R: Buf>(&mut self, buf: &mut R) -> Result<()> {
        let len = super::wire::read_vint(buf)? as usize;
        ensure_remaining(buf, len)?;
        let start = self.data.len();
        self.data.resize(start + len, 0);
        buf.copy_to_slice(&mut self.data[start..]);
        self.offsets.push(self.data.len());
        Ok(())
    }

    fn into_block(block: TypedBlock<Self>) -> Block {
        Block::Bytes(block)
    }

    fn block_ref(block: &Block) -> Option<&TypedBlock<Self>> {
        match block {
            Block::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

pub type IntBuffer = PrimitiveBuffer<i32>;
pub type LongBuffer = PrimitiveBuffer<i64>;
pub type DoubleBuffer = PrimitiveBuffer<f64>;
pub type BooleanBuffer = PrimitiveBuffer<bool>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::buffer_manager::{BufferManagerRef, TrackingBufferManager};

    #[test]
    fn bytes_buffer_get() {
        let buf: BytesBuffer = ["a", "", "hello"].into_iter().collect();
        assert_eq!(3, buf.len());
        assert_eq!(b"a", buf.get(0));
        assert_eq!(b"", buf.get(1));
        assert_eq!(b"hello", buf.get(2));
    }

    #[test]
    fn double_equality_by_bits() {
        assert!(f64::NAN.value_eq(&f64::NAN));
        assert!(!0.0_f64.value_eq(&-0.0));
        assert_eq!(Ordering::Less, (-0.0_f64).value_cmp(&0.0));
    }

    #[test]
    fn nan_payloads_are_equal() {
        let other_nan = f64::from_bits(0x7ff8_0000_0000_0001);
        for nan in [-f64::NAN, other_nan] {
            assert!(f64::NAN.value_eq(&nan));
            assert_eq!(Ordering::Equal, f64::NAN.value_cmp(&nan));
            assert_eq!(canonical_double_bits(f64::NAN), canonical_double_bits(nan));
        }
        assert_eq!(Ordering::Greater, (-f64::NAN).value_cmp(&f64::INFINITY));
    }

    #[test]
    fn bytes_reserve_accounts_payload() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);
        let mut reservation = Reservation::new(&manager);
        let mut buf = BytesBuffer::default();

        let value = vec![7_u8; 100];
        buf.reserve_for(&value, &mut reservation).unwrap();
        buf.push(&value);

        assert!(reservation.size() >= 100);
        assert_eq!(reservation.size(), manager.reserved_bytes());
    }
}
