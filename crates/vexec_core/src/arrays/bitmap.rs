use std::fmt;

use vexec_error::{DbError, Result};

/// An LSB ordered bitmap.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    data: Vec<u8>,
}

impl Bitmap {
    /// Create a bitmap from raw LSB ordered bytes.
    pub fn try_new(data: Vec<u8>, len: usize) -> Result<Self> {
        if data.len() != len.div_ceil(8) {
            return Err(DbError::new("Bitmap byte length does not match bit length")
                .with_field("bytes", data.len())
                .with_field("len", len));
        }
        Ok(Bitmap { len, data })
    }

    pub fn with_capacity(cap: usize) -> Self {
        Bitmap {
            len: 0,
            data: Vec::with_capacity(cap.div_ceil(8)),
        }
    }

    pub fn new_with_all_false(len: usize) -> Self {
        Bitmap {
            len,
            data: vec![0; len.div_ceil(8)],
        }
    }

    /// Get the number of bits being tracked by this bitmap.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw bytes backing the bitmap.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn count_trues(&self) -> usize {
        let mut count = self
            .data
            .iter()
            .map(|&b| b.count_ones())
            .fold(0, |acc, v| acc + (v as usize));

        // Only count bits making up the logical portion of the bitmap.
        let rem = self.len % 8;
        if rem != 0 {
            if let Some(last) = self.data.last() {
                count -= last.count_ones() as usize;
                let mask = (255 << (8 - rem)) >> (8 - rem);
                count += (mask & last).count_ones() as usize;
            }
        }

        count
    }

    pub fn has_any_true(&self) -> bool {
        self.count_trues() > 0
    }

    /// Push a value onto the end of the bitmap.
    pub fn push(&mut self, val: bool) {
        if self.len == self.data.len() * 8 {
            self.data.push(0);
        }
        let idx = self.len;
        self.len += 1;
        self.set_unchecked(idx, val);
    }

    /// Get the value at index.
    ///
    /// Panics if index is out of bounds.
    #[inline]
    pub fn value(&self, idx: usize) -> bool {
        let byte = self.data[idx >> 3];
        (byte >> (idx & 7)) & 1 != 0
    }

    /// Set a bit at index.
    ///
    /// Panics if index is out of bounds.
    #[inline]
    pub fn set_unchecked(&mut self, idx: usize, val: bool) {
        let byte = idx / 8;
        let bit = idx & 7;
        if val {
            self.data[byte] |= 1 << bit;
        } else {
            self.data[byte] &= !(1 << bit);
        }
    }

    pub fn iter(&self) -> BitmapIter<'_> {
        BitmapIter {
            idx: 0,
            bitmap: self,
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl FromIterator<bool> for Bitmap {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let mut bitmap = Bitmap::with_capacity(iter.size_hint().0);
        for v in iter {
            bitmap.push(v);
        }
        bitmap
    }
}

#[derive(Debug)]
pub struct BitmapIter<'a> {
    idx: usize,
    bitmap: &'a Bitmap,
}

impl Iterator for BitmapIter<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.bitmap.len() {
            return None;
        }
        let v = self.bitmap.value(self.idx);
        self.idx += 1;
        Some(v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.bitmap.len() - self.idx;
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for BitmapIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_count() {
        let bm: Bitmap = [true, false, true, true, false, false, false, false, true]
            .into_iter()
            .collect();
        assert_eq!(9, bm.len());
        assert_eq!(4, bm.count_trues());
        assert!(bm.value(8));
        assert!(!bm.value(7));
    }

    #[test]
    fn count_ignores_trailing_bits() {
        let bm = Bitmap::try_new(vec![u8::MAX], 3).unwrap();
        assert_eq!(3, bm.count_trues());
    }

    #[test]
    fn try_new_checks_length() {
        Bitmap::try_new(vec![0, 0], 3).unwrap_err();
        let bm = Bitmap::try_new(vec![0b101], 3).unwrap();
        assert_eq!(vec![true, false, true], bm.iter().collect::<Vec<_>>());
    }
}
