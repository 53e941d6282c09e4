//! Fixed-capacity rule bitmap.
//!
//! Bit `2 * uid` marks a rule's forward identity and bit `2 * uid + 1` its
//! backward identity. Bits at or above the logical length are always zero,
//! so the derived comparisons and hash are canonical for bitmaps of equal
//! length.

use std::fmt;

const WORD_BITS: usize = 64;

/// Set of rule identities
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bitmap {
    len: usize,
    words: Box<[u64]>,
}

impl Bitmap {
    /// Create an empty bitmap holding `len` bits
    pub fn new(len: usize) -> Self {
        Self {
            len,
            words: vec![0u64; len.div_ceil(WORD_BITS)].into_boxed_slice(),
        }
    }

    /// Create a bitmap with every bit in `[0, len)` set
    pub fn full(len: usize) -> Self {
        let mut bitmap = Self::new(len);
        bitmap.set_all();
        bitmap
    }

    /// Number of addressable bits
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        debug_assert!(bit < self.len);
        self.words[bit / WORD_BITS] & (1u64 << (bit % WORD_BITS)) != 0
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.len);
        self.words[bit / WORD_BITS] |= 1u64 << (bit % WORD_BITS);
    }

    #[inline]
    pub fn reset(&mut self, bit: usize) {
        debug_assert!(bit < self.len);
        self.words[bit / WORD_BITS] &= !(1u64 << (bit % WORD_BITS));
    }

    /// Clear every bit
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Set every bit up to the capacity
    pub fn set_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = u64::MAX);
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
    }

    /// Bitwise AND of two bitmaps of equal length
    pub fn and(a: &Bitmap, b: &Bitmap) -> Bitmap {
        let mut out = Bitmap::new(a.len);
        Self::and_into(a, b, &mut out);
        out
    }

    /// Bitwise AND written into an existing bitmap
    #[inline]
    pub fn and_into(a: &Bitmap, b: &Bitmap, out: &mut Bitmap) {
        debug_assert_eq!(a.len, b.len);
        debug_assert_eq!(a.len, out.len);
        for ((o, x), y) in out.words.iter_mut().zip(a.words.iter()).zip(b.words.iter()) {
            *o = x & y;
        }
    }

    /// In-place bitwise OR
    pub fn union_with(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set bits in ascending order
    pub fn ones(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}

/// Iterator over the set bits of a [`Bitmap`]
pub struct Ones<'a> {
    words: &'a [u64],
    index: usize,
    current: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.index * WORD_BITS + bit);
            }
            self.index += 1;
            self.current = *self.words.get(self.index)?;
        }
    }
}
