//! Packet memory allocator

use crate::descriptor::TABLE_SIZE;

/// Packet memory allocator
///
/// Hands out PMA offsets past the buffer descriptor table. Allocations
/// are never freed individually. Instead, the allocator is reset on every
/// bus reset, and endpoints are installed again.
pub struct Allocator {
    next: usize,
    size: usize,
}

impl Allocator {
    /// Create an allocator over a PMA of `size` bytes
    pub const fn new(size: usize) -> Self {
        Allocator {
            next: TABLE_SIZE,
            size,
        }
    }
    /// Release all buffers
    pub fn reset(&mut self) {
        self.next = TABLE_SIZE;
    }
    /// Release all buffers allocated after `mark`
    ///
    /// `mark` is a value previously returned from [`next()`](Allocator::next).
    pub fn rewind(&mut self, mark: usize) {
        debug_assert!((TABLE_SIZE..=self.next).contains(&mark));
        self.next = mark;
    }
    /// Allocates a buffer of `size` bytes, returning its PMA offset
    ///
    /// The buffer is rounded up to a whole number of half-words. Returns
    /// `None` if the buffer doesn't fit.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when the PMA overflows.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let offset = self.next;
        let next = offset.checked_add((size + 1) & !1)?;
        debug_assert!(next <= self.size, "PMA overflow");
        if next > self.size {
            None
        } else {
            self.next = next;
            Some(offset)
        }
    }
    /// Allocates two adjacent buffers, returning both PMA offsets
    ///
    /// Either both buffers fit, or neither is allocated.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when the PMA overflows.
    pub fn allocate_pair(&mut self, first: usize, second: usize) -> Option<(usize, usize)> {
        let first = first.checked_add(1)? & !1;
        let offset = self.allocate(first.checked_add(second)?)?;
        Some((offset, offset + first))
    }
    /// The offset of the next allocation
    pub fn next(&self) -> usize {
        self.next
    }
}

#[cfg(test)]
mod test {
    use super::Allocator;

    #[test]
    fn allocations_are_half_word_aligned() {
        let mut alloc = Allocator::new(512);
        assert_eq!(alloc.allocate(7), Some(64));
        assert_eq!(alloc.allocate(64), Some(72));
        assert_eq!(alloc.allocate(0), Some(136));
        assert_eq!(alloc.allocate(1), Some(136));
        assert_eq!(alloc.next(), 138);
    }

    #[test]
    fn reset_releases_everything() {
        let mut alloc = Allocator::new(512);
        alloc.allocate(64);
        alloc.allocate(64);
        alloc.reset();
        assert_eq!(alloc.next(), 64);
        assert_eq!(alloc.allocate(3), Some(64));
    }

    #[test]
    fn rewind_to_mark() {
        let mut alloc = Allocator::new(512);
        alloc.allocate(128);
        let mark = alloc.next();
        alloc.allocate(64);
        alloc.rewind(mark);
        assert_eq!(alloc.allocate(2), Some(192));
    }

    #[test]
    fn pair_is_adjacent() {
        let mut alloc = Allocator::new(512);
        assert_eq!(alloc.allocate_pair(7, 64), Some((64, 72)));
        assert_eq!(alloc.allocate_pair(0, 3), Some((136, 136)));
        assert_eq!(alloc.next(), 140);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "PMA overflow"))]
    fn pair_overflow_allocates_neither() {
        let mut alloc = Allocator::new(256);
        assert_eq!(alloc.allocate_pair(64, 160), None);
        assert_eq!(alloc.next(), 64);
    }

    #[test]
    fn allocate_entire_memory() {
        let mut alloc = Allocator::new(512);
        assert_eq!(alloc.allocate(448), Some(64));
        assert_eq!(alloc.next(), 512);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "PMA overflow"))]
    fn overflow() {
        let mut alloc = Allocator::new(512);
        alloc.allocate(400);
        assert_eq!(alloc.allocate(49), None);
        assert_eq!(alloc.next(), 464);
    }
}
