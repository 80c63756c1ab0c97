//! Best-fit range allocation over a linear space.

use tracing::debug;

use crate::free_list::FreeList;
use crate::math::fmt_bytes;
use crate::range::MemoryRange;

/// Best-fit free-list allocator over a linear space of bytes.
///
/// Hands out `(offset, size)` reservations, returns freed reservations to a
/// coalescing free list, and can extend the space in place when the layer
/// above grows its backing store.
#[derive(Debug, Clone)]
pub struct RangeAllocator {
    size: u64,
    free: FreeList,
    allocated: u64,
    allocation_count: usize,
}

impl RangeAllocator {
    /// Create an allocator over `size` bytes, all initially free.
    #[must_use]
    pub fn new(size: u64) -> Self {
        let mut free = FreeList::new();
        free.insert(MemoryRange::new(0, size));
        Self {
            size,
            free,
            allocated: 0,
            allocation_count: 0,
        }
    }

    /// Reserve `size` bytes at the given power-of-two `alignment`.
    ///
    /// Returns the aligned offset of the reservation, or `None` when no free
    /// range fits. Zero-size requests always return `None`.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let offset = self.free.take_best_fit(size, alignment)?;
        self.allocated += size;
        self.allocation_count += 1;
        Some(offset)
    }

    /// Return a reservation to the free list, coalescing with its neighbors.
    ///
    /// Must be called with exactly the `(offset, size)` pair handed out by
    /// [`allocate`](Self::allocate); anything else is a logic error and is
    /// debug-asserted.
    pub fn free(&mut self, offset: u64, size: u64) {
        debug_assert!(size > 0, "freeing a zero-size reservation");
        debug_assert!(
            offset + size <= self.size,
            "freeing [{offset}..{}) outside space of {} bytes",
            offset + size,
            self.size
        );
        debug_assert!(
            self.allocated >= size,
            "freeing more bytes than are allocated"
        );

        self.free.insert(MemoryRange::new(offset, size));
        self.allocated -= size;
        self.allocation_count -= 1;
    }

    /// Extend the space to `new_size` bytes.
    ///
    /// The bytes `[old_size, new_size)` become free and coalesce with an
    /// existing free tail.
    pub fn grow(&mut self, new_size: u64) {
        debug_assert!(new_size >= self.size, "range allocator cannot shrink");
        if new_size == self.size {
            return;
        }

        debug!(
            old = %fmt_bytes(self.size),
            new = %fmt_bytes(new_size),
            "growing allocation space"
        );
        self.free.insert(MemoryRange::new(self.size, new_size - self.size));
        self.size = new_size;
    }

    /// Free bytes not in the tail free range, as a percentage of the total
    /// size. An empty or fully-tail-free space reports 0.
    #[must_use]
    pub fn fragmentation_percent(&self) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let stranded = self.free.total_free() - self.free.tail_free(self.size);
        (stranded as f64 / self.size as f64 * 100.0) as f32
    }

    /// Total size of the space in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Bytes currently handed out.
    #[must_use]
    pub const fn allocated(&self) -> u64 {
        self.allocated
    }

    /// Free bytes across all ranges.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.free.total_free()
    }

    /// Number of live reservations.
    #[must_use]
    pub const fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Size of the largest contiguous free range.
    #[must_use]
    pub fn largest_free_block(&self) -> u64 {
        self.free.largest()
    }

    /// Whether no reservations are live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.allocation_count == 0
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn allocations_account_for_size() {
        let mut alloc = RangeAllocator::new(1024);
        let a = alloc.allocate(100, 1).unwrap();
        let b = alloc.allocate(200, 1).unwrap();

        assert_eq!((a, b), (0, 100));
        assert_eq!(alloc.allocated(), 300);
        assert_eq!(alloc.available(), 724);
        assert_eq!(alloc.allocation_count(), 2);
        // I2: allocated + free == size.
        assert_eq!(alloc.allocated() + alloc.available(), alloc.size());
    }

    #[test]
    fn zero_size_allocation_is_refused() {
        let mut alloc = RangeAllocator::new(64);
        assert!(alloc.allocate(0, 1).is_none());
        assert_eq!(alloc.allocation_count(), 0);
    }

    #[test]
    fn free_returns_bytes_and_coalesces() {
        let mut alloc = RangeAllocator::new(256);
        let a = alloc.allocate(64, 1).unwrap();
        let b = alloc.allocate(64, 1).unwrap();

        alloc.free(a, 64);
        alloc.free(b, 64);

        assert_eq!(alloc.allocated(), 0);
        assert!(alloc.is_empty());
        assert_eq!(alloc.largest_free_block(), 256);
    }

    #[test]
    fn grow_extends_the_tail() {
        let mut alloc = RangeAllocator::new(128);
        let _held = alloc.allocate(128, 1).unwrap();
        assert!(alloc.allocate(1, 1).is_none());

        alloc.grow(256);
        assert_eq!(alloc.size(), 256);
        assert_eq!(alloc.allocate(64, 1), Some(128));
    }

    #[test]
    fn grow_coalesces_with_a_free_tail() {
        let mut alloc = RangeAllocator::new(128);
        let _a = alloc.allocate(64, 1).unwrap();
        let _b = alloc.allocate(32, 1).unwrap();

        // Tail [96..128) is free; growth must merge into one 160-byte block.
        alloc.grow(256);
        assert_eq!(alloc.largest_free_block(), 160);
    }

    #[test]
    fn fragmentation_ignores_the_tail_range() {
        let mut alloc = RangeAllocator::new(1000);
        let a = alloc.allocate(100, 1).unwrap();
        let _b = alloc.allocate(100, 1).unwrap();

        // Only tail space is free: no fragmentation.
        assert_relative_eq!(alloc.fragmentation_percent(), 0.0);

        // A 100-byte hole at the front is stranded.
        alloc.free(a, 100);
        assert_relative_eq!(alloc.fragmentation_percent(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn fragmentation_of_empty_space_is_zero() {
        let alloc = RangeAllocator::new(0);
        assert_relative_eq!(alloc.fragmentation_percent(), 0.0);

        let alloc = RangeAllocator::new(4096);
        assert_relative_eq!(alloc.fragmentation_percent(), 0.0);
    }

    #[test]
    fn aligned_allocations_return_aligned_offsets() {
        let mut alloc = RangeAllocator::new(1024);
        let _pad = alloc.allocate(10, 1).unwrap();
        let aligned = alloc.allocate(64, 256).unwrap();
        assert_eq!(aligned % 256, 0);
    }

    #[test]
    fn freed_hole_is_reused_by_best_fit() {
        let mut alloc = RangeAllocator::new(512);
        let a = alloc.allocate(100, 1).unwrap();
        let _b = alloc.allocate(100, 1).unwrap();

        alloc.free(a, 100);
        // The 100-byte hole is a tighter fit than the 312-byte tail.
        assert_eq!(alloc.allocate(100, 1), Some(a));
    }
}
