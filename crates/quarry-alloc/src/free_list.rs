//! Sorted, coalescing set of free ranges.

use std::collections::BTreeMap;

use crate::math::align_up;
use crate::range::MemoryRange;

/// Ordered set of free ranges within a linear space.
///
/// Ranges are keyed by offset, never overlap, and merge with their neighbors
/// on insertion, so the only external fragmentation that can persist comes
/// from alignment padding and allocation order.
#[derive(Debug, Default, Clone)]
pub struct FreeList {
    /// Offset -> size, in offset order.
    ranges: BTreeMap<u64, u64>,
    /// Total free bytes across all ranges.
    total: u64,
}

impl FreeList {
    /// Create an empty free list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a range, merging it with adjacent free ranges.
    ///
    /// Inserting a range that overlaps an existing free range is a logic
    /// error and is debug-asserted.
    pub fn insert(&mut self, range: MemoryRange) {
        if range.is_empty() {
            return;
        }

        let mut start = range.offset;
        let mut end = range.end();

        // Merge with a predecessor that ends where we begin.
        if let Some((&prev_offset, &prev_size)) = self.ranges.range(..range.offset).next_back() {
            debug_assert!(
                prev_offset + prev_size <= range.offset,
                "free range {range} overlaps [{prev_offset}..{})",
                prev_offset + prev_size
            );
            if prev_offset + prev_size == range.offset {
                start = prev_offset;
                self.ranges.remove(&prev_offset);
            }
        }

        // Merge with a successor that begins where we end.
        if let Some((&next_offset, &next_size)) = self.ranges.range(range.offset..).next() {
            debug_assert!(next_offset >= end, "free range {range} overlaps [{next_offset}..)");
            if next_offset == end {
                end = next_offset + next_size;
                self.ranges.remove(&next_offset);
            }
        }

        self.ranges.insert(start, end - start);
        self.total += range.size;
    }

    /// Find the smallest free range that fits `size` bytes once its start is
    /// rounded up to `alignment`. Ties break toward the lowest offset.
    #[must_use]
    pub fn best_fit(&self, size: u64, alignment: u64) -> Option<MemoryRange> {
        let mut best: Option<MemoryRange> = None;

        for (&offset, &len) in &self.ranges {
            let padding = align_up(offset, alignment) - offset;
            let usable = len.saturating_sub(padding);
            if usable < size {
                continue;
            }
            match best {
                Some(range) if range.size <= len => {}
                _ => best = Some(MemoryRange::new(offset, len)),
            }
        }

        best
    }

    /// Remove the best-fitting range for `size` bytes at `alignment` and
    /// return the aligned offset of the reservation.
    ///
    /// Leftover anterior (alignment padding) and posterior fragments go
    /// straight back into the list.
    pub fn take_best_fit(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let range = self.best_fit(size, alignment)?;
        self.ranges.remove(&range.offset);
        self.total -= range.size;

        let aligned = align_up(range.offset, alignment);
        if aligned > range.offset {
            self.insert(MemoryRange::new(range.offset, aligned - range.offset));
        }
        let used_end = aligned + size;
        if used_end < range.end() {
            self.insert(MemoryRange::new(used_end, range.end() - used_end));
        }

        Some(aligned)
    }

    /// Total free bytes across all ranges.
    #[must_use]
    pub fn total_free(&self) -> u64 {
        self.total
    }

    /// Free bytes belonging to the range that ends exactly at `space_size`,
    /// or 0 when the tail of the space is allocated.
    #[must_use]
    pub fn tail_free(&self, space_size: u64) -> u64 {
        self.ranges
            .iter()
            .next_back()
            .map_or(0, |(&offset, &size)| {
                if offset + size == space_size {
                    size
                } else {
                    0
                }
            })
    }

    /// Size of the largest free range.
    #[must_use]
    pub fn largest(&self) -> u64 {
        self.ranges.values().copied().max().unwrap_or(0)
    }

    /// Number of free ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the list holds no free ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterate the free ranges in offset order.
    pub fn iter(&self) -> impl Iterator<Item = MemoryRange> + '_ {
        self.ranges
            .iter()
            .map(|(&offset, &size)| MemoryRange::new(offset, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(list: &FreeList) -> Vec<(u64, u64)> {
        list.iter().map(|r| (r.offset, r.size)).collect()
    }

    #[test]
    fn insert_keeps_disjoint_ranges_sorted() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(100, 10));
        list.insert(MemoryRange::new(0, 10));
        list.insert(MemoryRange::new(50, 10));

        assert_eq!(ranges(&list), vec![(0, 10), (50, 10), (100, 10)]);
        assert_eq!(list.total_free(), 30);
    }

    #[test]
    fn insert_merges_with_predecessor() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(0, 10));
        list.insert(MemoryRange::new(10, 10));

        assert_eq!(ranges(&list), vec![(0, 20)]);
        assert_eq!(list.total_free(), 20);
    }

    #[test]
    fn insert_merges_with_successor() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(10, 10));
        list.insert(MemoryRange::new(0, 10));

        assert_eq!(ranges(&list), vec![(0, 20)]);
    }

    #[test]
    fn insert_bridges_two_neighbors() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(0, 10));
        list.insert(MemoryRange::new(20, 10));
        list.insert(MemoryRange::new(10, 10));

        assert_eq!(ranges(&list), vec![(0, 30)]);
        assert_eq!(list.total_free(), 30);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn empty_insert_is_a_no_op() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(42, 0));
        assert!(list.is_empty());
        assert_eq!(list.total_free(), 0);
    }

    #[test]
    fn best_fit_prefers_smallest_range() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(0, 100));
        list.insert(MemoryRange::new(200, 30));
        list.insert(MemoryRange::new(300, 60));

        let range = list.best_fit(25, 1).unwrap();
        assert_eq!((range.offset, range.size), (200, 30));
    }

    #[test]
    fn best_fit_ties_break_to_lowest_offset() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(100, 40));
        list.insert(MemoryRange::new(300, 40));

        let range = list.best_fit(40, 1).unwrap();
        assert_eq!(range.offset, 100);
    }

    #[test]
    fn best_fit_accounts_for_alignment_padding() {
        let mut list = FreeList::new();
        // 30 bytes at offset 10: only 24 remain after aligning to 16.
        list.insert(MemoryRange::new(10, 30));

        assert!(list.best_fit(30, 16).is_none());
        let range = list.best_fit(24, 16).unwrap();
        assert_eq!(range.offset, 10);
    }

    #[test]
    fn take_best_fit_splits_head_and_tail() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(10, 100));

        let offset = list.take_best_fit(32, 16).unwrap();
        assert_eq!(offset, 16);
        // Anterior padding [10..16) and posterior [48..110) return to the list.
        assert_eq!(ranges(&list), vec![(10, 6), (48, 62)]);
        assert_eq!(list.total_free(), 68);
    }

    #[test]
    fn take_best_fit_consumes_exact_fit_entirely() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(64, 32));

        let offset = list.take_best_fit(32, 32).unwrap();
        assert_eq!(offset, 64);
        assert!(list.is_empty());
        assert_eq!(list.total_free(), 0);
    }

    #[test]
    fn take_best_fit_fails_when_nothing_fits() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(0, 16));
        assert!(list.take_best_fit(17, 1).is_none());
        // The list is untouched by a failed search.
        assert_eq!(ranges(&list), vec![(0, 16)]);
    }

    #[test]
    fn tail_free_reports_only_the_range_touching_the_end() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(0, 10));
        list.insert(MemoryRange::new(90, 10));

        assert_eq!(list.tail_free(100), 10);
        assert_eq!(list.tail_free(200), 0);
    }

    #[test]
    fn largest_tracks_biggest_range() {
        let mut list = FreeList::new();
        assert_eq!(list.largest(), 0);
        list.insert(MemoryRange::new(0, 10));
        list.insert(MemoryRange::new(50, 25));
        assert_eq!(list.largest(), 25);
    }

    #[test]
    fn freed_ranges_rebuild_one_contiguous_block() {
        let mut list = FreeList::new();
        list.insert(MemoryRange::new(0, 128));

        let a = list.take_best_fit(32, 1).unwrap();
        let b = list.take_best_fit(32, 1).unwrap();
        let c = list.take_best_fit(32, 1).unwrap();
        assert_eq!((a, b, c), (0, 32, 64));

        list.insert(MemoryRange::new(b, 32));
        list.insert(MemoryRange::new(a, 32));
        list.insert(MemoryRange::new(c, 32));

        assert_eq!(ranges(&list), vec![(0, 128)]);
    }
}
