//! Dynamic resizable buffers and the sub-buffers carved from them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::allocator::RangeAllocator;
use crate::backing::Backing;
use crate::error::{AllocError, Result};
use crate::math::{align_up, fmt_bytes};
use crate::range::MemoryRange;

/// Growth behavior of a [`DynamicResizableBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct DynamicBufferConfig {
    /// Minimum number of bytes added per growth step.
    pub grow_size: u64,
    /// Hard cap on the backing size; allocations that would grow past this
    /// fail with [`AllocError::ExceedsMaxSize`].
    pub max_size: u64,
}

impl Default for DynamicBufferConfig {
    fn default() -> Self {
        Self {
            grow_size: 1 << 20,
            max_size: 256 << 20,
        }
    }
}

/// Point-in-time snapshot of a buffer's allocation state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferStats {
    /// Backing size in bytes.
    pub size: u64,
    /// Bytes handed out to live sub-buffers.
    pub allocated: u64,
    /// Free bytes across all free ranges.
    pub free: u64,
    /// Number of live sub-buffers.
    pub allocation_count: usize,
    /// Free bytes stranded before the tail, as a percentage of size.
    pub fragmentation_percent: f32,
    /// Times the backing has been reallocated since creation.
    pub reallocation_count: u64,
}

struct BufferState<B> {
    allocator: RangeAllocator,
    backing: B,
    reallocations: u64,
}

struct Shared<B> {
    config: DynamicBufferConfig,
    state: Mutex<BufferState<B>>,
}

/// A growable buffer that hands out sub-buffer views.
///
/// Sub-buffers are carved from a backing store by a best-fit free-list
/// allocator. When no free range fits, the backing is reallocated larger and
/// its contents copied forward, so existing sub-buffer offsets stay valid
/// while the storage identity changes. Callers holding raw storage handles
/// watch [`reallocation_count`](Self::reallocation_count) to know when to
/// re-query them.
///
/// The handle is cheaply clonable; all clones share one allocator and one
/// backing behind a mutex.
pub struct DynamicResizableBuffer<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for DynamicResizableBuffer<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Backing> DynamicResizableBuffer<B> {
    /// Create a buffer over `backing`, which may start at any size
    /// (including zero).
    pub fn new(backing: B, config: DynamicBufferConfig) -> Self {
        let allocator = RangeAllocator::new(backing.len());
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BufferState {
                    allocator,
                    backing,
                    reallocations: 0,
                }),
            }),
        }
    }

    /// Carve a sub-buffer of `size` bytes at the given power-of-two
    /// `alignment`, optionally filled with `data`.
    ///
    /// Grows the backing when no free range fits. Fails permanently only if
    /// the grown size would exceed the configured maximum.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
        data: Option<&[u8]>,
    ) -> Result<SubBuffer<B>> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if let Some(data) = data {
            if data.len() as u64 > size {
                return Err(AllocError::DataTooLarge {
                    len: data.len() as u64,
                    size,
                });
            }
        }

        let mut state = self.shared.state.lock();

        let offset = match state.allocator.allocate(size, alignment) {
            Some(offset) => offset,
            None => {
                self.grow_for(&mut state, size, alignment)?;
                // The grown tail fits the request by construction.
                state
                    .allocator
                    .allocate(size, alignment)
                    .ok_or_else(|| {
                        AllocError::InvalidState(
                            "grown backing still cannot fit allocation".to_string(),
                        )
                    })?
            }
        };

        if let Some(data) = data {
            if let Err(err) = state.backing.write(offset, data) {
                state.allocator.free(offset, size);
                return Err(err);
            }
        }

        Ok(SubBuffer {
            shared: Arc::clone(&self.shared),
            range: MemoryRange::new(offset, size),
        })
    }

    /// Grow the backing so a `size`-byte allocation at `alignment` fits in
    /// the new tail.
    fn grow_for(
        &self,
        state: &mut BufferState<B>,
        size: u64,
        alignment: u64,
    ) -> Result<()> {
        let old_size = state.allocator.size();
        let padding = align_up(old_size, alignment) - old_size;
        let new_size = old_size + self.shared.config.grow_size.max(size + padding);

        if new_size > self.shared.config.max_size {
            warn!(
                requested = size,
                max = %fmt_bytes(self.shared.config.max_size),
                "allocation would grow buffer past its maximum"
            );
            return Err(AllocError::ExceedsMaxSize {
                requested: size,
                max: self.shared.config.max_size,
            });
        }

        state.backing.grow(new_size)?;
        state.allocator.grow(new_size);
        state.reallocations += 1;
        debug!(
            new_size = %fmt_bytes(new_size),
            reallocations = state.reallocations,
            "backing buffer reallocated"
        );
        Ok(())
    }

    /// Current backing size in bytes.
    pub fn size(&self) -> u64 {
        self.shared.state.lock().allocator.size()
    }

    /// Times the backing has been reallocated. Callers holding raw storage
    /// handles re-query them when this changes.
    pub fn reallocation_count(&self) -> u64 {
        self.shared.state.lock().reallocations
    }

    /// Snapshot of the allocation state.
    pub fn stats(&self) -> BufferStats {
        let state = self.shared.state.lock();
        BufferStats {
            size: state.allocator.size(),
            allocated: state.allocator.allocated(),
            free: state.allocator.available(),
            allocation_count: state.allocator.allocation_count(),
            fragmentation_percent: state.allocator.fragmentation_percent(),
            reallocation_count: state.reallocations,
        }
    }

    /// Run `f` against the backing store under the buffer lock.
    ///
    /// This is how GPU callers get at the live storage handle; the closure
    /// must not call back into the buffer.
    pub fn with_backing<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.shared.state.lock().backing)
    }

    /// Growth configuration.
    pub fn config(&self) -> DynamicBufferConfig {
        self.shared.config
    }
}

/// A `{offset, size}` view into a [`DynamicResizableBuffer`].
///
/// Owns its range: dropping the sub-buffer returns the range to the parent's
/// free list.
pub struct SubBuffer<B> {
    shared: Arc<Shared<B>>,
    range: MemoryRange,
}

impl<B: Backing> SubBuffer<B> {
    /// Byte offset of the view within the backing buffer.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.range.offset
    }

    /// Size of the view in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.range.size
    }

    /// The range this view covers.
    #[must_use]
    pub const fn range(&self) -> MemoryRange {
        self.range
    }

    /// Write `data` at the start of the view.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.write_at(0, data)
    }

    /// Write `data` at `offset` bytes into the view.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(AllocError::WriteOutOfBounds {
                offset,
                len: data.len() as u64,
                size: self.range.size,
            })?;
        if end > self.range.size {
            return Err(AllocError::WriteOutOfBounds {
                offset,
                len: data.len() as u64,
                size: self.range.size,
            });
        }

        let mut state = self.shared.state.lock();
        state.backing.write(self.range.offset + offset, data)
    }
}

impl<B> Drop for SubBuffer<B> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.allocator.free(self.range.offset, self.range.size);
    }
}

// Manual impl so the backing type does not need to be Debug.
impl<B> fmt::Debug for SubBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubBuffer")
            .field("range", &format_args!("{}", self.range))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::HostBacking;

    fn buffer(initial: u64, grow: u64, max: u64) -> DynamicResizableBuffer<HostBacking> {
        DynamicResizableBuffer::new(
            HostBacking::new(initial),
            DynamicBufferConfig {
                grow_size: grow,
                max_size: max,
            },
        )
    }

    #[test]
    fn allocate_writes_initial_data() {
        let buf = buffer(64, 64, 256);
        let sub = buf.allocate(4, 1, Some(&[1, 2, 3, 4])).unwrap();

        assert_eq!(sub.offset(), 0);
        buf.with_backing(|b| assert_eq!(&b.as_slice()[..4], &[1, 2, 3, 4]));
    }

    #[test]
    fn zero_size_is_rejected() {
        let buf = buffer(64, 64, 256);
        assert!(matches!(buf.allocate(0, 1, None), Err(AllocError::ZeroSize)));
    }

    #[test]
    fn oversized_data_is_rejected_before_any_state_change() {
        let buf = buffer(64, 64, 256);
        let err = buf.allocate(2, 1, Some(&[0; 8])).unwrap_err();
        assert!(matches!(err, AllocError::DataTooLarge { len: 8, size: 2 }));
        assert_eq!(buf.stats().allocation_count, 0);
    }

    #[test]
    fn exhaustion_grows_the_backing_and_retries() {
        let buf = buffer(16, 16, 256);
        let _a = buf.allocate(16, 1, None).unwrap();
        let b = buf.allocate(16, 1, None).unwrap();

        assert_eq!(b.offset(), 16);
        assert_eq!(buf.size(), 32);
        assert_eq!(buf.reallocation_count(), 1);
    }

    #[test]
    fn growth_step_covers_requests_larger_than_grow_size() {
        let buf = buffer(8, 4, 1024);
        let sub = buf.allocate(100, 1, Some(&[7; 100])).unwrap();

        assert_eq!(sub.offset(), 0);
        assert!(buf.size() >= 100);
        buf.with_backing(|b| assert_eq!(&b.as_slice()[..100], &[7; 100][..]));
    }

    #[test]
    fn growth_preserves_existing_contents() {
        let buf = buffer(8, 8, 256);
        let a = buf.allocate(8, 1, Some(&[0xAB; 8])).unwrap();
        let _b = buf.allocate(8, 1, Some(&[0xCD; 8])).unwrap();

        buf.with_backing(|backing| {
            assert_eq!(&backing.as_slice()[..8], &[0xAB; 8][..]);
            assert_eq!(&backing.as_slice()[8..16], &[0xCD; 8][..]);
        });
        drop(a);
    }

    #[test]
    fn growth_past_max_size_fails_without_touching_the_backing() {
        let buf = buffer(32, 32, 64);
        let _a = buf.allocate(32, 1, None).unwrap();
        let _b = buf.allocate(32, 1, None).unwrap();

        let err = buf.allocate(64, 1, None).unwrap_err();
        assert!(matches!(err, AllocError::ExceedsMaxSize { .. }));
        assert_eq!(buf.size(), 64);
        assert_eq!(buf.reallocation_count(), 1);
    }

    #[test]
    fn dropping_a_sub_buffer_returns_its_range() {
        let buf = buffer(64, 64, 256);
        let a = buf.allocate(32, 1, None).unwrap();
        let offset = a.offset();
        drop(a);

        assert_eq!(buf.stats().allocation_count, 0);
        // The freed range is handed out again.
        let b = buf.allocate(32, 1, None).unwrap();
        assert_eq!(b.offset(), offset);
    }

    #[test]
    fn sub_buffer_debug_shows_its_range() {
        let buf = buffer(64, 64, 256);
        let _head = buf.allocate(16, 1, None).unwrap();
        let sub = buf.allocate(8, 1, None).unwrap();

        let rendered = format!("{sub:?}");
        assert!(rendered.contains("SubBuffer"));
        assert!(rendered.contains("[16..24)"));
    }

    #[test]
    fn sub_buffer_writes_are_bounds_checked() {
        let buf = buffer(64, 64, 256);
        let sub = buf.allocate(8, 1, None).unwrap();

        sub.write(&[1; 8]).unwrap();
        sub.write_at(4, &[2; 4]).unwrap();
        assert!(matches!(
            sub.write_at(4, &[3; 5]),
            Err(AllocError::WriteOutOfBounds { .. })
        ));
    }

    #[test]
    fn sub_buffer_write_lands_relative_to_its_offset() {
        let buf = buffer(64, 64, 256);
        let _head = buf.allocate(16, 1, None).unwrap();
        let sub = buf.allocate(4, 1, None).unwrap();

        sub.write(&[5, 6, 7, 8]).unwrap();
        buf.with_backing(|b| assert_eq!(&b.as_slice()[16..20], &[5, 6, 7, 8]));
    }

    #[test]
    fn stats_snapshot_is_consistent() {
        let buf = buffer(128, 64, 512);
        let _a = buf.allocate(32, 1, None).unwrap();
        let _b = buf.allocate(16, 1, None).unwrap();

        let stats = buf.stats();
        assert_eq!(stats.size, 128);
        assert_eq!(stats.allocated, 48);
        assert_eq!(stats.free, 80);
        assert_eq!(stats.allocation_count, 2);
        assert_eq!(stats.allocated + stats.free, stats.size);
    }

    #[test]
    fn concurrent_churn_keeps_the_accounting_intact() {
        use std::thread;

        let buf = buffer(1024, 1024, 64 << 20);
        let mut handles = Vec::new();
        for t in 0..4 {
            let buf = buf.clone();
            handles.push(thread::spawn(move || {
                let mut held = Vec::new();
                for i in 0..200 {
                    let size = 16 + ((t * 37 + i * 13) % 240) as u64;
                    let sub = buf.allocate(size, 16, None).unwrap();
                    held.push(sub);
                    if i % 3 == 0 {
                        held.remove(held.len() / 2);
                    }
                }
                drop(held);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = buf.stats();
        assert_eq!(stats.allocation_count, 0);
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.free, stats.size);
    }
}
