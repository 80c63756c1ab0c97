//! Fixed-stride resizable buffers.

use crate::backing::Backing;
use crate::error::{AllocError, Result};
use crate::math::align_up;
use crate::resizable::{BufferStats, DynamicBufferConfig, DynamicResizableBuffer, SubBuffer};

/// Growth behavior of a [`UniformResizableBuffer`], in element counts.
#[derive(Debug, Clone, Copy)]
pub struct UniformBufferConfig {
    /// Minimum number of elements added per growth step.
    pub grow_count: u64,
    /// Hard cap on the number of elements the backing may hold.
    pub max_count: u64,
}

impl Default for UniformBufferConfig {
    fn default() -> Self {
        Self {
            grow_count: 256,
            max_count: 1 << 20,
        }
    }
}

/// A resizable buffer where every allocation is one fixed-size element.
///
/// Elements are placed at a stride of `align_up(element_size, alignment)`,
/// so slots pack exactly and a freed slot is found again by best-fit. For
/// GPU use the alignment is the device's minimum offset alignment for the
/// descriptor type the buffer feeds.
pub struct UniformResizableBuffer<B> {
    inner: DynamicResizableBuffer<B>,
    element_size: u64,
    stride: u64,
    alignment: u64,
}

impl<B> Clone for UniformResizableBuffer<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            element_size: self.element_size,
            stride: self.stride,
            alignment: self.alignment,
        }
    }
}

impl<B: Backing> UniformResizableBuffer<B> {
    /// Create a buffer of `element_size`-byte elements at the given
    /// power-of-two `alignment`.
    pub fn new(
        backing: B,
        element_size: u64,
        alignment: u64,
        config: UniformBufferConfig,
    ) -> Result<Self> {
        if element_size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let alignment = alignment.max(1);
        let stride = align_up(element_size, alignment);

        let inner = DynamicResizableBuffer::new(
            backing,
            DynamicBufferConfig {
                grow_size: config.grow_count * stride,
                max_size: config.max_count * stride,
            },
        );
        Ok(Self {
            inner,
            element_size,
            stride,
            alignment,
        })
    }

    /// Allocate one element slot, optionally filled with `data`.
    pub fn allocate(&self, data: Option<&[u8]>) -> Result<SubBuffer<B>> {
        if let Some(data) = data {
            if data.len() as u64 > self.element_size {
                return Err(AllocError::DataTooLarge {
                    len: data.len() as u64,
                    size: self.element_size,
                });
            }
        }
        self.inner.allocate(self.stride, self.alignment, data)
    }

    /// Logical size of one element in bytes.
    #[must_use]
    pub const fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Distance between consecutive element slots in bytes.
    #[must_use]
    pub const fn stride(&self) -> u64 {
        self.stride
    }

    /// Number of element slots the current backing can hold.
    pub fn capacity(&self) -> u64 {
        self.inner.size() / self.stride
    }

    /// Times the backing has been reallocated.
    pub fn reallocation_count(&self) -> u64 {
        self.inner.reallocation_count()
    }

    /// Snapshot of the allocation state.
    pub fn stats(&self) -> BufferStats {
        self.inner.stats()
    }

    /// Run `f` against the backing store under the buffer lock.
    pub fn with_backing<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        self.inner.with_backing(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::HostBacking;

    fn uniform(element: u64, alignment: u64) -> UniformResizableBuffer<HostBacking> {
        UniformResizableBuffer::new(
            HostBacking::new(0),
            element,
            alignment,
            UniformBufferConfig {
                grow_count: 4,
                max_count: 64,
            },
        )
        .unwrap()
    }

    #[test]
    fn stride_rounds_element_size_to_alignment() {
        let buf = uniform(20, 16);
        assert_eq!(buf.element_size(), 20);
        assert_eq!(buf.stride(), 32);
    }

    #[test]
    fn elements_pack_at_stride_offsets() {
        let buf = uniform(24, 16);
        let a = buf.allocate(None).unwrap();
        let b = buf.allocate(None).unwrap();
        let c = buf.allocate(None).unwrap();

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 32);
        assert_eq!(c.offset(), 64);
    }

    #[test]
    fn freed_slot_is_reused_exactly() {
        let buf = uniform(64, 64);
        let _a = buf.allocate(None).unwrap();
        let b = buf.allocate(None).unwrap();
        let _c = buf.allocate(None).unwrap();

        let slot = b.offset();
        drop(b);
        let d = buf.allocate(None).unwrap();
        assert_eq!(d.offset(), slot);
    }

    #[test]
    fn capacity_grows_in_element_counts() {
        let buf = uniform(16, 16);
        assert_eq!(buf.capacity(), 0);

        let _a = buf.allocate(None).unwrap();
        // grow_count 4 elements per step.
        assert_eq!(buf.capacity(), 4);
    }

    #[test]
    fn max_count_caps_the_buffer() {
        let buf = uniform(16, 16);
        let mut held = Vec::new();
        for _ in 0..64 {
            held.push(buf.allocate(None).unwrap());
        }
        assert!(matches!(
            buf.allocate(None),
            Err(AllocError::ExceedsMaxSize { .. })
        ));
    }

    #[test]
    fn data_larger_than_element_is_rejected() {
        let buf = uniform(8, 8);
        let err = buf.allocate(Some(&[0; 9])).unwrap_err();
        assert!(matches!(err, AllocError::DataTooLarge { len: 9, size: 8 }));
    }

    #[test]
    fn zero_element_size_is_rejected() {
        let result = UniformResizableBuffer::new(
            HostBacking::new(0),
            0,
            16,
            UniformBufferConfig::default(),
        );
        assert!(matches!(result, Err(AllocError::ZeroSize)));
    }
}
