//! Host-to-device staging belt.

use std::sync::Arc;

use ash::vk;
use quarry_alloc::DynamicBufferConfig;
use tracing::warn;

use crate::backing::{create_host_buffer, GpuBacking, GpuDynamicBuffer, GpuSubBuffer};
use crate::context::GpuContext;
use crate::deferred::DeferredQueue;
use crate::error::Result;

/// Sizing of the staging pool.
#[derive(Debug, Clone, Copy)]
pub struct StagingConfig {
    /// Initial pool size in bytes.
    pub initial_size: u64,
    /// Minimum bytes added per pool growth.
    pub grow_size: u64,
    /// Hard cap on the pool size.
    pub max_size: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            initial_size: 4 << 20,
            grow_size: 4 << 20,
            max_size: 128 << 20,
        }
    }
}

/// Frame-tagged retention of staged regions.
///
/// Regions retained while frame `N` is current are released once the caller
/// reports frame `N`'s fence as passed, not a frames-in-flight window later.
struct FrameRetention<T> {
    // Window 0: release is driven by explicit fence completion, not a
    // frames-in-flight guess.
    queue: DeferredQueue<T>,
    frame: u64,
}

impl<T> FrameRetention<T> {
    fn new() -> Self {
        Self {
            queue: DeferredQueue::new(0),
            frame: 0,
        }
    }

    fn begin_frame(&mut self, frame: u64) {
        debug_assert!(frame >= self.frame, "staging frames must be non-decreasing");
        self.frame = frame;
    }

    fn retain(&mut self, item: T) {
        self.queue.retire(item, self.frame);
    }

    /// Items tagged with a frame at or below `completed_frame`.
    fn complete(&mut self, completed_frame: u64) -> Vec<T> {
        // drain_expired releases strictly-below-cutoff entries, so the
        // cutoff sits one past the completed frame.
        self.queue.drain_expired(completed_frame + 1)
    }

    fn drain_all(&mut self) -> Vec<T> {
        self.queue.drain_all()
    }

    fn len(&self) -> usize {
        self.queue.pending_count()
    }
}

/// Upload pool built on a host-visible [`GpuDynamicBuffer`].
///
/// Each upload carves a transient sub-buffer, writes the bytes through the
/// mapping, and records a `cmd_copy_buffer` into the caller's command
/// buffer. The sub-buffer is retained until the caller reports the frame's
/// fence as passed, at which point its range returns to the pool. Old pool
/// storage outlives relocation through the deferred deletion queue, so
/// previously recorded copies stay valid.
pub struct StagingBuffer {
    pool: GpuDynamicBuffer,
    retained: FrameRetention<GpuSubBuffer>,
    copy_alignment: u64,
    bytes_staged: u64,
}

impl StagingBuffer {
    /// Create a staging pool on `context`.
    pub fn new(context: Arc<GpuContext>, config: StagingConfig) -> Result<Self> {
        let copy_alignment = context.limits().optimal_buffer_copy_offset_alignment;
        let pool = create_host_buffer(
            context,
            config.initial_size,
            DynamicBufferConfig {
                grow_size: config.grow_size,
                max_size: config.max_size,
            },
            "quarry_staging_pool",
        )?;

        Ok(Self {
            pool,
            retained: FrameRetention::new(),
            copy_alignment,
            bytes_staged: 0,
        })
    }

    /// Stage `data` and record a copy into `dst` at `dst_offset` on `cmd`.
    ///
    /// # Safety
    /// `cmd` must be in the recording state and `dst` must be a valid buffer
    /// with `TRANSFER_DST` usage and at least `dst_offset + data.len()`
    /// bytes.
    pub unsafe fn upload(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        dst: vk::Buffer,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let sub = self
            .pool
            .allocate(data.len() as u64, self.copy_alignment, Some(data))?;

        // Handle fetched after the allocation, so a growth-relocation during
        // the allocate is already reflected.
        let src = self.pool.with_backing(GpuBacking::buffer_handle);

        let region = vk::BufferCopy {
            src_offset: sub.offset(),
            dst_offset,
            size: data.len() as u64,
        };
        device.cmd_copy_buffer(cmd, src, dst, &[region]);

        self.bytes_staged += data.len() as u64;
        self.retained.retain(sub);
        Ok(())
    }

    /// Begin a new frame of uploads.
    pub fn begin_frame(&mut self, frame: u64) {
        self.retained.begin_frame(frame);
    }

    /// Release regions staged for frames whose fences have passed.
    ///
    /// `completed_frame` is the highest frame number the GPU has finished.
    pub fn frame_completed(&mut self, completed_frame: u64) {
        // Dropping the sub-buffers returns their ranges to the pool.
        drop(self.retained.complete(completed_frame));
    }

    /// Release every retained region. Only valid once the device is idle.
    pub fn reset(&mut self) {
        if self.retained.len() > 0 {
            warn!(
                pending = self.retained.len(),
                "resetting staging pool with retained regions"
            );
        }
        drop(self.retained.drain_all());
    }

    /// Total bytes staged since creation.
    #[must_use]
    pub fn bytes_staged(&self) -> u64 {
        self.bytes_staged
    }

    /// Regions still retained for in-flight frames.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// The pool the belt allocates from.
    #[must_use]
    pub fn pool(&self) -> &GpuDynamicBuffer {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_release_exactly_when_their_frame_completes() {
        let mut retention = FrameRetention::new();
        retention.begin_frame(3);
        retention.retain("frame3-a");
        retention.retain("frame3-b");

        // Completion of an earlier frame releases nothing.
        assert!(retention.complete(2).is_empty());
        assert_eq!(retention.len(), 2);

        // Completion of the tagged frame releases everything staged on it.
        assert_eq!(retention.complete(3), vec!["frame3-a", "frame3-b"]);
        assert_eq!(retention.len(), 0);
    }

    #[test]
    fn completion_releases_per_frame() {
        let mut retention = FrameRetention::new();
        retention.begin_frame(0);
        retention.retain(0u32);
        retention.begin_frame(1);
        retention.retain(1);
        retention.begin_frame(2);
        retention.retain(2);

        assert_eq!(retention.complete(1), vec![0, 1]);
        assert_eq!(retention.len(), 1);
        assert_eq!(retention.complete(2), vec![2]);
    }

    #[test]
    fn drain_all_ignores_frame_tags() {
        let mut retention = FrameRetention::new();
        retention.begin_frame(7);
        retention.retain('a');
        retention.retain('b');

        assert_eq!(retention.drain_all(), vec!['a', 'b']);
        assert_eq!(retention.len(), 0);
    }
}
