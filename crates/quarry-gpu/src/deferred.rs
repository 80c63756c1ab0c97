//! Deferred resource retirement for multi-frame-in-flight use.
//!
//! A backing buffer replaced during growth may still be referenced by
//! commands recorded for an in-flight frame, so it cannot be freed
//! immediately. Retired resources sit in this queue until enough frames have
//! passed to guarantee no frame still references them.

use std::collections::VecDeque;

use crate::error::Result;
use crate::memory::{GpuAllocator, GpuBuffer};

/// A resource retired on a given frame.
struct Retired<T> {
    resource: T,
    frame_retired: u64,
}

/// FIFO of retired resources, released once their retirement frame falls
/// outside the frames-in-flight window.
///
/// The maturity logic is generic so it is testable without a device;
/// [`DeferredDeletionQueue`] is the instantiation the GPU layer uses.
pub struct DeferredQueue<T> {
    pending: VecDeque<Retired<T>>,
    frames_in_flight: usize,
}

impl<T> DeferredQueue<T> {
    /// Create a queue for the given frames-in-flight window.
    #[must_use]
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Retire a resource on `frame`.
    ///
    /// Frame numbers must be non-decreasing across calls; the drain relies
    /// on FIFO order.
    pub fn retire(&mut self, resource: T, frame: u64) {
        debug_assert!(
            self.pending.back().map_or(true, |r| r.frame_retired <= frame),
            "retirement frames must be non-decreasing"
        );
        self.pending.push_back(Retired {
            resource,
            frame_retired: frame,
        });
    }

    /// Remove and return every resource retired more than
    /// `frames_in_flight` frames before `current_frame`.
    pub fn drain_expired(&mut self, current_frame: u64) -> Vec<T> {
        let cutoff = current_frame.saturating_sub(self.frames_in_flight as u64);

        let mut expired = Vec::new();
        while matches!(self.pending.front(), Some(r) if r.frame_retired < cutoff) {
            // Front just matched, so the pop cannot fail.
            if let Some(retired) = self.pending.pop_front() {
                expired.push(retired.resource);
            }
        }
        expired
    }

    /// Remove and return everything, regardless of age. Shutdown path; the
    /// caller has already waited for the device to go idle.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.pending.drain(..).map(|r| r.resource).collect()
    }

    /// Number of resources awaiting release.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Update the frames-in-flight window.
    pub fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.frames_in_flight = frames_in_flight;
    }
}

/// Deferred deletion queue for retired GPU buffers.
pub type DeferredDeletionQueue = DeferredQueue<GpuBuffer>;

impl DeferredDeletionQueue {
    /// Free buffers whose retirement window has passed.
    ///
    /// Call at the start of each frame.
    pub fn process(&mut self, allocator: &mut GpuAllocator, current_frame: u64) -> Result<()> {
        for mut buffer in self.drain_expired(current_frame) {
            allocator.free_buffer(&mut buffer)?;
        }
        Ok(())
    }

    /// Free all pending buffers immediately.
    ///
    /// Call during shutdown, after `device_wait_idle`.
    pub fn flush(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        for mut buffer in self.drain_all() {
            allocator.free_buffer(&mut buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resources_mature_after_the_window() {
        let mut queue = DeferredQueue::new(2);
        queue.retire("a", 10);

        assert!(queue.drain_expired(10).is_empty());
        assert!(queue.drain_expired(12).is_empty());
        assert_eq!(queue.drain_expired(13), vec!["a"]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn drain_releases_in_fifo_order() {
        let mut queue = DeferredQueue::new(1);
        queue.retire(1, 0);
        queue.retire(2, 0);
        queue.retire(3, 5);

        assert_eq!(queue.drain_expired(5), vec![1, 2]);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.drain_expired(100), vec![3]);
    }

    #[test]
    fn drain_all_ignores_maturity() {
        let mut queue = DeferredQueue::new(3);
        queue.retire("x", 7);
        queue.retire("y", 7);

        assert_eq!(queue.drain_all(), vec!["x", "y"]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn widening_the_window_delays_release() {
        let mut queue = DeferredQueue::new(1);
        queue.retire("a", 10);
        queue.set_frames_in_flight(5);

        assert!(queue.drain_expired(12).is_empty());
        assert_eq!(queue.drain_expired(16), vec!["a"]);
    }
}
