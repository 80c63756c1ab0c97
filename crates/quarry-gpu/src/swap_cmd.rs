//! Double-buffered secondary command recording.

use std::sync::Arc;

use ash::vk;

use crate::command::{begin_secondary_command_buffer, end_command_buffer, CommandPool};
use crate::error::Result;
use crate::worker::WorkerThread;

/// Front/back index bookkeeping for the two buffers.
///
/// Tracks which buffers have been recorded so a swap can never hand out a
/// buffer that was never begun.
struct SwapState {
    front: usize,
    recorded: [bool; 2],
}

impl SwapState {
    const fn new() -> Self {
        Self {
            front: 0,
            recorded: [false; 2],
        }
    }

    const fn back(&self) -> usize {
        1 - self.front
    }

    fn mark_recorded(&mut self) {
        self.recorded[self.back()] = true;
    }

    fn swap(&mut self) -> usize {
        debug_assert!(
            self.recorded[self.back()],
            "swap requires a recording of the back buffer first"
        );
        self.front = self.back();
        self.front
    }
}

/// Two secondary command buffers, recorded back-to-front.
///
/// Each buffer has its own command pool; pools are externally synchronized,
/// so giving the recording thread exclusive ownership of the back pool makes
/// off-thread recording safe without locks. [`swap`](Self::swap) waits for
/// the back recording to finish before exchanging front and back, so a
/// buffer is never recorded and executed simultaneously.
pub struct SwapCommandBufferGroup {
    device: Arc<ash::Device>,
    pools: [CommandPool; 2],
    buffers: [vk::CommandBuffer; 2],
    state: SwapState,
    usage: vk::CommandBufferUsageFlags,
    worker: Option<WorkerThread>,
}

impl SwapCommandBufferGroup {
    /// Create a group on `queue_family`, recording inline.
    pub fn new(
        device: Arc<ash::Device>,
        queue_family: u32,
        usage: vk::CommandBufferUsageFlags,
    ) -> Result<Self> {
        Self::build(device, queue_family, usage, None)
    }

    /// Create a group that records on a dedicated worker thread.
    pub fn new_threaded(
        device: Arc<ash::Device>,
        queue_family: u32,
        usage: vk::CommandBufferUsageFlags,
        thread_name: &str,
    ) -> Result<Self> {
        Self::build(device, queue_family, usage, Some(WorkerThread::spawn(thread_name)))
    }

    fn build(
        device: Arc<ash::Device>,
        queue_family: u32,
        usage: vk::CommandBufferUsageFlags,
        worker: Option<WorkerThread>,
    ) -> Result<Self> {
        let make_pool_and_buffer = || -> Result<(CommandPool, vk::CommandBuffer)> {
            let pool = CommandPool::new(
                Arc::clone(&device),
                queue_family,
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?;
            let buffer = pool.allocate_secondary()?;
            Ok((pool, buffer))
        };

        let (pool_a, buffer_a) = make_pool_and_buffer()?;
        let (pool_b, buffer_b) = make_pool_and_buffer()?;

        Ok(Self {
            device,
            pools: [pool_a, pool_b],
            buffers: [buffer_a, buffer_b],
            state: SwapState::new(),
            usage,
            worker,
        })
    }

    /// Record the back buffer via `f`, inline or on the worker thread.
    ///
    /// Any previous contents of the back buffer are discarded. Calling this
    /// again before [`swap`](Self::swap) re-records the back buffer.
    pub fn record<F>(&mut self, f: F)
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) + Send + 'static,
    {
        let back = self.state.back();
        let device = Arc::clone(&self.device);
        let pool = self.pools[back].handle();
        let cmd = self.buffers[back];
        let usage = self.usage;

        let record = move || {
            // The back pool is owned exclusively by this closure until swap.
            let result: Result<()> = (|| unsafe {
                device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty())?;
                begin_secondary_command_buffer(&device, cmd, usage)?;
                f(&device, cmd);
                end_command_buffer(&device, cmd)?;
                Ok(())
            })();
            if let Err(err) = result {
                tracing::error!("secondary command buffer recording failed: {err}");
            }
        };

        match &self.worker {
            Some(worker) => worker.execute(record),
            None => record(),
        }
        self.state.mark_recorded();
    }

    /// Wait for the back recording to finish, exchange front and back, and
    /// return the freshly recorded buffer for execution.
    ///
    /// [`record`](Self::record) must have been called since the last swap;
    /// the back buffer is otherwise not in the executable state. The caller
    /// must not execute the returned buffer after the *next* swap's
    /// recording begins.
    pub fn swap(&mut self) -> vk::CommandBuffer {
        if let Some(worker) = &self.worker {
            worker.wait_idle();
        }
        self.buffers[self.state.swap()]
    }

    /// The buffer most recently returned by [`swap`](Self::swap).
    #[must_use]
    pub fn front(&self) -> vk::CommandBuffer {
        self.buffers[self.state.front]
    }

    /// Whether recording happens on a dedicated thread.
    #[must_use]
    pub fn is_threaded(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for SwapCommandBufferGroup {
    fn drop(&mut self) {
        // Caller contract: the GPU is done with both buffers by now. The
        // pools destroy themselves once the worker has drained.
        if let Some(worker) = &self.worker {
            worker.wait_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_alternates_after_each_recording() {
        let mut state = SwapState::new();

        state.mark_recorded();
        assert_eq!(state.swap(), 1);
        assert_eq!(state.back(), 0);

        state.mark_recorded();
        assert_eq!(state.swap(), 0);
        assert_eq!(state.back(), 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "recording of the back buffer")]
    fn swap_without_a_recording_is_rejected() {
        let mut state = SwapState::new();
        state.swap();
    }
}
