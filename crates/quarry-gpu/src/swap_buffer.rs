//! Per-frame buffer replication.

use crate::backing::{GpuSubBuffer, GpuUniformBuffer};
use crate::error::{GpuError, Result};

/// N logically-identical element slots, one per frame in flight.
///
/// The CPU writes frame `i`'s copy while the GPU still reads frame `i-1`'s,
/// so per-frame data never races. All slots are carved from a
/// [`GpuUniformBuffer`] up front and freed together on drop.
pub struct SwapBuffer {
    slots: Vec<GpuSubBuffer>,
    current: usize,
}

impl SwapBuffer {
    /// Carve `frames_in_flight` slots from `buffer`.
    pub fn new(buffer: &GpuUniformBuffer, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(GpuError::InvalidState(
                "swap buffer needs at least one frame in flight".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            slots.push(buffer.allocate(None)?);
        }

        Ok(Self { slots, current: 0 })
    }

    /// Write `data` into the slot for `frame`.
    pub fn write(&self, frame: usize, data: &[u8]) -> Result<()> {
        let slot = self
            .slots
            .get(frame % self.slots.len())
            .ok_or_else(|| GpuError::InvalidState("swap buffer has no slots".to_string()))?;
        slot.write(data)?;
        Ok(())
    }

    /// Write `data` into the current slot.
    pub fn write_current(&self, data: &[u8]) -> Result<()> {
        self.write(self.current, data)
    }

    /// Byte offset of the slot for `frame` within the backing buffer.
    #[must_use]
    pub fn offset(&self, frame: usize) -> u64 {
        self.slots[frame % self.slots.len()].offset()
    }

    /// The current slot.
    #[must_use]
    pub fn current(&self) -> &GpuSubBuffer {
        &self.slots[self.current]
    }

    /// Index of the current slot.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current
    }

    /// Advance to the next frame's slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Number of replicated slots.
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Size of one slot in bytes.
    #[must_use]
    pub fn slot_size(&self) -> u64 {
        self.slots.first().map_or(0, GpuSubBuffer::size)
    }
}
