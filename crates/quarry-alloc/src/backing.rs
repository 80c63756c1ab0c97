//! Storage abstraction for resizable buffers.

use crate::error::Result;

/// What a resizable buffer needs from its storage.
///
/// Growth reallocates: the implementation must preserve bytes `[0, old_len)`
/// at the same offsets in the new storage, so sub-buffer offsets stay valid
/// while the storage identity changes underneath them.
pub trait Backing {
    /// Current length of the storage in bytes.
    fn len(&self) -> u64;

    /// Whether the storage is zero-length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reallocate to `new_len` bytes, copying old contents forward.
    fn grow(&mut self, new_len: u64) -> Result<()>;

    /// Write `bytes` starting at `offset`. The caller guarantees the write
    /// stays within a live reservation.
    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;
}

/// Host-memory backing over a `Vec<u8>`.
///
/// The reference implementation and the test vehicle; the GPU crate provides
/// the device-buffer implementation.
#[derive(Debug, Default, Clone)]
pub struct HostBacking {
    bytes: Vec<u8>,
}

impl HostBacking {
    /// Create a zero-filled backing of `len` bytes.
    #[must_use]
    pub fn new(len: u64) -> Self {
        Self {
            bytes: vec![0; usize::try_from(len).unwrap_or(usize::MAX)],
        }
    }

    /// Read-only view of the stored bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Backing for HostBacking {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn grow(&mut self, new_len: u64) -> Result<()> {
        debug_assert!(new_len >= self.len(), "backing cannot shrink");
        self.bytes.resize(usize::try_from(new_len).unwrap_or(usize::MAX), 0);
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let start = offset as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_preserves_existing_bytes() {
        let mut backing = HostBacking::new(4);
        backing.write(0, &[1, 2, 3, 4]).unwrap();

        backing.grow(8).unwrap();
        assert_eq!(backing.len(), 8);
        assert_eq!(backing.as_slice(), &[1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn write_lands_at_offset() {
        let mut backing = HostBacking::new(8);
        backing.write(4, &[9, 9]).unwrap();
        assert_eq!(backing.as_slice(), &[0, 0, 0, 0, 9, 9, 0, 0]);
    }
}
