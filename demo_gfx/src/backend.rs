// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The "driver" this demonstration schema sits on top of, in the role the
//! real graphics driver plays under dawn_wire. A production server would
//! hand these calls to an actual GPU driver; this one just manages `Vec<u8>`
//! buffers in host memory, which is enough to exercise the protocol.

pub type BufferHandle = u32;

pub trait Backend {
    fn create_buffer(&mut self, size: u64) -> BufferHandle;

    /// Returns the bytes currently in the buffer, or an error message if
    /// the offset/size is out of range.
    fn map_read(&mut self, handle: BufferHandle, offset: u64, size: u64) -> Result<Vec<u8>, String>;

    /// Validates a write-map request without producing data (the client
    /// supplies the bytes later, on unmap).
    fn map_write(&mut self, handle: BufferHandle, offset: u64, size: u64) -> Result<(), String>;

    /// Writes `data` into the buffer at `offset`. Called when a
    /// `BufferUpdateMappedData` command arrives.
    fn write_mapped(&mut self, handle: BufferHandle, offset: u64, data: &[u8]);

    fn destroy_buffer(&mut self, handle: BufferHandle);
}

struct BufferRecord {
    data: Vec<u8>,
}

/// A reference `Backend` that just keeps buffers as `Vec<u8>` in memory.
#[derive(Default)]
pub struct InMemoryBackend {
    buffers: Vec<Option<BufferRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for InMemoryBackend {
    fn create_buffer(&mut self, size: u64) -> BufferHandle {
        self.buffers.push(Some(BufferRecord {
            data: vec![0; size as usize],
        }));
        (self.buffers.len() - 1) as BufferHandle
    }

    fn map_read(&mut self, handle: BufferHandle, offset: u64, size: u64) -> Result<Vec<u8>, String> {
        let record = self
            .buffers
            .get(handle as usize)
            .and_then(|b| b.as_ref())
            .ok_or_else(|| "unknown buffer handle".to_string())?;
        let (offset, size) = (offset as usize, size as usize);
        if offset.checked_add(size).filter(|&e| e <= record.data.len()).is_none() {
            return Err("map range out of bounds".to_string());
        }
        Ok(record.data[offset..offset + size].to_vec())
    }

    fn map_write(&mut self, handle: BufferHandle, offset: u64, size: u64) -> Result<(), String> {
        let record = self
            .buffers
            .get(handle as usize)
            .and_then(|b| b.as_ref())
            .ok_or_else(|| "unknown buffer handle".to_string())?;
        let (offset, size) = (offset as usize, size as usize);
        if offset.checked_add(size).filter(|&e| e <= record.data.len()).is_none() {
            return Err("map range out of bounds".to_string());
        }
        Ok(())
    }

    fn write_mapped(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(Some(record)) = self.buffers.get_mut(handle as usize) {
            let offset = offset as usize;
            record.data[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if let Some(slot) = self.buffers.get_mut(handle as usize) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut b = InMemoryBackend::new();
        let h = b.create_buffer(8);
        b.map_write(h, 0, 4).unwrap();
        b.write_mapped(h, 0, &[1, 2, 3, 4]);
        let data = b.map_read(h, 0, 4).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_map_is_rejected() {
        let mut b = InMemoryBackend::new();
        let h = b.create_buffer(4);
        assert!(b.map_read(h, 2, 4).is_err());
    }
}
