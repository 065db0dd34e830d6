// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The inline memory-transfer service: buffer map data moves through the
//! command stream itself rather than through a separate shared-memory
//! handle, so "creating" a handle costs no wire bytes.
//!
//! Ground truth: `ClientInlineMemoryTransferService.cpp`.

use crate::wire_format::checked_bounds;
use crate::ProtocolError;

/// A client-side staging buffer backing a map-read request. The server
/// streams data into it via `deserialize_data_update`; user code reads it
/// back out via `data`.
pub struct ReadHandle {
    data: Vec<u8>,
}

impl ReadHandle {
    /// Matches upstream: `SerializeCreateSize() == 0`/`SerializeCreate()` is
    /// a no-op, so creating a handle is simply allocating local storage.
    pub fn new(size: usize) -> Self {
        Self { data: vec![0; size] }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copies `payload` into this handle's staging buffer at `offset`,
    /// after the same bounds checks upstream's `DeserializeDataUpdate`
    /// performs (payload length must equal the declared update size, and
    /// `offset + size` must fit within the handle).
    pub fn deserialize_data_update(
        &mut self,
        payload: &[u8],
        offset: usize,
        size: usize,
    ) -> Result<(), ProtocolError> {
        if payload.len() != size {
            return Err(ProtocolError::LengthOverflow);
        }
        checked_bounds(offset, size, self.data.len())?;
        self.data[offset..offset + size].copy_from_slice(payload);
        Ok(())
    }
}

/// A client-side staging buffer backing a map-write request. The app writes
/// into `data_mut`; on unmap, `serialize_data_update` copies it out onto the
/// wire as a `BufferUpdateMappedData` command.
pub struct WriteHandle {
    data: Vec<u8>,
}

impl WriteHandle {
    /// Upstream zero-initializes a write handle's staging buffer.
    pub fn new(size: usize) -> Self {
        Self { data: vec![0; size] }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn size_of_serialize_data_update(&self) -> usize {
        self.data.len()
    }

    /// Copies the full staging buffer out for transmission.
    pub fn serialize_data_update(&self) -> &[u8] {
        &self.data
    }
}

/// The driver/server-side counterpart of a map-write handle: the driver
/// hands back a raw mapped region, and an incoming `BufferUpdateMappedData`
/// command is memcpy'd straight into it.
pub struct ServerWriteTarget<'a> {
    region: &'a mut [u8],
}

impl<'a> ServerWriteTarget<'a> {
    pub fn new(region: &'a mut [u8]) -> Self {
        Self { region }
    }

    pub fn update(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if payload.len() != self.region.len() {
            return Err(ProtocolError::LengthOverflow);
        }
        self.region.copy_from_slice(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_handle_rejects_out_of_bounds_update() {
        let mut h = ReadHandle::new(8);
        let payload = [1u8, 2, 3];
        assert!(h.deserialize_data_update(&payload, 6, 3).is_err());
        assert!(h.deserialize_data_update(&payload, 5, 3).is_ok());
        assert_eq!(&h.data()[5..8], &payload);
    }

    #[test]
    fn read_handle_rejects_mismatched_declared_size() {
        let mut h = ReadHandle::new(8);
        let payload = [1u8, 2, 3];
        assert!(h.deserialize_data_update(&payload, 0, 4).is_err());
    }

    #[test]
    fn write_handle_round_trips_staged_bytes() {
        let mut h = WriteHandle::new(4);
        h.data_mut().copy_from_slice(&[9, 8, 7, 6]);
        assert_eq!(h.serialize_data_update(), &[9, 8, 7, 6]);
    }

    #[test]
    fn server_write_target_rejects_size_mismatch() {
        let mut buf = [0u8; 4];
        let mut target = ServerWriteTarget::new(&mut buf);
        assert!(target.update(&[1, 2, 3]).is_err());
        assert!(target.update(&[1, 2, 3, 4]).is_ok());
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}
