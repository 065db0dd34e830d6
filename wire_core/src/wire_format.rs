// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Command header layout, bounds-checked scalar/slice decoding, and the
//! per-command scratch arena.

use crate::ProtocolError;

/// Every command on the wire, forward or reverse, starts with this header.
/// `command_size` includes the header itself, matching the chunked framer's
/// expectations (it compares this field directly against buffered size).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command_id: u32,
    pub command_size: u32,
}

impl Header {
    pub const SIZE: usize = 8;

    pub fn serialize(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.command_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.command_size.to_le_bytes());
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooShort);
        }
        let command_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let command_size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Ok(Self {
            command_id,
            command_size,
        })
    }
}

/// A cursor over an immutable byte buffer with overflow-checked reads.
///
/// Upstream dawn_wire computes `count * sizeof(T)` and similar products
/// without checking for overflow; every such computation here goes through
/// `checked_mul`/`checked_add` and fails closed.
pub struct Deserializer<'a> {
    buf: &'a [u8],
}

impl<'a> Deserializer<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        let b = self.take(1)?;
        Ok(b[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Reads a length-prefixed byte slice: a `u32` length followed by that
    /// many bytes. Rejects a length that would not fit in the remaining
    /// buffer, and rejects a length computation overflow before it ever
    /// gets that far.
    pub fn get_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    /// Reads exactly `len` raw bytes with no length prefix.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.buf.len() {
            return Err(ProtocolError::BufferTooShort);
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }
}

/// A cursor over a mutable byte buffer for writing fixed-width fields and
/// length-prefixed byte strings in the same order `Deserializer` expects
/// them back in.
pub struct Serializer<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> Serializer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf[self.offset] = v;
        self.offset += 1;
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf[self.offset..self.offset + 4].copy_from_slice(&v.to_le_bytes());
        self.offset += 4;
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf[self.offset..self.offset + 4].copy_from_slice(&v.to_le_bytes());
        self.offset += 4;
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf[self.offset..self.offset + 8].copy_from_slice(&v.to_le_bytes());
        self.offset += 8;
    }

    /// Writes a `u32` length prefix followed by `bytes`.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
    }

    /// Writes `bytes` with no length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
    }
}

/// The length, in bytes, of a `u32`-length-prefixed byte string of `len`
/// bytes, as written by `Serializer::put_bytes`.
pub const fn prefixed_len(len: usize) -> usize {
    4 + len
}

/// Checks that `offset + size` does not overflow and does not exceed
/// `capacity`. Used at every place the protocol validates a client-supplied
/// offset/size pair against a staging buffer or mapped region.
pub fn checked_bounds(offset: usize, size: usize, capacity: usize) -> Result<(), ProtocolError> {
    let end = offset
        .checked_add(size)
        .ok_or(ProtocolError::LengthOverflow)?;
    if end > capacity {
        return Err(ProtocolError::LengthOverflow);
    }
    Ok(())
}

/// Checks that `count * elem_size` does not overflow.
pub fn checked_array_size(count: usize, elem_size: usize) -> Result<usize, ProtocolError> {
    count
        .checked_mul(elem_size)
        .ok_or(ProtocolError::LengthOverflow)
}

const STATIC_BUFFER_SIZE: usize = 2048;

/// A bump allocator for per-command deserialization scratch memory. Serves
/// small allocations out of an inline static buffer; anything that doesn't
/// fit spills to a heap-allocated chunk. `reset` is called by the command
/// loop after every command so a connection's steady-state allocation cost
/// is usually zero.
pub struct CommandAllocator {
    static_buffer: [u8; STATIC_BUFFER_SIZE],
    static_used: usize,
    heap_chunks: Vec<Vec<u8>>,
}

impl Default for CommandAllocator {
    fn default() -> Self {
        Self {
            static_buffer: [0; STATIC_BUFFER_SIZE],
            static_used: 0,
            heap_chunks: Vec::new(),
        }
    }
}

impl CommandAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `size` zeroed scratch bytes, reusing the inline buffer when
    /// it has room and falling back to a heap chunk otherwise.
    pub fn alloc(&mut self, size: usize) -> &mut [u8] {
        if self.static_used + size <= STATIC_BUFFER_SIZE {
            let start = self.static_used;
            self.static_used += size;
            self.static_buffer[start..start + size].fill(0);
            &mut self.static_buffer[start..start + size]
        } else {
            self.heap_chunks.push(vec![0; size]);
            self.heap_chunks.last_mut().unwrap()
        }
    }

    /// Frees every outstanding allocation and rewinds to the start of the
    /// inline buffer.
    pub fn reset(&mut self) {
        self.static_used = 0;
        self.heap_chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header {
            command_id: 7,
            command_size: 42,
        };
        let mut buf = [0u8; Header::SIZE];
        h.serialize(&mut buf);
        assert_eq!(Header::deserialize(&buf).unwrap(), h);
    }

    #[test]
    fn header_rejects_short_buffer() {
        let buf = [0u8; 4];
        assert_eq!(
            Header::deserialize(&buf).unwrap_err(),
            ProtocolError::BufferTooShort
        );
    }

    #[test]
    fn deserializer_reads_length_prefixed_bytes() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&3u32.to_le_bytes());
        raw.extend_from_slice(b"abc");
        let mut d = Deserializer::new(&raw);
        assert_eq!(d.get_bytes().unwrap(), b"abc");
        assert_eq!(d.remaining(), 0);
    }

    #[test]
    fn deserializer_rejects_oversized_length_prefix() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1000u32.to_le_bytes());
        raw.extend_from_slice(b"abc");
        let mut d = Deserializer::new(&raw);
        assert_eq!(d.get_bytes().unwrap_err(), ProtocolError::BufferTooShort);
    }

    #[test]
    fn checked_bounds_rejects_overflow() {
        assert_eq!(
            checked_bounds(usize::MAX - 1, 10, usize::MAX).unwrap_err(),
            ProtocolError::LengthOverflow
        );
    }

    #[test]
    fn checked_bounds_rejects_out_of_range() {
        assert_eq!(
            checked_bounds(5, 10, 12).unwrap_err(),
            ProtocolError::LengthOverflow
        );
        assert!(checked_bounds(5, 7, 12).is_ok());
    }

    #[test]
    fn allocator_spills_to_heap_past_static_capacity() {
        let mut alloc = CommandAllocator::new();
        let first = alloc.alloc(STATIC_BUFFER_SIZE - 16);
        assert_eq!(first.len(), STATIC_BUFFER_SIZE - 16);
        let second = alloc.alloc(64);
        assert_eq!(second.len(), 64);
        alloc.reset();
        let third = alloc.alloc(8);
        assert_eq!(third.len(), 8);
    }
}
