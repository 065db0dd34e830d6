// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Splits commands too large for a transport's single allocation into a
//! sequence of chunk frames, and reassembles them on the other end.
//!
//! Ground truth: `ChunkedCommandSerializer.h` / `ChunkedCommandHandler.h/.cpp`.
//! A command is only ever chunked if it doesn't fit in one allocation;
//! everything else goes out as a single direct command, unchanged.

use std::collections::HashMap;

use log::{trace, warn};

use crate::transport::Transport;
use crate::wire_format::Header;
use crate::{Error, ProtocolError};

const CHUNKED_COMMAND_ID: u32 = u32::MAX;
/// Header of a chunk frame: the normal `Header` (id = CHUNKED_COMMAND_ID,
/// size = this frame's total size) followed by a 64-bit stream id (spec
/// §6's `ChunkedCommand { id: u64, ... }`) and the reassembled command's
/// total size.
const CHUNK_HEADER_SIZE: usize = Header::SIZE + 8 + 4;

/// Wraps a `Transport`, splitting any command that doesn't fit the inner
/// transport's single allocation into a run of chunk frames sharing one
/// stream id.
pub struct ChunkedCommandSerializer<T> {
    inner: T,
    next_stream_id: u64,
}

impl<T: Transport> ChunkedCommandSerializer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            next_stream_id: 0,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Serializes `command_size` bytes (already fully formed, including its
    /// own `Header`) either directly, if the inner transport can take it in
    /// one allocation, or split across chunk frames otherwise.
    pub fn send(&mut self, command: &[u8]) -> Result<(), Error> {
        if command.len() <= self.inner.max_allocation_size() {
            let buf = self
                .inner
                .allocate(command.len())
                .expect("checked against max_allocation_size above");
            buf.copy_from_slice(command);
            return self.inner.flush();
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(1);

        let max_chunk_payload = self
            .inner
            .max_allocation_size()
            .checked_sub(CHUNK_HEADER_SIZE)
            .filter(|&n| n > 0)
            .expect("transport must be able to carry at least one chunk header and a byte");

        let mut offset = 0;
        while offset < command.len() {
            let payload_len = max_chunk_payload.min(command.len() - offset);
            let frame_size = CHUNK_HEADER_SIZE + payload_len;
            let buf = self
                .inner
                .allocate(frame_size)
                .ok_or(ProtocolError::ChunkFraming)?;

            let header = Header {
                command_id: CHUNKED_COMMAND_ID,
                command_size: frame_size as u32,
            };
            header.serialize(&mut buf[0..Header::SIZE]);
            buf[Header::SIZE..Header::SIZE + 8].copy_from_slice(&stream_id.to_le_bytes());
            buf[Header::SIZE + 8..CHUNK_HEADER_SIZE]
                .copy_from_slice(&(command.len() as u32).to_le_bytes());
            buf[CHUNK_HEADER_SIZE..].copy_from_slice(&command[offset..offset + payload_len]);

            self.inner.flush()?;
            offset += payload_len;
        }
        Ok(())
    }
}

struct PartialCommand {
    data: Vec<u8>,
    put_offset: usize,
    remaining: usize,
}

/// Receiver-side reassembly, keyed by stream id so multiple oversized
/// commands can be in flight concurrently (one per stream id; a single
/// connection typically only ever uses one at a time but the protocol
/// doesn't require that).
#[derive(Default)]
pub struct ChunkedCommandHandler {
    partial: HashMap<u64, PartialCommand>,
}

impl ChunkedCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `header` names a chunk frame rather than a normal command.
    pub fn is_chunk_header(header: &Header) -> bool {
        header.command_id == CHUNKED_COMMAND_ID
    }

    /// Feeds one chunk frame (header already peeked by the caller) and
    /// returns `Some(reassembled command)` once the stream completes, or
    /// `None` while more chunks are still expected.
    pub fn handle_chunk(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let header = Header::deserialize(frame)?;
        if !Self::is_chunk_header(&header) {
            return Err(ProtocolError::ChunkFraming.into());
        }
        if frame.len() < CHUNK_HEADER_SIZE {
            return Err(ProtocolError::BufferTooShort.into());
        }
        let stream_id = u64::from_le_bytes(frame[Header::SIZE..Header::SIZE + 8].try_into().unwrap());
        let total_size = u32::from_le_bytes(
            frame[Header::SIZE + 8..CHUNK_HEADER_SIZE]
                .try_into()
                .unwrap(),
        ) as usize;
        let payload = &frame[CHUNK_HEADER_SIZE..];

        let entry = self.partial.entry(stream_id).or_insert_with(|| {
            trace!("starting chunk reassembly for stream {stream_id}, total {total_size}");
            PartialCommand {
                data: vec![0; total_size],
                put_offset: 0,
                remaining: total_size,
            }
        });

        if payload.len() > entry.remaining {
            warn!(
                "chunk framing violation on stream {stream_id}: chunk of {} exceeds remaining {}",
                payload.len(),
                entry.remaining
            );
            self.partial.remove(&stream_id);
            return Err(ProtocolError::ChunkFraming.into());
        }

        entry.data[entry.put_offset..entry.put_offset + payload.len()].copy_from_slice(payload);
        entry.put_offset += payload.len();
        entry.remaining -= payload.len();

        if entry.remaining == 0 {
            let done = self.partial.remove(&stream_id).unwrap();
            return Ok(Some(done.data));
        }
        Ok(None)
    }
}
