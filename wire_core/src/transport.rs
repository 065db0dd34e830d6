// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Transport abstraction. The protocol only ever needs a place to put
//! outgoing command bytes and a callback-driven way to consume incoming
//! ones; everything about sockets, rings, or in-memory buffers stays behind
//! this trait.

use std::io::{Read, Write};

use crate::Error;

/// The sending half of a transport. Mirrors dawn_wire's `CommandSerializer`:
/// callers ask for space, write the command into it, and the transport
/// decides when to actually move bytes (buffering several small commands
/// into one flush is valid).
pub trait Transport {
    /// Returns a buffer of at least `size` bytes to serialize a command
    /// into, or `None` if `size` exceeds what this transport can ever send
    /// in one piece (the caller is expected to fall back to chunking).
    fn allocate(&mut self, size: usize) -> Option<&mut [u8]>;

    /// Flushes anything written into a previously returned buffer.
    fn flush(&mut self) -> Result<(), Error>;

    /// The largest single allocation this transport can satisfy without
    /// chunking.
    fn max_allocation_size(&self) -> usize;
}

/// The receiving half. Implementations feed raw bytes in as they arrive;
/// `CommandHandler::handle_commands` is expected to consume whole commands
/// and report how many bytes it consumed.
pub trait CommandHandler {
    /// Processes as many whole commands as `data` contains. Returns the
    /// number of bytes consumed (always a prefix of `data`; a partial
    /// trailing command is left unconsumed for the next call) or an error
    /// if a command was malformed.
    fn handle_commands(&mut self, data: &[u8]) -> Result<usize, Error>;
}

/// A fixed-capacity in-memory transport for tests, grounded in dawn's
/// `TerribleCommandBuffer`: the "terrible" part is letting a single buffer
/// hold at most one command's worth of data across a `flush`.
pub struct LoopbackBuffer {
    capacity: usize,
    pending: Vec<u8>,
    flushed: Vec<u8>,
}

impl LoopbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: Vec::new(),
            flushed: Vec::new(),
        }
    }

    /// Bytes that have been flushed and not yet drained by the consumer.
    pub fn drain_flushed(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.flushed)
    }
}

impl Transport for LoopbackBuffer {
    fn allocate(&mut self, size: usize) -> Option<&mut [u8]> {
        if size > self.capacity {
            return None;
        }
        self.pending = vec![0; size];
        Some(&mut self.pending)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.flushed.extend_from_slice(&self.pending);
        self.pending.clear();
        Ok(())
    }

    fn max_allocation_size(&self) -> usize {
        self.capacity
    }
}

/// A transport over any `Read + Write` stream (a TCP socket, a
/// `socketpair`-backed test pipe, ...). Each `flush` writes exactly one
/// command; there is no inter-command buffering on the wire.
pub struct StreamTransport<S> {
    stream: S,
    pending: Vec<u8>,
    max_allocation_size: usize,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S, max_allocation_size: usize) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            max_allocation_size,
        }
    }
}

impl<S: Write> Transport for StreamTransport<S> {
    fn allocate(&mut self, size: usize) -> Option<&mut [u8]> {
        if size > self.max_allocation_size {
            return None;
        }
        self.pending = vec![0; size];
        Some(&mut self.pending)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.stream.write_all(&self.pending)?;
        self.pending.clear();
        Ok(())
    }

    fn max_allocation_size(&self) -> usize {
        self.max_allocation_size
    }
}

impl<S: Read> StreamTransport<S> {
    /// Reads one header's worth of bytes to learn the incoming command's
    /// size, then reads the rest, and returns the whole command. Blocks
    /// until a full command (or EOF) is available.
    pub fn read_command(&mut self) -> Result<Option<Vec<u8>>, Error> {
        use crate::wire_format::Header;

        let mut header_bytes = [0u8; Header::SIZE];
        if let Err(e) = self.stream.read_exact(&mut header_bytes) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(e.into());
        }
        let header = Header::deserialize(&header_bytes)?;
        let body_len = (header.command_size as usize)
            .checked_sub(Header::SIZE)
            .ok_or(crate::ProtocolError::LengthOverflow)?;

        let mut buf = vec![0u8; header.command_size as usize];
        buf[..Header::SIZE].copy_from_slice(&header_bytes);
        self.stream.read_exact(&mut buf[Header::SIZE..])?;
        debug_assert_eq!(buf.len() - Header::SIZE, body_len);
        Ok(Some(buf))
    }
}

/// A `socketpair(2)`-backed pipe for tests, exactly as `rpc_protocol`'s
/// `pipe` module does for the NFS RPC protocol.
#[cfg(any(test, feature = "test-util"))]
pub mod pipe {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    pub struct Endpoint {
        fd: std::os::fd::OwnedFd,
    }

    pub fn pipe() -> std::io::Result<(Endpoint, Endpoint)> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )?;
        Ok((Endpoint { fd: a }, Endpoint { fd: b }))
    }

    impl std::io::Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::read(&self.fd, buf)?)
        }
    }

    impl std::io::Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::write(&self.fd, buf)?)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_rejects_oversized_allocation() {
        let mut t = LoopbackBuffer::new(16);
        assert!(t.allocate(17).is_none());
        assert!(t.allocate(16).is_some());
    }

    #[test]
    fn loopback_round_trips_a_flush() {
        let mut t = LoopbackBuffer::new(16);
        {
            let buf = t.allocate(4).unwrap();
            buf.copy_from_slice(&[1, 2, 3, 4]);
        }
        t.flush().unwrap();
        assert_eq!(t.drain_flushed(), vec![1, 2, 3, 4]);
    }
}
