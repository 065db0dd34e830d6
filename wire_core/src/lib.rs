// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Generic client/server object-identity wire protocol.
//!
//! This crate implements the protocol mechanics only: object id allocation,
//! one-shot builder callbacks, buffer map/unmap bookkeeping, chunked command
//! framing, and an inline memory-transfer service. It knows nothing about
//! any particular object schema or driver; a concrete schema (its commands,
//! object types, and driver trait) is expected to sit on top, the way
//! `demo_gfx` does here.

pub mod builder;
pub mod chunked;
pub mod client;
pub mod known_objects;
pub mod memory_transfer;
pub mod object_id;
pub mod server;
pub mod transport;
pub mod wire_format;

use std::fmt;

/// Errors that end a connection outright. Per-object/per-request errors
/// (a builder failing, a map request failing) are not part of this enum:
/// those are delivered as status values through callbacks, never as
/// `Result::Err`, matching the protocol's "maybe monad" design.
#[derive(Debug)]
pub enum Error {
    /// A command could not be decoded, or decoded to something the
    /// protocol's invariants disallow (bad object id, length overflow,
    /// chunk framing violation, ...).
    Protocol(ProtocolError),

    /// The transport itself failed.
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Fatal decode/dispatch errors. Any of these ends the connection: the
/// protocol has no in-band recovery from a malformed command stream.
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before a complete header or field could be read.
    BufferTooShort,

    /// A length field, when combined with an offset or element size, would
    /// overflow. Upstream dawn_wire computes these with unchecked
    /// multiplication; this port rejects them instead.
    LengthOverflow,

    /// The command id in the header does not correspond to any registered
    /// handler.
    UnknownCommand(u32),

    /// A command referenced an object id that is out of range or was never
    /// allocated.
    UnknownObject(u32),

    /// A chunked command's accumulated size exceeds the size declared in
    /// its outer header, or a chunk's declared size exceeds the remaining
    /// space for its stream.
    ChunkFraming,

    /// A handler-specific invariant was violated (e.g. a map-write callback
    /// arriving for a request that was issued as map-read).
    Invariant(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "buffer ended before a complete field"),
            Self::LengthOverflow => write!(f, "length computation overflowed"),
            Self::UnknownCommand(id) => write!(f, "unknown command id {id}"),
            Self::UnknownObject(id) => write!(f, "unknown object id {id}"),
            Self::ChunkFraming => write!(f, "chunked command framing violation"),
            Self::Invariant(msg) => write!(f, "protocol invariant violated: {msg}"),
        }
    }
}

/// An object's wire identity: a unilaterally client-allocated id plus a
/// generation counter that distinguishes this allocation of the id from any
/// prior one. See spec invariants on object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub id: u32,
    pub serial: u32,
}

impl ObjectId {
    pub const fn new(id: u32, serial: u32) -> Self {
        Self { id, serial }
    }
}
