// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Wire command ids for the demonstration object schema.
//!
//! This is hand-written instead of generated: the demonstration schema is
//! small enough that the marshalling generator `xdr_codegen` would have
//! produced (and which is out of scope for this crate) buys nothing here.
//! Field layouts are written with `wire_core::wire_format::{Serializer,
//! Deserializer}` directly by `client`/`server`.

/// Forward-channel (client -> server) command ids.
pub mod forward {
    pub const CREATE_BUFFER_BUILDER: u32 = 0;
    pub const BUFFER_BUILDER_SET_SIZE: u32 = 1;
    pub const BUFFER_BUILDER_GET_RESULT: u32 = 2;
    pub const BUFFER_BUILDER_DESTROY: u32 = 3;
    pub const BUFFER_DESTROY: u32 = 4;
    pub const BUFFER_MAP_READ_ASYNC: u32 = 5;
    pub const BUFFER_MAP_WRITE_ASYNC: u32 = 6;
    pub const BUFFER_UNMAP: u32 = 7;
    pub const BUFFER_UPDATE_MAPPED_DATA: u32 = 8;
    /// Not part of the buffer/builder object model; used only to exercise
    /// chunked framing with a payload of arbitrary size (scenario S6).
    pub const WRITE_BLOB: u32 = 9;
}

/// Reverse-channel (server -> client) command ids.
pub mod reverse {
    pub const BUFFER_ERROR_CALLBACK: u32 = 0;
    pub const BUFFER_MAP_READ_CALLBACK: u32 = 1;
    pub const BUFFER_MAP_WRITE_CALLBACK: u32 = 2;
    pub const DEVICE_ERROR_CALLBACK: u32 = 3;
}

/// Status codes carried by the reverse-channel error/map callbacks. Encoded
/// as a `u32` on the wire (0 = success).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStatus {
    Success,
    Error,
    Unknown,
}

impl WireStatus {
    pub fn to_wire(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::Unknown => 2,
        }
    }

    pub fn from_wire(v: u32) -> Self {
        match v {
            0 => Self::Success,
            1 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl From<WireStatus> for wire_core::builder::BuilderStatus {
    fn from(s: WireStatus) -> Self {
        match s {
            WireStatus::Success => wire_core::builder::BuilderStatus::Success,
            WireStatus::Error => wire_core::builder::BuilderStatus::Error,
            WireStatus::Unknown => wire_core::builder::BuilderStatus::Unknown,
        }
    }
}
