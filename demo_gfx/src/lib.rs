// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A small, hand-written object schema (`Device`/`Buffer`/`BufferBuilder`)
//! that exercises `wire_core`'s generic protocol machinery end to end. This
//! plays the role a code generator's output plays in upstream dawn_wire;
//! the schema itself is intentionally minimal.

pub mod backend;
pub mod client;
pub mod commands;
pub mod server;
