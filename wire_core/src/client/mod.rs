// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Generic client-side machinery: the reverse-channel command dispatch
//! loop and the buffer map-request table every buffer-like object needs.
//!
//! Ground truth: `WireClient.cpp`'s `Client::HandleCommands` for the
//! dispatch loop shape, and `Buffer::requests`/`ClearMapRequests` for the
//! map-request table. The dispatch loop itself is structurally the reverse
//! of `rpc_protocol::server::RpcService<T>`'s procedure-id dispatch table.

use std::collections::HashMap;

use log::warn;

use crate::wire_format::{Deserializer, Header};
use crate::{Error, ProtocolError};

/// One outstanding map request. `T` is whatever the concrete schema needs
/// to remember to answer the callback later (offset, size, direction,
/// the user's actual callback closure, ...).
pub struct MapRequestTable<T> {
    next_serial: u32,
    requests: HashMap<u32, T>,
}

impl<T> Default for MapRequestTable<T> {
    fn default() -> Self {
        Self {
            next_serial: 0,
            requests: HashMap::new(),
        }
    }
}

impl<T> MapRequestTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new request and returns the serial the server will echo
    /// back in its callback.
    pub fn insert(&mut self, request: T) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        self.requests.insert(serial, request);
        serial
    }

    /// Removes and returns a request by serial. Removing it *before* the
    /// caller invokes the associated callback (rather than after) is
    /// required: the upstream callback can itself call `unmap`, which must
    /// not find and re-fire the request that is currently being serviced.
    pub fn take(&mut self, serial: u32) -> Option<T> {
        self.requests.remove(&serial)
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drains every outstanding request, calling `f` on each. Used by
    /// `unmap`, which cancels every in-flight map request on the buffer it
    /// unmaps.
    pub fn clear<F: FnMut(T)>(&mut self, mut f: F) {
        for (_, request) in self.requests.drain() {
            f(request);
        }
    }
}

/// A reverse-channel command handler: given the command's body (header
/// already stripped) and the frontend state, apply its effect (usually:
/// look up an object, fire a callback).
pub type ReverseCommandHandler<D> = fn(&mut Deserializer, &mut D) -> Result<(), Error>;

/// Dispatches commands arriving on the reverse channel (server-to-client)
/// to per-command-id handlers, the mirror image of `server::WireServer<T>`.
pub struct WireClient<D> {
    handlers: Vec<Option<ReverseCommandHandler<D>>>,
    pub frontend: D,
}

impl<D> WireClient<D> {
    pub fn new(handlers: Vec<Option<ReverseCommandHandler<D>>>, frontend: D) -> Self {
        Self { handlers, frontend }
    }

    /// Dispatches every whole command found in `data`, returning the number
    /// of bytes consumed. A trailing partial command is left for the next
    /// call, matching the forward-channel server loop's behavior.
    pub fn handle_commands(&mut self, data: &[u8]) -> Result<usize, Error> {
        let mut offset = 0;
        while data.len() - offset >= Header::SIZE {
            let header = Header::deserialize(&data[offset..])?;
            let size = header.command_size as usize;
            if data.len() - offset < size {
                break;
            }

            let handler = self
                .handlers
                .get(header.command_id as usize)
                .and_then(|h| *h)
                .ok_or_else(|| {
                    warn!("unknown reverse command id {}", header.command_id);
                    ProtocolError::UnknownCommand(header.command_id)
                })?;

            let body = &data[offset + Header::SIZE..offset + size];
            let mut des = Deserializer::new(body);
            handler(&mut des, &mut self.frontend)?;

            offset += size;
        }
        Ok(offset)
    }
}
