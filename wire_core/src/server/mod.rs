// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Generic forward-channel command dispatch loop.
//!
//! Ground truth: `WireServer.cpp`'s `Server::HandleCommands`/`Handle{Suffix}`
//! template logic, structurally generalized the way
//! `rpc_protocol::server::RpcService<T>` generalizes per-procedure dispatch
//! over a single private state `T`.

use log::{trace, warn};

use crate::chunked::ChunkedCommandHandler;
use crate::wire_format::{CommandAllocator, Deserializer, Header};
use crate::{Error, ProtocolError};

/// Hook for driver-side periodic work. Upstream calls `deviceTick()` once
/// before processing each batch of newly arrived bytes (spec 4.11, step 3:
/// "before each loop iteration").
pub trait Driver {
    fn tick(&mut self);
}

/// A forward-channel command handler: decode the command's body against
/// driver state `T`, using `alloc` for any scratch memory the decode needs.
/// Returning `Err` aborts the whole batch (a malformed or out-of-protocol
/// command ends the connection; there is no partial recovery).
pub type CommandHandler<T> =
    fn(&mut Deserializer, &mut T, &mut CommandAllocator) -> Result<(), Error>;

/// The server-side command loop: one procedure table (keyed by command id,
/// exactly like `RpcService<T>`'s procedure table keyed by RPC procedure
/// number), chunked-frame reassembly, and a reset-per-command scratch arena.
pub struct WireServer<T: Driver> {
    handlers: Vec<Option<CommandHandler<T>>>,
    pub state: T,
    allocator: CommandAllocator,
    chunked: ChunkedCommandHandler,
}

impl<T: Driver> WireServer<T> {
    pub fn new(handlers: Vec<Option<CommandHandler<T>>>, state: T) -> Self {
        Self {
            handlers,
            state,
            allocator: CommandAllocator::new(),
            chunked: ChunkedCommandHandler::new(),
        }
    }

    /// Processes every whole command in `data`. Calls `Driver::tick` once
    /// up front, then dispatches commands (transparently reassembling
    /// chunked ones first) until either the buffer is exhausted or only a
    /// partial trailing command remains. Returns the number of bytes
    /// consumed.
    pub fn handle_commands(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.state.tick();

        let mut offset = 0;
        while data.len() - offset >= Header::SIZE {
            let header = Header::deserialize(&data[offset..])?;
            let size = header.command_size as usize;
            if data.len() - offset < size {
                break;
            }
            let frame = &data[offset..offset + size];

            if ChunkedCommandHandler::is_chunk_header(&header) {
                if let Some(reassembled) = self.chunked.handle_chunk(frame)? {
                    trace!("reassembled chunked command, {} bytes", reassembled.len());
                    self.dispatch_one(&reassembled)?;
                }
            } else {
                self.dispatch_one(frame)?;
            }

            offset += size;
        }
        Ok(offset)
    }

    fn dispatch_one(&mut self, frame: &[u8]) -> Result<(), Error> {
        let header = Header::deserialize(frame)?;
        let handler = self
            .handlers
            .get(header.command_id as usize)
            .and_then(|h| *h)
            .ok_or_else(|| {
                warn!("unknown command id {}", header.command_id);
                ProtocolError::UnknownCommand(header.command_id)
            })?;

        let body = &frame[Header::SIZE..];
        let mut des = Deserializer::new(body);
        let result = handler(&mut des, &mut self.state, &mut self.allocator);
        self.allocator.reset();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver {
        ticks: u32,
        seen: Vec<u32>,
    }

    impl Driver for NullDriver {
        fn tick(&mut self) {
            self.ticks += 1;
        }
    }

    fn echo_handler(
        des: &mut Deserializer,
        state: &mut NullDriver,
        _alloc: &mut CommandAllocator,
    ) -> Result<(), Error> {
        let value = des.get_u32()?;
        state.seen.push(value);
        Ok(())
    }

    fn make_command(id: u32, payload: &[u8]) -> Vec<u8> {
        let size = (Header::SIZE + payload.len()) as u32;
        let mut buf = vec![0u8; size as usize];
        Header {
            command_id: id,
            command_size: size,
        }
        .serialize(&mut buf[0..Header::SIZE]);
        buf[Header::SIZE..].copy_from_slice(payload);
        buf
    }

    #[test]
    fn ticks_once_per_call_and_dispatches_known_commands() {
        let handlers = vec![Some(echo_handler as CommandHandler<NullDriver>)];
        let mut server = WireServer::new(
            handlers,
            NullDriver {
                ticks: 0,
                seen: Vec::new(),
            },
        );

        let cmd = make_command(0, &99u32.to_le_bytes());
        let consumed = server.handle_commands(&cmd).unwrap();
        assert_eq!(consumed, cmd.len());
        assert_eq!(server.state.ticks, 1);
        assert_eq!(server.state.seen, vec![99]);
    }

    #[test]
    fn unknown_command_id_is_an_error() {
        let handlers: Vec<Option<CommandHandler<NullDriver>>> = vec![];
        let mut server = WireServer::new(
            handlers,
            NullDriver {
                ticks: 0,
                seen: Vec::new(),
            },
        );
        let cmd = make_command(3, &[]);
        assert!(server.handle_commands(&cmd).is_err());
    }

    #[test]
    fn partial_trailing_command_is_left_unconsumed() {
        let handlers = vec![Some(echo_handler as CommandHandler<NullDriver>)];
        let mut server = WireServer::new(
            handlers,
            NullDriver {
                ticks: 0,
                seen: Vec::new(),
            },
        );
        let mut cmd = make_command(0, &1u32.to_le_bytes());
        cmd.truncate(cmd.len() - 1);
        let consumed = server.handle_commands(&cmd).unwrap();
        assert_eq!(consumed, 0);
    }
}
