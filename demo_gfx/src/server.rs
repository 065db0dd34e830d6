// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The server side of the demonstration schema: per-command handlers
//! registered with `wire_core::server::WireServer`, and the reverse-channel
//! commands they emit.

use log::{trace, warn};

use wire_core::known_objects::KnownObjects;
use wire_core::server::{CommandHandler, Driver};
use wire_core::wire_format::{CommandAllocator, Deserializer, Header, Serializer};
use wire_core::{Error, ProtocolError};

use crate::backend::{Backend, BufferHandle};
use crate::commands::{forward, reverse, WireStatus};

#[derive(Default)]
pub struct BuilderExtra {
    size: u64,
}

#[derive(Default, Clone, Copy)]
pub struct MappedRegion {
    pub offset: u64,
    pub size: u64,
    pub is_write: bool,
}

#[derive(Default)]
pub struct BufferExtra {
    pub mapped: Option<MappedRegion>,
}

/// Server-side device state: the two `KnownObjects` tables mirroring the
/// client's builder and buffer ids, the mock backend, and a queue of
/// reverse-channel bytes waiting to be sent back to the client.
pub struct ServerState<B> {
    pub builders: KnownObjects<(), BuilderExtra>,
    pub buffers: KnownObjects<BufferHandle, BufferExtra>,
    pub backend: B,
    pub outgoing: Vec<u8>,
    pub last_blob_len: usize,
}

impl<B: Backend> ServerState<B> {
    pub fn new(backend: B) -> Self {
        Self {
            builders: KnownObjects::new(),
            buffers: KnownObjects::new(),
            backend,
            outgoing: Vec::new(),
            last_blob_len: 0,
        }
    }

    fn push_command(&mut self, command_id: u32, body_len: usize, fill: impl FnOnce(&mut Serializer)) {
        let size = (Header::SIZE + body_len) as u32;
        let mut buf = vec![0u8; size as usize];
        Header {
            command_id,
            command_size: size,
        }
        .serialize(&mut buf[0..Header::SIZE]);
        let mut ser = Serializer::new(&mut buf[Header::SIZE..]);
        fill(&mut ser);
        self.outgoing.extend_from_slice(&buf);
    }

    fn send_buffer_error_callback(&mut self, id: u32, serial: u32, status: WireStatus, message: &str) {
        let msg = message.as_bytes();
        self.push_command(
            reverse::BUFFER_ERROR_CALLBACK,
            4 + 4 + 4 + wire_core::wire_format::prefixed_len(msg.len()),
            |ser| {
                ser.put_u32(id);
                ser.put_u32(serial);
                ser.put_u32(status.to_wire());
                ser.put_bytes(msg);
            },
        );
    }

    fn send_map_read_callback(
        &mut self,
        id: u32,
        serial: u32,
        request_serial: u32,
        status: WireStatus,
        data: &[u8],
    ) {
        self.push_command(
            reverse::BUFFER_MAP_READ_CALLBACK,
            4 + 4 + 4 + 4 + wire_core::wire_format::prefixed_len(data.len()),
            |ser| {
                ser.put_u32(id);
                ser.put_u32(serial);
                ser.put_u32(request_serial);
                ser.put_u32(status.to_wire());
                ser.put_bytes(data);
            },
        );
    }

    fn send_map_write_callback(
        &mut self,
        id: u32,
        serial: u32,
        request_serial: u32,
        status: WireStatus,
    ) {
        self.push_command(reverse::BUFFER_MAP_WRITE_CALLBACK, 4 + 4 + 4 + 4, |ser| {
            ser.put_u32(id);
            ser.put_u32(serial);
            ser.put_u32(request_serial);
            ser.put_u32(status.to_wire());
        });
    }
}

impl<B: Backend> Driver for ServerState<B> {
    fn tick(&mut self) {
        // The mock backend completes every request synchronously; a real
        // driver would pump its own event loop here.
    }
}

fn create_buffer_builder<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let builder_id = des.get_u32()?;
    let builder_serial = des.get_u32()?;
    let data = state
        .builders
        .allocate(builder_id, builder_serial)
        .ok_or_else(|| {
            warn!("failed to allocate builder id {builder_id}");
            ProtocolError::Invariant("builder id allocation failed")
        })?;
    data.valid = true;
    Ok(())
}

fn buffer_builder_set_size<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let builder_id = des.get_u32()?;
    let builder_serial = des.get_u32()?;
    let size = des.get_u64()?;

    let data = state
        .builders
        .get_mut(builder_id)
        .ok_or(ProtocolError::UnknownObject(builder_id))?;
    if data.serial != builder_serial {
        trace!("stale builder reference on SetSize, dropping");
        return Ok(());
    }
    if !data.valid {
        // Maybe monad: the builder is already poisoned, further setters
        // are no-ops.
        return Ok(());
    }
    if size == 0 {
        // Stands in for a real argument-validity check: a zero-size buffer
        // is treated as invalid and poisons the builder silently, to be
        // reported only when GetResult is called.
        data.valid = false;
        return Ok(());
    }
    data.extra.size = size;
    Ok(())
}

fn buffer_builder_get_result<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let builder_id = des.get_u32()?;
    let builder_serial = des.get_u32()?;
    let result_id = des.get_u32()?;
    let result_serial = des.get_u32()?;

    let builder = state
        .builders
        .get(builder_id)
        .ok_or(ProtocolError::UnknownObject(builder_id))?;
    if builder.serial != builder_serial {
        return Err(ProtocolError::UnknownObject(builder_id).into());
    }
    let (was_valid, size) = (builder.valid, builder.extra.size);

    state
        .buffers
        .allocate(result_id, result_serial)
        .ok_or_else(|| {
            warn!("failed to allocate result buffer id {result_id}");
            ProtocolError::Invariant("buffer id allocation failed")
        })?;

    if let Some(b) = state.builders.get_mut(builder_id) {
        b.built_object_id = result_id;
        b.built_object_serial = result_serial;
    }

    if !was_valid {
        // The maybe monad: a poisoned builder never reaches the backend.
        // The result slot still exists (kept in lockstep with the client)
        // but is marked invalid.
        let result_data = state.buffers.get_mut(result_id).unwrap();
        result_data.valid = false;
        state.send_buffer_error_callback(result_id, result_serial, WireStatus::Error, "maybe monad");
        return Ok(());
    }

    let handle = state.backend.create_buffer(size);
    let result_data = state.buffers.get_mut(result_id).unwrap();
    result_data.handle = Some(handle);
    result_data.valid = true;
    state.send_buffer_error_callback(result_id, result_serial, WireStatus::Success, "");
    Ok(())
}

fn buffer_builder_destroy<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let builder_id = des.get_u32()?;
    if builder_id == 0 {
        return Err(ProtocolError::Invariant("cannot destroy the null object").into());
    }
    state.builders.free(builder_id);
    Ok(())
}

fn buffer_destroy<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let buffer_id = des.get_u32()?;
    if buffer_id == 0 {
        return Err(ProtocolError::Invariant("cannot destroy the null object").into());
    }
    let data = state
        .buffers
        .get(buffer_id)
        .ok_or(ProtocolError::UnknownObject(buffer_id))?;
    if data.valid {
        let handle = data.handle.unwrap();
        state.backend.destroy_buffer(handle);
    }
    state.buffers.free(buffer_id);
    Ok(())
}

fn buffer_map_read_async<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let buffer_id = des.get_u32()?;
    let buffer_serial = des.get_u32()?;
    let request_serial = des.get_u32()?;
    let offset = des.get_u64()?;
    let size = des.get_u64()?;

    if buffer_id == 0 {
        return Err(ProtocolError::Invariant("cannot map the null object").into());
    }
    let data = state
        .buffers
        .get(buffer_id)
        .ok_or(ProtocolError::UnknownObject(buffer_id))?;
    if data.serial != buffer_serial || !data.valid {
        state.send_map_read_callback(buffer_id, buffer_serial, request_serial, WireStatus::Error, &[]);
        return Ok(());
    }
    let handle = data
        .handle
        .ok_or(ProtocolError::Invariant("valid buffer has no backend handle"))?;

    match state.backend.map_read(handle, offset, size) {
        Ok(bytes) => {
            if let Some(d) = state.buffers.get_mut(buffer_id) {
                d.extra.mapped = Some(MappedRegion {
                    offset,
                    size,
                    is_write: false,
                });
            }
            state.send_map_read_callback(
                buffer_id,
                buffer_serial,
                request_serial,
                WireStatus::Success,
                &bytes,
            );
        }
        Err(msg) => {
            trace!("map_read failed: {msg}");
            state.send_map_read_callback(buffer_id, buffer_serial, request_serial, WireStatus::Error, &[]);
        }
    }
    Ok(())
}

fn buffer_map_write_async<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let buffer_id = des.get_u32()?;
    let buffer_serial = des.get_u32()?;
    let request_serial = des.get_u32()?;
    let offset = des.get_u64()?;
    let size = des.get_u64()?;

    if buffer_id == 0 {
        return Err(ProtocolError::Invariant("cannot map the null object").into());
    }
    let data = state
        .buffers
        .get(buffer_id)
        .ok_or(ProtocolError::UnknownObject(buffer_id))?;
    if data.serial != buffer_serial || !data.valid {
        state.send_map_write_callback(buffer_id, buffer_serial, request_serial, WireStatus::Error);
        return Ok(());
    }
    let handle = data
        .handle
        .ok_or(ProtocolError::Invariant("valid buffer has no backend handle"))?;

    match state.backend.map_write(handle, offset, size) {
        Ok(()) => {
            if let Some(d) = state.buffers.get_mut(buffer_id) {
                d.extra.mapped = Some(MappedRegion {
                    offset,
                    size,
                    is_write: true,
                });
            }
            state.send_map_write_callback(buffer_id, buffer_serial, request_serial, WireStatus::Success);
        }
        Err(msg) => {
            trace!("map_write failed: {msg}");
            state.send_map_write_callback(buffer_id, buffer_serial, request_serial, WireStatus::Error);
        }
    }
    Ok(())
}

fn buffer_unmap<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let buffer_id = des.get_u32()?;
    let _buffer_serial = des.get_u32()?;
    if let Some(data) = state.buffers.get_mut(buffer_id) {
        data.extra.mapped = None;
    }
    Ok(())
}

fn buffer_update_mapped_data<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let buffer_id = des.get_u32()?;
    let _buffer_serial = des.get_u32()?;
    let offset = des.get_u64()?;
    let payload = des.get_bytes()?.to_vec();

    let data = state
        .buffers
        .get(buffer_id)
        .ok_or(ProtocolError::UnknownObject(buffer_id))?;
    data.extra
        .mapped
        .filter(|r| r.is_write && r.offset == offset && r.size == payload.len() as u64)
        .ok_or(ProtocolError::Invariant(
            "BufferUpdateMappedData does not match the active write-map region",
        ))?;
    let handle = data.handle.unwrap();
    state.backend.write_mapped(handle, offset, &payload);
    Ok(())
}

fn write_blob<B: Backend>(
    des: &mut Deserializer,
    state: &mut ServerState<B>,
    _alloc: &mut CommandAllocator,
) -> Result<(), Error> {
    let blob = des.get_bytes()?;
    trace!("received blob of {} bytes", blob.len());
    state.last_blob_len = blob.len();
    Ok(())
}

/// Builds the command-id-indexed handler table for a concrete backend type.
pub fn handler_table<B: Backend + 'static>() -> Vec<Option<CommandHandler<ServerState<B>>>> {
    let mut table: Vec<Option<CommandHandler<ServerState<B>>>> = vec![None; 10];
    table[forward::CREATE_BUFFER_BUILDER as usize] = Some(create_buffer_builder::<B>);
    table[forward::BUFFER_BUILDER_SET_SIZE as usize] = Some(buffer_builder_set_size::<B>);
    table[forward::BUFFER_BUILDER_GET_RESULT as usize] = Some(buffer_builder_get_result::<B>);
    table[forward::BUFFER_BUILDER_DESTROY as usize] = Some(buffer_builder_destroy::<B>);
    table[forward::BUFFER_DESTROY as usize] = Some(buffer_destroy::<B>);
    table[forward::BUFFER_MAP_READ_ASYNC as usize] = Some(buffer_map_read_async::<B>);
    table[forward::BUFFER_MAP_WRITE_ASYNC as usize] = Some(buffer_map_write_async::<B>);
    table[forward::BUFFER_UNMAP as usize] = Some(buffer_unmap::<B>);
    table[forward::BUFFER_UPDATE_MAPPED_DATA as usize] = Some(buffer_update_mapped_data::<B>);
    table[forward::WRITE_BLOB as usize] = Some(write_blob::<B>);
    table
}
