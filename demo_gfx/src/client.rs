// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The client side of the demonstration schema: `Device`, `Buffer`, and
//! `BufferBuilder`, built on `wire_core::object_id::ObjectAllocator` and
//! `wire_core::client`.

use log::trace;

use wire_core::builder::{BuilderCallback, BuilderStatus};
use wire_core::chunked::ChunkedCommandSerializer;
use wire_core::client::{MapRequestTable, ReverseCommandHandler, WireClient};
use wire_core::memory_transfer::{ReadHandle, WriteHandle};
use wire_core::object_id::ObjectAllocator;
use wire_core::transport::LoopbackBuffer;
use wire_core::wire_format::{prefixed_len, Deserializer, Header, Serializer};
use wire_core::Error;

use crate::commands::{forward, reverse, WireStatus};

/// The status delivered to a map-read/map-write callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStatus {
    Success,
    Error,
    /// The buffer was unmapped (or destroyed) while this request was still
    /// in flight.
    Unknown,
}

type BuilderResultCallback = Box<dyn FnOnce(BuilderStatus, &str)>;
type ReadMapCallback = Box<dyn FnOnce(MapStatus, &[u8])>;
type WriteMapCallback = Box<dyn FnOnce(MapStatus)>;

enum MapRequest {
    Read(ReadMapCallback),
    /// `offset`/`size` are carried here rather than on `MappedBuffer` so the
    /// write-map staging buffer can be allocated on the success return
    /// (spec 4.7), not eagerly at request time.
    Write {
        offset: u64,
        size: u64,
        callback: WriteMapCallback,
    },
}

enum MappedBuffer {
    Read(ReadHandle),
    Write(WriteHandle, u64),
}

/// Per-buffer client-side bookkeeping: the external refcount, the
/// not-yet-fired builder callback, outstanding map requests keyed by serial,
/// and the currently mapped region, if any.
#[derive(Default)]
pub struct BufferClientState {
    refcount: u32,
    builder_callback: BuilderCallback<BuilderResultCallback>,
    map_requests: MapRequestTable<MapRequest>,
    mapped: Option<MappedBuffer>,
}

/// Per-builder client-side bookkeeping: just the external refcount. This
/// schema's builders take their result callback directly as a `get_result`
/// argument rather than through a separate `setErrorCallback` entry point,
/// so (unlike the built `Buffer`) there is never a callback parked on the
/// builder itself for an early `release` to fire.
#[derive(Default)]
struct BuilderClientState {
    refcount: u32,
}

/// The client-side connection: object allocators for the two object types
/// in this schema, the outgoing transport, and the device-level error
/// callback that catches builder errors no per-object callback consumed
/// (spec 4.6's fallback rule).
pub struct Device {
    builders: ObjectAllocator<BuilderClientState>,
    buffers: ObjectAllocator<BufferClientState>,
    transport: ChunkedCommandSerializer<LoopbackBuffer>,
    error_callback: Option<Box<dyn FnMut(&str)>>,
}

impl Device {
    pub fn new(max_allocation_size: usize) -> Self {
        Self {
            builders: ObjectAllocator::new(),
            buffers: ObjectAllocator::new(),
            transport: ChunkedCommandSerializer::new(LoopbackBuffer::new(max_allocation_size)),
            error_callback: None,
        }
    }

    /// Registers the device-level error callback. A builder error that no
    /// per-object callback was ever armed to consume is forwarded here
    /// instead of being silently dropped (spec 4.6).
    pub fn set_error_callback(&mut self, callback: impl FnMut(&str) + 'static) {
        self.error_callback = Some(Box::new(callback));
    }

    /// Drains bytes flushed to the transport since the last call, ready to
    /// be handed to the server's `WireServer::handle_commands`.
    pub fn drain_outgoing(&mut self) -> Vec<u8> {
        self.transport.inner_mut().drain_flushed()
    }

    fn send(&mut self, command_id: u32, body_len: usize, fill: impl FnOnce(&mut Serializer)) {
        let size = (Header::SIZE + body_len) as u32;
        let mut buf = vec![0u8; size as usize];
        Header {
            command_id,
            command_size: size,
        }
        .serialize(&mut buf[0..Header::SIZE]);
        let mut ser = Serializer::new(&mut buf[Header::SIZE..]);
        fill(&mut ser);
        // Sending through the chunked serializer rather than the loopback
        // buffer directly means oversized commands (see `write_blob`) are
        // transparently split into chunk frames.
        self.transport.send(&buf).expect("loopback transport never fails to flush");
    }

    pub fn create_buffer_builder(&mut self) -> BufferBuilder {
        let (id, serial) = self.builders.new_object(BuilderClientState { refcount: 1 });
        self.send(forward::CREATE_BUFFER_BUILDER, 8, |ser| {
            ser.put_u32(id);
            ser.put_u32(serial);
        });
        BufferBuilder { id, serial }
    }

    /// Not part of the object model: exercises chunked framing directly
    /// with an arbitrary-size payload (scenario S6).
    pub fn write_blob(&mut self, blob: &[u8]) {
        self.send(forward::WRITE_BLOB, prefixed_len(blob.len()), |ser| {
            ser.put_bytes(blob);
        });
    }

    /// Dispatches every whole reverse-channel command in `data`. Returns
    /// the number of bytes consumed.
    pub fn handle_commands(&mut self, data: &[u8]) -> Result<usize, Error> {
        let mut dispatcher = WireClient::new(reverse_handlers(), self);
        dispatcher.handle_commands(data)
    }
}

fn reverse_handlers() -> Vec<Option<ReverseCommandHandler<&mut Device>>> {
    let mut table: Vec<Option<ReverseCommandHandler<&mut Device>>> = vec![None; 4];
    table[reverse::BUFFER_ERROR_CALLBACK as usize] = Some(handle_buffer_error_callback);
    table[reverse::BUFFER_MAP_READ_CALLBACK as usize] = Some(handle_map_read_callback);
    table[reverse::BUFFER_MAP_WRITE_CALLBACK as usize] = Some(handle_map_write_callback);
    table[reverse::DEVICE_ERROR_CALLBACK as usize] = Some(handle_device_error_callback);
    table
}

fn handle_device_error_callback(des: &mut Deserializer, device: &mut &mut Device) -> Result<(), Error> {
    let message = des.get_bytes()?;
    let message = std::str::from_utf8(message).unwrap_or("<invalid utf8>");
    if let Some(cb) = device.error_callback.as_mut() {
        cb(message);
    }
    Ok(())
}

fn handle_buffer_error_callback(des: &mut Deserializer, device: &mut &mut Device) -> Result<(), Error> {
    let id = des.get_u32()?;
    let serial = des.get_u32()?;
    let status = WireStatus::from_wire(des.get_u32()?);
    let message = des.get_bytes()?;
    let message = std::str::from_utf8(message).unwrap_or("<invalid utf8>");

    if !device.buffers.contains_index(id) {
        return Err(wire_core::ProtocolError::UnknownObject(id).into());
    }
    if device.buffers.get_serial(id) != Some(serial) {
        trace!("dropping error callback for stale or freed buffer {id}/{serial}");
        return Ok(());
    }
    let Some(data) = device.buffers.get_mut(id) else {
        return Ok(());
    };
    // Fallback (spec 4.6): if no per-object callback is armed to consume
    // this error, a real failure is forwarded to the device-level error
    // callback instead of being silently swallowed. In steady-state use
    // `get_result` always arms one, so this only triggers for a duplicate
    // or out-of-order reply a well-behaved server never sends.
    if !data.builder_callback.is_armed() {
        if status != WireStatus::Success {
            if let Some(cb) = device.error_callback.as_mut() {
                cb(message);
            }
        }
        return Ok(());
    }
    data.builder_callback.call(status.into(), message);
    Ok(())
}

fn handle_map_read_callback(des: &mut Deserializer, device: &mut &mut Device) -> Result<(), Error> {
    let id = des.get_u32()?;
    let serial = des.get_u32()?;
    let request_serial = des.get_u32()?;
    let status = WireStatus::from_wire(des.get_u32()?);
    // Always consume the payload, even if the request turns out to be
    // stale or missing, so the command stream stays aligned for whatever
    // comes after this command.
    let payload = des.get_bytes()?;

    if !device.buffers.contains_index(id) {
        return Err(wire_core::ProtocolError::UnknownObject(id).into());
    }
    if device.buffers.get_serial(id) != Some(serial) {
        return Ok(());
    }
    let Some(data) = device.buffers.get_mut(id) else {
        return Ok(());
    };
    let callback = match data.map_requests.take(request_serial) {
        None => return Ok(()),
        Some(MapRequest::Read(callback)) => callback,
        // The client only ever records a request's kind when it sends the
        // matching *Async call; a write-recorded request answered with a
        // read callback means the server's reply disagrees with what was
        // asked, not a stale/late message.
        Some(MapRequest::Write { .. }) => {
            return Err(wire_core::ProtocolError::Invariant(
                "map-read callback answered a request recorded as a write map",
            )
            .into())
        }
    };

    match status {
        WireStatus::Success => {
            let mut handle = ReadHandle::new(payload.len());
            handle
                .deserialize_data_update(payload, 0, payload.len())
                .map_err(Error::Protocol)?;
            callback(MapStatus::Success, handle.data());
            data.mapped = Some(MappedBuffer::Read(handle));
        }
        _ => callback(MapStatus::Error, &[]),
    }
    Ok(())
}

fn handle_map_write_callback(des: &mut Deserializer, device: &mut &mut Device) -> Result<(), Error> {
    let id = des.get_u32()?;
    let serial = des.get_u32()?;
    let request_serial = des.get_u32()?;
    let status = WireStatus::from_wire(des.get_u32()?);

    if !device.buffers.contains_index(id) {
        return Err(wire_core::ProtocolError::UnknownObject(id).into());
    }
    if device.buffers.get_serial(id) != Some(serial) {
        return Ok(());
    }
    let Some(data) = device.buffers.get_mut(id) else {
        return Ok(());
    };
    let (offset, size, callback) = match data.map_requests.take(request_serial) {
        None => return Ok(()),
        Some(MapRequest::Write { offset, size, callback }) => (offset, size, callback),
        Some(MapRequest::Read(_)) => {
            return Err(wire_core::ProtocolError::Invariant(
                "map-write callback answered a request recorded as a read map",
            )
            .into())
        }
    };

    if status == WireStatus::Success {
        // Spec 4.7: the local staging buffer is allocated on the success
        // return, not at request time, so a not-yet-confirmed map never
        // exposes a writable range to the application.
        data.mapped = Some(MappedBuffer::Write(WriteHandle::new(size as usize), offset));
    } else {
        data.mapped = None;
    }
    callback(if status == WireStatus::Success {
        MapStatus::Success
    } else {
        MapStatus::Error
    });
    Ok(())
}

/// A buffer still under construction. Mirrors the one-shot builder pattern:
/// `get_result` consumes the builder and returns the `Buffer` whose builder
/// callback will eventually fire exactly once.
#[derive(Debug, Clone, Copy)]
pub struct BufferBuilder {
    id: u32,
    serial: u32,
}

impl BufferBuilder {
    pub fn set_size(&self, device: &mut Device, size: u64) {
        let (id, serial) = (self.id, self.serial);
        device.send(forward::BUFFER_BUILDER_SET_SIZE, 16, |ser| {
            ser.put_u32(id);
            ser.put_u32(serial);
            ser.put_u64(size);
        });
    }

    /// Consumes the builder, returning the `Buffer` it will produce.
    /// `callback` fires exactly once, whether the server reports success,
    /// an error, or the device is destroyed before it can respond.
    pub fn get_result(
        self,
        device: &mut Device,
        callback: impl FnOnce(BuilderStatus, &str) + 'static,
    ) -> Buffer {
        let (result_id, result_serial) = device.buffers.new_object(BufferClientState {
            refcount: 1,
            ..Default::default()
        });
        device
            .buffers
            .get_mut(result_id)
            .unwrap()
            .builder_callback
            .arm(Box::new(callback));

        let (builder_id, builder_serial) = (self.id, self.serial);
        device.send(forward::BUFFER_BUILDER_GET_RESULT, 16, |ser| {
            ser.put_u32(builder_id);
            ser.put_u32(builder_serial);
            ser.put_u32(result_id);
            ser.put_u32(result_serial);
        });
        Buffer {
            id: result_id,
            serial: result_serial,
        }
    }

    /// Local-only: bumps the external refcount, no wire traffic (spec 4.8).
    pub fn reference(&self, device: &mut Device) {
        if let Some(state) = device.builders.get_mut(self.id) {
            state.refcount += 1;
        }
    }

    /// Local-only unless this drops the refcount to 0, in which case a
    /// `BufferBuilderDestroy` command is sent and the local slot is freed.
    pub fn release(self, device: &mut Device) {
        let Some(state) = device.builders.get_mut(self.id) else {
            return;
        };
        state.refcount -= 1;
        if state.refcount > 0 {
            return;
        }
        device.send(forward::BUFFER_BUILDER_DESTROY, 4, |ser| ser.put_u32(self.id));
        device.builders.free(self.id);
    }
}

/// A handle to a server-side buffer. `Buffer` itself is just an id/serial
/// pair; all state lives in the `Device` that created it.
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    id: u32,
    serial: u32,
}

impl Buffer {
    pub fn map_read_async(
        &self,
        device: &mut Device,
        offset: u64,
        size: u64,
        callback: impl FnOnce(MapStatus, &[u8]) + 'static,
    ) {
        let Some(data) = device.buffers.get_mut(self.id) else {
            return;
        };
        let request_serial = data.map_requests.insert(MapRequest::Read(Box::new(callback)));
        let (id, serial) = (self.id, self.serial);
        device.send(forward::BUFFER_MAP_READ_ASYNC, 4 + 4 + 4 + 8 + 8, |ser| {
            ser.put_u32(id);
            ser.put_u32(serial);
            ser.put_u32(request_serial);
            ser.put_u64(offset);
            ser.put_u64(size);
        });
    }

    pub fn map_write_async(
        &self,
        device: &mut Device,
        offset: u64,
        size: u64,
        callback: impl FnOnce(MapStatus) + 'static,
    ) {
        let Some(data) = device.buffers.get_mut(self.id) else {
            return;
        };
        let request_serial = data.map_requests.insert(MapRequest::Write {
            offset,
            size,
            callback: Box::new(callback),
        });
        let (id, serial) = (self.id, self.serial);
        device.send(forward::BUFFER_MAP_WRITE_ASYNC, 4 + 4 + 4 + 8 + 8, |ser| {
            ser.put_u32(id);
            ser.put_u32(serial);
            ser.put_u32(request_serial);
            ser.put_u64(offset);
            ser.put_u64(size);
        });
    }

    pub fn get_mapped_range_mut<'d>(&self, device: &'d mut Device) -> Option<&'d mut [u8]> {
        match device.buffers.get_mut(self.id)?.mapped.as_mut()? {
            MappedBuffer::Write(handle, _) => Some(handle.data_mut()),
            MappedBuffer::Read(_) => None,
        }
    }

    pub fn get_mapped_range<'d>(&self, device: &'d Device) -> Option<&'d [u8]> {
        match device.buffers.get(self.id)?.mapped.as_ref()? {
            MappedBuffer::Write(handle, _) => Some(handle.data()),
            MappedBuffer::Read(handle) => Some(handle.data()),
        }
    }

    /// If this buffer is write-mapped, flushes the staged bytes back to the
    /// server via `BufferUpdateMappedData` before sending `Unmap`. Cancels
    /// every request still in flight (an unmap in the middle of an async
    /// map is a valid, explicit cancellation per the protocol).
    pub fn unmap(&self, device: &mut Device) {
        let Some(data) = device.buffers.get_mut(self.id) else {
            return;
        };

        if let Some(MappedBuffer::Write(handle, offset)) = data.mapped.take() {
            let payload = handle.serialize_data_update().to_vec();
            let (id, serial) = (self.id, self.serial);
            device.send(
                forward::BUFFER_UPDATE_MAPPED_DATA,
                4 + 4 + 8 + prefixed_len(payload.len()),
                |ser| {
                    ser.put_u32(id);
                    ser.put_u32(serial);
                    ser.put_u64(offset);
                    ser.put_bytes(&payload);
                },
            );
        }

        if let Some(data) = device.buffers.get_mut(self.id) {
            data.mapped = None;
            data.map_requests.clear(|req| match req {
                MapRequest::Read(cb) => cb(MapStatus::Unknown, &[]),
                MapRequest::Write { callback, .. } => callback(MapStatus::Unknown),
            });
        }

        let (id, serial) = (self.id, self.serial);
        device.send(forward::BUFFER_UNMAP, 8, |ser| {
            ser.put_u32(id);
            ser.put_u32(serial);
        });
    }

    /// Local-only: bumps the external refcount, no wire traffic (spec 4.8).
    pub fn reference(&self, device: &mut Device) {
        if let Some(state) = device.buffers.get_mut(self.id) {
            state.refcount += 1;
        }
    }

    /// Local-only unless this drops the refcount to 0. At that point (spec
    /// 4.6/4.8): if the builder callback is still armed (the server hasn't
    /// answered `GetResult` yet), fire it with `Unknown` so the application
    /// can release whatever it was waiting to hear about; then send
    /// `BufferDestroy` and free the local slot.
    pub fn release(self, device: &mut Device) {
        let Some(state) = device.buffers.get_mut(self.id) else {
            return;
        };
        state.refcount -= 1;
        if state.refcount > 0 {
            return;
        }
        if let Some(state) = device.buffers.get_mut(self.id) {
            state
                .builder_callback
                .call(BuilderStatus::Unknown, "buffer released before server responded");
        }
        device.send(forward::BUFFER_DESTROY, 4, |ser| ser.put_u32(self.id));
        device.buffers.free(self.id);
    }
}
