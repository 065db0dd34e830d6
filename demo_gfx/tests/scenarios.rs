// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Integration tests exercising the demonstration schema end to end: every
//! command a test sends is actually serialized, handed to the server's
//! `WireServer::handle_commands`, and any reverse-channel bytes the server
//! produces are fed back through the client's `handle_commands`.

use std::cell::RefCell;
use std::rc::Rc;

use demo_gfx::backend::InMemoryBackend;
use demo_gfx::client::{Device, MapStatus};
use demo_gfx::commands::{reverse, WireStatus};
use demo_gfx::server::{handler_table, ServerState};
use wire_core::builder::BuilderStatus;
use wire_core::server::WireServer;
use wire_core::wire_format::{Header, Serializer};

struct Harness {
    device: Device,
    server: WireServer<ServerState<InMemoryBackend>>,
}

impl Harness {
    fn new(max_allocation: usize) -> Self {
        Self {
            device: Device::new(max_allocation),
            server: WireServer::new(handler_table::<InMemoryBackend>(), ServerState::new(InMemoryBackend::new())),
        }
    }

    /// Flushes everything the client has queued to the server, then
    /// whatever the server queued back to the client. Most scenarios only
    /// need a single round trip per step.
    fn pump(&mut self) {
        let forward = self.device.drain_outgoing();
        if !forward.is_empty() {
            self.server.handle_commands(&forward).unwrap();
        }
        let reverse = std::mem::take(&mut self.server.state.outgoing);
        if !reverse.is_empty() {
            self.device.handle_commands(&reverse).unwrap();
        }
    }
}

/// S1: a buffer goes through create -> release, and a second buffer created
/// afterward reuses the freed id with a bumped generation, exactly as the
/// object-identity invariants require.
#[test]
fn s1_create_destroy_lifecycle_and_id_reuse() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 16);
    let status = Rc::new(RefCell::new(None));
    let status_clone = status.clone();
    let buffer = builder.get_result(&mut h.device, move |s, _| *status_clone.borrow_mut() = Some(s));
    h.pump();
    assert_eq!(*status.borrow(), Some(BuilderStatus::Success));

    buffer.release(&mut h.device);
    h.pump();

    let builder2 = h.device.create_buffer_builder();
    builder2.set_size(&mut h.device, 16);
    let status2 = Rc::new(RefCell::new(None));
    let status2_clone = status2.clone();
    let _buffer2 = builder2.get_result(&mut h.device, move |s, _| *status2_clone.borrow_mut() = Some(s));
    h.pump();
    assert_eq!(*status2.borrow(), Some(BuilderStatus::Success));
}

/// S2: a builder whose arguments are invalid (size 0) is poisoned silently;
/// its single callback fires exactly once, with an error status, when
/// `GetResult` is eventually called. This is the "maybe monad".
#[test]
fn s2_poisoned_builder_fires_error_exactly_once() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 0); // poisons the builder
    h.pump();

    let calls = Rc::new(RefCell::new(Vec::new()));
    let calls_clone = calls.clone();
    let _buffer = builder.get_result(&mut h.device, move |status, message| {
        calls_clone.borrow_mut().push((status, message.to_string()));
    });
    h.pump();

    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(calls.borrow()[0].0, BuilderStatus::Error);
}

/// S3: mapping a buffer for reading returns the bytes the server's backend
/// actually holds.
#[test]
fn s3_map_read_async_returns_buffer_contents() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 8);
    let buffer = builder.get_result(&mut h.device, |_, _| {});
    h.pump();

    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();
    buffer.map_read_async(&mut h.device, 0, 8, move |status, data| {
        *result_clone.borrow_mut() = Some((status, data.to_vec()));
    });
    h.pump();

    let (status, data) = result.borrow().clone().unwrap();
    assert_eq!(status, MapStatus::Success);
    assert_eq!(data, vec![0u8; 8]);
}

/// S4: writing into a write-mapped buffer and unmapping it sends the staged
/// bytes back to the server via `BufferUpdateMappedData`, and a subsequent
/// read observes them.
#[test]
fn s4_map_write_then_unmap_writes_back_data() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 4);
    let buffer = builder.get_result(&mut h.device, |_, _| {});
    h.pump();

    let write_done = Rc::new(RefCell::new(false));
    let write_done_clone = write_done.clone();
    buffer.map_write_async(&mut h.device, 0, 4, move |status| {
        assert_eq!(status, MapStatus::Success);
        *write_done_clone.borrow_mut() = true;
    });
    h.pump();
    assert!(*write_done.borrow());

    buffer
        .get_mapped_range_mut(&mut h.device)
        .unwrap()
        .copy_from_slice(&[11, 22, 33, 44]);
    buffer.unmap(&mut h.device);
    h.pump();

    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();
    buffer.map_read_async(&mut h.device, 0, 4, move |status, data| {
        *result_clone.borrow_mut() = Some((status, data.to_vec()));
    });
    h.pump();

    let (status, data) = result.borrow().clone().unwrap();
    assert_eq!(status, MapStatus::Success);
    assert_eq!(data, vec![11, 22, 33, 44]);
}

/// S5: calling `unmap` while a second map request is still in flight
/// cancels it with `MapStatus::Unknown` rather than leaving it to fire
/// later against a region that's no longer mapped.
#[test]
fn s5_unmap_cancels_in_flight_map_request() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 4);
    let buffer = builder.get_result(&mut h.device, |_, _| {});
    h.pump();

    buffer.map_write_async(&mut h.device, 0, 4, |_| {});
    h.pump();

    // A second request queued locally before the first unmap's effects are
    // pumped through: `unmap` must cancel it synchronously, client-side,
    // without waiting on the server.
    let cancelled = Rc::new(RefCell::new(None));
    let cancelled_clone = cancelled.clone();
    buffer.map_read_async(&mut h.device, 0, 4, move |status, _| {
        *cancelled_clone.borrow_mut() = Some(status);
    });
    buffer.unmap(&mut h.device);

    assert_eq!(*cancelled.borrow(), Some(MapStatus::Unknown));
}

/// S6: a command whose payload is too large for the transport's single
/// allocation is transparently split into chunk frames and reassembled by
/// the server before dispatch.
#[test]
fn s6_oversized_command_is_chunked_and_reassembled() {
    let mut h = Harness::new(64);

    let blob = vec![0x5Au8; 10_000];
    h.device.write_blob(&blob);
    h.pump();

    assert_eq!(h.server.state.last_blob_len, blob.len());
}

/// Refcounting is purely local: `reference`/`release` never touch the wire
/// until the count actually reaches 0, at which point exactly one destroy
/// command goes out.
#[test]
fn reference_and_release_are_local_until_the_last_release() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 16);
    let buffer = builder.get_result(&mut h.device, |_, _| {});
    h.pump();

    buffer.reference(&mut h.device);
    assert!(h.device.drain_outgoing().is_empty());

    buffer.release(&mut h.device);
    assert!(
        h.device.drain_outgoing().is_empty(),
        "refcount is still 1, releasing once more should not destroy yet"
    );

    buffer.release(&mut h.device);
    let outgoing = h.device.drain_outgoing();
    assert!(!outgoing.is_empty(), "the final release must send BufferDestroy");
}

/// If the application releases its last reference to a buffer before the
/// server has answered `GetResult`, the builder callback must still fire
/// exactly once, with `Unknown`, rather than being silently dropped.
#[test]
fn releasing_before_get_result_answers_fires_callback_unknown() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 16);

    let calls = Rc::new(RefCell::new(Vec::new()));
    let calls_clone = calls.clone();
    let buffer = builder.get_result(&mut h.device, move |status, _| {
        calls_clone.borrow_mut().push(status);
    });
    // Release before pumping: the server has not yet had a chance to send
    // back its GetResult callback.
    buffer.release(&mut h.device);

    assert_eq!(calls.borrow().as_slice(), &[BuilderStatus::Unknown]);

    // The server's (now-stale) reply, once pumped, must not fire the
    // callback a second time.
    h.pump();
    assert_eq!(calls.borrow().len(), 1);
}

/// Builds a raw reverse-channel command buffer, for tests that need to feed
/// the client a hand-crafted (and in one case deliberately malformed) reply
/// a conforming server would never actually send.
fn raw_command(command_id: u32, body_len: usize, fill: impl FnOnce(&mut Serializer)) -> Vec<u8> {
    let size = (Header::SIZE + body_len) as u32;
    let mut buf = vec![0u8; size as usize];
    Header {
        command_id,
        command_size: size,
    }
    .serialize(&mut buf[0..Header::SIZE]);
    let mut ser = Serializer::new(&mut buf[Header::SIZE..]);
    fill(&mut ser);
    buf
}

/// A map-read callback answering a request that was recorded as a
/// write-map (or vice versa) is not a stale/late message to drop silently:
/// it means the server's reply disagrees with what the client actually
/// asked for, which is a fatal protocol error (mirroring how an
/// out-of-range object id is fatal while a stale serial is not).
#[test]
fn map_callback_answering_the_wrong_kind_of_request_is_fatal() {
    let mut h = Harness::new(4096);

    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 16);
    let buffer = builder.get_result(&mut h.device, |_, _| {});
    h.pump();

    // Record a write-map request; id 1 and request_serial 0 follow
    // deterministically from a freshly created harness (id 0 is the
    // immortal null object, and this is the first map request issued).
    buffer.map_write_async(&mut h.device, 0, 16, |_| {});
    h.device.drain_outgoing();

    let reply = raw_command(reverse::BUFFER_MAP_READ_CALLBACK, 4 + 4 + 4 + 4 + 4, |ser| {
        ser.put_u32(1); // buffer id
        ser.put_u32(0); // buffer serial
        ser.put_u32(0); // request_serial
        ser.put_u32(WireStatus::Success.to_wire());
        ser.put_bytes(&[]);
    });

    assert!(h.device.handle_commands(&reply).is_err());
}

/// A builder error that no per-object callback was ever armed to consume is
/// forwarded to the device-level error callback instead of being silently
/// swallowed.
#[test]
fn unconsumed_builder_error_falls_back_to_the_device_callback() {
    let mut h = Harness::new(4096);

    let messages = Rc::new(RefCell::new(Vec::new()));
    let messages_clone = messages.clone();
    h.device.set_error_callback(move |msg| messages_clone.borrow_mut().push(msg.to_string()));

    // `get_result`'s callback is one-shot: the normal `GetResult` reply the
    // harness already pumped has fired and disarmed it. A second error
    // reply for the same (still-allocated) id is something a conforming
    // server never sends, but the client must still route it somewhere
    // rather than drop it on the floor: the device-level fallback.
    let builder = h.device.create_buffer_builder();
    builder.set_size(&mut h.device, 16);
    let _buffer = builder.get_result(&mut h.device, |_, _| {});
    h.pump();

    let (id, serial) = (1, 0);
    let msg = b"late error after the callback already fired";
    let reply = raw_command(
        reverse::BUFFER_ERROR_CALLBACK,
        4 + 4 + 4 + wire_core::wire_format::prefixed_len(msg.len()),
        |ser| {
            ser.put_u32(id);
            ser.put_u32(serial);
            ser.put_u32(WireStatus::Error.to_wire());
            ser.put_bytes(msg);
        },
    );
    h.device.handle_commands(&reply).unwrap();

    assert_eq!(
        *messages.borrow(),
        vec!["late error after the callback already fired".to_string()]
    );
}
