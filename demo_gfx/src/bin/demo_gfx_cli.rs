// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::cell::RefCell;
use std::rc::Rc;

use clap::Parser;
use log::info;

use demo_gfx::backend::InMemoryBackend;
use demo_gfx::client::Device;
use demo_gfx::server::ServerState;
use wire_core::server::WireServer;

/// Runs a short in-process demonstration of the buffer create/map/unmap
/// protocol over the demonstration object schema.
#[derive(Parser)]
struct Args {
    /// Size, in bytes, of the demonstration buffer.
    #[arg(long, default_value_t = 64)]
    buffer_size: u64,

    /// Maximum single-allocation size of the simulated transport, in bytes.
    /// Set this lower than `buffer_size` to force chunked framing.
    #[arg(long, default_value_t = 4096)]
    max_allocation: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut device = Device::new(args.max_allocation);
    let mut server = WireServer::new(
        demo_gfx::server::handler_table::<InMemoryBackend>(),
        ServerState::new(InMemoryBackend::new()),
    );

    let builder = device.create_buffer_builder();
    builder.set_size(&mut device, args.buffer_size);

    let created = Rc::new(RefCell::new(false));
    let created_clone = created.clone();
    let buffer = builder.get_result(&mut device, move |status, message| {
        info!("buffer builder callback: {status:?} ({message})");
        *created_clone.borrow_mut() = true;
    });

    pump(&mut device, &mut server);
    info!("buffer created: {}", *created.borrow());

    buffer.map_write_async(&mut device, 0, args.buffer_size, |status| {
        info!("map_write_async completed: {status:?}");
    });
    pump(&mut device, &mut server);

    if let Some(range) = buffer.get_mapped_range_mut(&mut device) {
        range.fill(0xAB);
    }
    buffer.unmap(&mut device);
    pump(&mut device, &mut server);

    buffer.map_read_async(&mut device, 0, args.buffer_size, |status, data| {
        info!("map_read_async completed: {status:?}, first byte = {:?}", data.first());
    });
    pump(&mut device, &mut server);

    buffer.release(&mut device);
    pump(&mut device, &mut server);
}

fn pump(device: &mut Device, server: &mut WireServer<ServerState<InMemoryBackend>>) {
    let forward = device.drain_outgoing();
    if !forward.is_empty() {
        server.handle_commands(&forward).expect("demo command stream is well-formed");
    }
    let reverse = std::mem::take(&mut server.state.outgoing);
    if !reverse.is_empty() {
        device.handle_commands(&reverse).expect("demo reverse command stream is well-formed");
    }
}
