// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Server-side mirror of the client's object ids.
//!
//! Ground truth: `WireServer.cpp`'s `KnownObjectsBase<T>`. The server never
//! allocates ids on its own; it only ever accepts or rejects the id the
//! client asked for, which is why `allocate` takes an explicit id rather
//! than returning a fresh one.

/// Per-object bookkeeping the server keeps for every known id. `H` is the
/// driver's own handle type; `E` is whatever extra per-type state an object
/// needs (e.g. a buffer's mapped-data pointer/length) and defaults to `()`
/// for types that need none.
pub struct ObjectData<H, E = ()> {
    pub handle: Option<H>,
    pub serial: u32,
    /// False once a builder has taken an error, or once a create call's
    /// arguments turned out to be poisoned.
    pub valid: bool,
    allocated: bool,
    /// If this object is a builder, the id/serial of the object it builds
    /// (so a late/duplicate error callback from the driver can be matched
    /// against the right generation).
    pub built_object_id: u32,
    pub built_object_serial: u32,
    pub extra: E,
}

impl<H, E: Default> ObjectData<H, E> {
    fn fresh(serial: u32) -> Self {
        Self {
            handle: None,
            serial,
            valid: false,
            allocated: true,
            built_object_id: 0,
            built_object_serial: 0,
            extra: E::default(),
        }
    }
}

/// Mirrors the ids a client has allocated. Entries are dense: `allocate`
/// extends the backing vector when the client hands out an id one past the
/// end, matching the client's own dense allocation order.
pub struct KnownObjects<H, E = ()> {
    known: Vec<ObjectData<H, E>>,
}

impl<H, E: Default> Default for KnownObjects<H, E> {
    fn default() -> Self {
        // Id 0 is the immortal null slot (invariant I6): allocated, valid,
        // null handle, serial 0, and never freed.
        let mut null_entry = ObjectData::fresh(0);
        null_entry.valid = true;
        Self {
            known: vec![null_entry],
        }
    }
}

impl<H, E: Default> KnownObjects<H, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&ObjectData<H, E>> {
        self.known
            .get(id as usize)
            .filter(|d| d.allocated)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut ObjectData<H, E>> {
        self.known
            .get_mut(id as usize)
            .filter(|d| d.allocated)
    }

    /// Registers `id` with `serial` as known. Exactly mirrors the upstream
    /// rules: an id strictly past the end of the known table is rejected
    /// (the client is only ever allowed to allocate ids one at a time, in
    /// order); an id one past the end extends the table; an id that already
    /// names an allocated slot is rejected (double allocation); any other
    /// in-range id is reset in place (a recycled id, reusing the slot).
    pub fn allocate(&mut self, id: u32, serial: u32) -> Option<&mut ObjectData<H, E>> {
        let idx = id as usize;
        if idx > self.known.len() {
            return None;
        }
        if idx == self.known.len() {
            self.known.push(ObjectData::fresh(serial));
        } else {
            if self.known[idx].allocated {
                return None;
            }
            self.known[idx] = ObjectData::fresh(serial);
        }
        Some(&mut self.known[idx])
    }

    /// Marks `id` free. Does not touch `serial`: a subsequent `allocate` of
    /// the same id must pass a fresh serial explicitly, exactly as the
    /// client's `ObjectAllocator` bumps its own serial on reuse. A no-op for
    /// id 0: the null slot is immortal.
    pub fn free(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        if let Some(d) = self.known.get_mut(id as usize) {
            d.allocated = false;
            d.handle = None;
        }
    }
}
