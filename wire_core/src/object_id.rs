// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Client-side object id allocation.
//!
//! Ground truth: `WireClient.cpp`'s `ObjectAllocator<T>`. Ids are handed out
//! unilaterally by the client and never acknowledged by the server; the
//! generation (`serial`) only advances when a freed id is reused, matching
//! invariant I2/I3 in the identity model.

struct Slot<T> {
    serial: u32,
    data: Option<T>,
}

/// Allocates client-side object ids of a single type `T`. `id`s are dense:
/// freed ids are recycled before the backing vector grows. Id 0 is
/// pre-populated as the immortal null entry (invariant I6) and is never
/// handed out by `new_object` or accepted by `free`.
pub struct ObjectAllocator<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
}

impl<T: Default> Default for ObjectAllocator<T> {
    fn default() -> Self {
        Self {
            slots: vec![Slot {
                serial: 0,
                data: Some(T::default()),
            }],
            free_list: Vec::new(),
        }
    }
}

impl<T: Default> ObjectAllocator<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> ObjectAllocator<T> {
    /// Allocates a new id, bumping the serial only if this id is being
    /// reused from the free list (a fresh id starts at serial 0, matching
    /// upstream `ObjectAllocator<T>::New`).
    pub fn new_object(&mut self, data: T) -> (u32, u32) {
        if let Some(id) = self.free_list.pop() {
            let slot = &mut self.slots[id as usize];
            slot.serial += 1;
            slot.data = Some(data);
            (id, slot.serial)
        } else {
            let id = self.slots.len() as u32;
            self.slots.push(Slot {
                serial: 0,
                data: Some(data),
            });
            (id, 0)
        }
    }

    /// Releases `id`, making it eligible for reuse (with a bumped serial)
    /// on the next `new_object`. A no-op for id 0: the null entry is
    /// immortal and never recycled.
    pub fn free(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        if let Some(slot) = self.slots.get_mut(id as usize) {
            slot.data = None;
            self.free_list.push(id);
        }
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize)?.data.as_ref()
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(id as usize)?.data.as_mut()
    }

    pub fn get_serial(&self, id: u32) -> Option<u32> {
        self.slots.get(id as usize).map(|s| s.serial)
    }

    /// True if `id` names a slot this allocator has ever handed out (even if
    /// since freed). Distinguishes invariant I4's two drop cases on a
    /// reverse-channel reference: an id past the high-water mark is a fatal
    /// protocol error (the server referenced something that was never
    /// allocated), while an in-range id with a stale serial or a freed slot
    /// is silently dropped as a late callback.
    pub fn contains_index(&self, id: u32) -> bool {
        (id as usize) < self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_zero_is_reserved_for_the_null_object() {
        let a: ObjectAllocator<()> = ObjectAllocator::new();
        assert_eq!(a.get_serial(0), Some(0));
        assert!(a.get(0).is_some());
    }

    #[test]
    fn fresh_ids_start_one_past_the_null_entry() {
        let mut a: ObjectAllocator<()> = ObjectAllocator::new();
        let (id0, serial0) = a.new_object(());
        let (id1, serial1) = a.new_object(());
        assert_eq!((id0, serial0), (1, 0));
        assert_eq!((id1, serial1), (2, 0));
    }

    #[test]
    fn reused_ids_bump_serial() {
        let mut a: ObjectAllocator<()> = ObjectAllocator::new();
        let (id0, _) = a.new_object(());
        a.free(id0);
        let (reused_id, serial) = a.new_object(());
        assert_eq!(reused_id, id0);
        assert_eq!(serial, 1);
    }

    #[test]
    fn freed_object_is_not_gettable() {
        let mut a: ObjectAllocator<u32> = ObjectAllocator::new();
        let (id, _) = a.new_object(5);
        a.free(id);
        assert!(a.get(id).is_none());
    }

    #[test]
    fn freeing_the_null_id_is_a_no_op() {
        let mut a: ObjectAllocator<u32> = ObjectAllocator::new();
        a.free(0);
        assert!(a.get(0).is_some());
        let (id, serial) = a.new_object(1);
        assert_eq!((id, serial), (1, 0));
    }
}
