// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! One-shot builder error/result callback.
//!
//! Ground truth: `WireClient.cpp`'s `BuilderCallbackData`. Upstream has a
//! bug: the branch of `Call` meant to disable all future invocations sets
//! `canCall = true` instead of `false`, so a builder callback can fire more
//! than once if the server (incorrectly, or maliciously) sends more than
//! one error callback for the same built object. This port enforces the
//! one-shot contract the name implies.
//!
//! Upstream encodes the callback as a raw function pointer plus two opaque
//! `u64` userdata words, since C++ has nowhere else to stash context for a
//! plain function pointer. A Rust closure captures what it needs directly,
//! so `F` here is just `FnOnce(BuilderStatus, &str)` with no userdata slots
//! to thread through by hand.

/// The outcome delivered to a builder's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderStatus {
    Success,
    Error,
    /// The builder (or the device owning it) was destroyed before the
    /// server could respond.
    Unknown,
}

/// A builder's single callback slot. `Armed` until it fires once, then
/// `Fired` forever; `Disarmed` if the object was released with no callback
/// ever registered (creation methods that don't use the builder pattern
/// leave this in this state permanently).
pub enum BuilderCallback<F> {
    Armed(F),
    Fired,
    Disarmed,
}

impl<F> Default for BuilderCallback<F> {
    fn default() -> Self {
        Self::Disarmed
    }
}

impl<F> BuilderCallback<F>
where
    F: FnOnce(BuilderStatus, &str),
{
    pub fn arm(&mut self, callback: F) {
        *self = Self::Armed(callback);
    }

    /// Fires the callback if armed, then permanently disarms. Calling this
    /// again after it has already fired (or was never armed) is a no-op:
    /// this is the one-shot guarantee the upstream bug broke.
    pub fn call(&mut self, status: BuilderStatus, message: &str) {
        let prev = std::mem::replace(self, Self::Fired);
        if let Self::Armed(callback) = prev {
            callback(status, message);
        }
        // If `prev` was `Fired` or `Disarmed`, this call is dropped and the
        // state stays `Fired`: the callback never runs twice, matching the
        // one-shot contract the buggy upstream branch failed to uphold.
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn fires_exactly_once_even_if_called_twice() {
        let calls = RefCell::new(Vec::new());
        let mut cb: BuilderCallback<Box<dyn FnOnce(BuilderStatus, &str)>> = BuilderCallback::Disarmed;
        cb.arm(Box::new(|status, msg| {
            calls.borrow_mut().push((status, msg.to_string()))
        }));
        cb.call(BuilderStatus::Success, "ok");
        cb.call(BuilderStatus::Error, "should not fire");
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].0, BuilderStatus::Success);
    }

    #[test]
    fn disarmed_callback_never_fires() {
        let mut cb: BuilderCallback<Box<dyn FnOnce(BuilderStatus, &str)>> = BuilderCallback::Disarmed;
        // no panic, no-op:
        cb.call(BuilderStatus::Unknown, "nothing armed");
        assert!(!cb.is_armed());
    }
}
