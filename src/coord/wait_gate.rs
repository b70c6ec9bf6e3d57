// src/coord/wait_gate.rs

//! A condition variable that keeps wake-up accounting, so that a state
//! change wakes exactly one thread that is actually parked instead of
//! stampeding every waiter ("thundering herd").
//!
//! The gate tracks two counters:
//!
//! - `parked`: threads currently blocked inside [`WaitGate::wait_until`].
//! - `pending`: signals issued whose target has not yet re-checked its
//!   predicate.
//!
//! `notify_one` only signals when someone is meaningfully waiting, and
//! clamps `pending` against `parked` to absorb drift from waiters that left
//! through a predicate check without consuming a signal.

use core::cell::Cell;

use parking_lot::{Condvar, MutexGuard};

pub(crate) struct WaitGate {
  cond: Condvar,
  parked: Cell<u32>,
  pending: Cell<u32>,
}

// The counters are plain `Cell`s. Every access to them happens while the
// caller holds the mutex whose guard is threaded through `wait_until`, which
// serializes all of the gate's methods.
unsafe impl Send for WaitGate {}
unsafe impl Sync for WaitGate {}

impl WaitGate {
  pub(crate) const fn new() -> Self {
    WaitGate {
      cond: Condvar::new(),
      parked: Cell::new(0),
      pending: Cell::new(0),
    }
  }

  /// Blocks the current thread until `ready` holds, releasing `guard` while
  /// parked. Returns immediately when `ready` already holds.
  ///
  /// The caller must pass the guard of the mutex protecting the state that
  /// `ready` inspects; that same mutex is what makes the counter updates
  /// race-free.
  pub(crate) fn wait_until<T: ?Sized, P>(&self, guard: &mut MutexGuard<'_, T>, mut ready: P)
  where
    P: FnMut(&T) -> bool,
  {
    if ready(&**guard) {
      return;
    }
    self.parked.set(self.parked.get() + 1);
    loop {
      self.pending.set(self.pending.get() + 1);
      self.cond.wait(guard);
      if ready(&**guard) {
        break;
      }
    }
    self.parked.set(self.parked.get() - 1);
  }

  /// Wakes one parked thread, if any signal would actually be consumed.
  ///
  /// Requires the owning mutex to be held.
  pub(crate) fn notify_one(&self) {
    let pending = self.pending.get();
    if pending > 0 {
      self.pending.set(pending.min(self.parked.get()).saturating_sub(1));
      self.cond.notify_one();
    }
  }

  /// Wakes every parked thread. Requires the owning mutex to be held.
  pub(crate) fn notify_all(&self) {
    self.pending.set(0);
    self.cond.notify_all();
  }
}

impl core::fmt::Debug for WaitGate {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("WaitGate")
      .field("parked", &self.parked.get())
      .field("pending", &self.pending.get())
      .finish_non_exhaustive()
  }
}
