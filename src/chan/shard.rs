// src/chan/shard.rs

//! A single bounded ring-buffer queue: one shard of a [`Chan`](crate::Chan).
//!
//! All state lives behind one `parking_lot::Mutex`. Senders and receivers
//! park on separate [`WaitGate`]s so a state change wakes only the side it
//! can make progress for. Rendezvous shards (requested capacity 0 with the
//! blocking policy) additionally carry a `handoff` condvar: the sender of
//! the in-flight value parks on it until a receiver has taken that value
//! out, which is what gives the zero-capacity channel its synchronous
//! hand-over semantics.

use crate::chan::SendPolicy;
use crate::coord::WaitGate;
use crate::error::{RecvError, SendError};
use crate::telemetry;

use core::mem::MaybeUninit;

use parking_lot::{Condvar, Mutex};

const LOC_SEND: &str = "Shard::send";
const LOC_CLOSE: &str = "Shard::close";

const EVT_CLOSE: &str = "Close";
const EVT_HANDOFF_CUT: &str = "HandoffValueDestroyed";

const CTR_DISCARD_OLDEST: &str = "DiscardedOldest";
const CTR_REJECT_FULL: &str = "RejectedFull";

/// Bound at which the ring's position counters are pulled back toward zero.
///
/// The counters advance by one per operation, so with 64-bit positions the
/// rewind fires only after an effectively unbounded run; it exists so that
/// the queue stays correct even then.
pub(crate) const POSITION_LIMIT: usize = usize::MAX;

/// The mutex-protected part of a shard.
///
/// `first` is the next position to read and `next` the next position to
/// write; both increase monotonically (except for [`Ring::rewind`]) and the
/// live values occupy positions `[first, next)`, each stored at
/// `slots[pos % capacity]`.
struct Ring<T> {
  slots: Box<[MaybeUninit<T>]>,
  first: usize,
  next: usize,
  closed: bool,
}

impl<T> Ring<T> {
  fn with_capacity(capacity: usize) -> Self {
    let mut slots = Vec::with_capacity(capacity);
    for _ in 0..capacity {
      slots.push(MaybeUninit::uninit());
    }
    Ring {
      slots: slots.into_boxed_slice(),
      first: 0,
      next: 0,
      closed: false,
    }
  }

  #[inline]
  fn capacity(&self) -> usize {
    self.slots.len()
  }

  #[inline]
  fn len(&self) -> usize {
    self.next - self.first
  }

  #[inline]
  fn is_empty(&self) -> bool {
    self.first == self.next
  }

  #[inline]
  fn free_slots(&self) -> usize {
    self.capacity() - self.len()
  }

  /// Writes `value` at the `next` position. The caller must have checked
  /// that the slot is free, otherwise the previous occupant leaks.
  fn write_next(&mut self, value: T) {
    let cap = self.capacity();
    self.slots[self.next % cap].write(value);
    self.next += 1;
    if self.next >= POSITION_LIMIT {
      self.rewind();
    }
  }

  /// Moves the oldest value out. The caller must have checked `!is_empty()`.
  fn take_first(&mut self) -> T {
    let cap = self.capacity();
    // Safety: positions in [first, next) are initialized, and advancing
    // `first` retires this slot before anyone can read it again.
    let value = unsafe { self.slots[self.first % cap].assume_init_read() };
    self.first += 1;
    value
  }

  /// Destroys the oldest value in place. The caller must have checked
  /// `!is_empty()`.
  fn drop_first(&mut self) {
    let cap = self.capacity();
    // Safety: same initialization argument as `take_first`.
    unsafe { self.slots[self.first % cap].assume_init_drop() };
    self.first += 1;
  }

  /// Destroys the newest value in place. The caller must have checked
  /// `!is_empty()`. Used by `close` to cut an in-flight rendezvous value.
  fn drop_newest(&mut self) {
    self.next -= 1;
    let cap = self.capacity();
    // Safety: `next` now names the last initialized position.
    unsafe { self.slots[self.next % cap].assume_init_drop() };
  }

  /// Pulls both position counters back by `first - first % capacity`.
  ///
  /// The subtracted amount is a multiple of the capacity, so the length and
  /// every live `pos % capacity` mapping are unchanged.
  fn rewind(&mut self) {
    let anchored = self.first % self.capacity();
    self.next -= self.first - anchored;
    self.first = anchored;
  }
}

impl<T> Drop for Ring<T> {
  fn drop(&mut self) {
    let cap = self.capacity();
    for pos in self.first..self.next {
      // Safety: the live range is initialized; each position is visited once.
      unsafe { self.slots[pos % cap].assume_init_drop() };
    }
  }
}

pub(crate) struct Shard<T> {
  ring: Mutex<Ring<T>>,
  send_gate: WaitGate,
  recv_gate: WaitGate,
  /// Present only on rendezvous shards.
  handoff: Option<Condvar>,
  policy: SendPolicy,
}

impl<T: Send> Shard<T> {
  pub(crate) fn new(capacity: usize, policy: SendPolicy) -> Self {
    let rendezvous = capacity == 0 && policy == SendPolicy::Block;
    let storage = if capacity == 0 { 1 } else { capacity };
    Shard {
      ring: Mutex::new(Ring::with_capacity(storage)),
      send_gate: WaitGate::new(),
      recv_gate: WaitGate::new(),
      handoff: rendezvous.then(Condvar::new),
      policy,
    }
  }

  /// Delivers `value` into this shard according to the shard's policy.
  ///
  /// Blocking policy parks until space frees up or the shard closes; on a
  /// rendezvous shard the call additionally parks until a receiver has
  /// taken this very value out (or the shard closed, destroying it).
  pub(crate) fn send(&self, value: T) -> Result<(), SendError> {
    let mut ring = self.ring.lock();

    if self.policy == SendPolicy::Block {
      self.send_gate.wait_until(&mut ring, |r| r.free_slots() > 0 || r.closed);
    }
    if ring.closed {
      return Err(SendError::Closed);
    }

    if ring.free_slots() > 0 {
      ring.write_next(value);
    } else if self.policy == SendPolicy::DiscardOldest {
      ring.drop_first();
      ring.write_next(value);
      telemetry::increment_counter(LOC_SEND, CTR_DISCARD_OLDEST);
    } else {
      // DiscardNewest with a full buffer rejects the value outright.
      // Nothing changed, so no receiver is notified.
      telemetry::increment_counter(LOC_SEND, CTR_REJECT_FULL);
      return Err(SendError::Full);
    }

    self.recv_gate.notify_one();

    if let Some(handoff) = &self.handoff {
      let sent_at = ring.first;
      while ring.first == sent_at && !ring.closed {
        handoff.wait(&mut ring);
      }
      if ring.closed {
        // `close` destroyed the in-flight value before any receiver saw it.
        return Err(SendError::Closed);
      }
    }
    Ok(())
  }

  /// Takes the oldest value out of this shard, parking until one arrives
  /// or the shard is closed and drained.
  pub(crate) fn recv(&self) -> Result<T, RecvError> {
    let mut ring = self.ring.lock();

    self.recv_gate.wait_until(&mut ring, |r| !r.is_empty() || r.closed);
    if ring.is_empty() {
      return Err(RecvError::Closed);
    }

    let value = ring.take_first();

    if let Some(handoff) = &self.handoff {
      // Wake the rendezvous sender whose value was just consumed.
      handoff.notify_one();
    }
    self.send_gate.notify_one();

    Ok(value)
  }

  /// Marks the shard closed and wakes every parked thread. Idempotent.
  ///
  /// On a rendezvous shard any in-flight value is destroyed here; its
  /// sender observes `closed` and reports [`SendError::Closed`].
  pub(crate) fn close(&self) {
    let mut ring = self.ring.lock();
    ring.closed = true;
    if let Some(handoff) = &self.handoff {
      if !ring.is_empty() {
        ring.drop_newest();
        telemetry::log_event(None, LOC_CLOSE, EVT_HANDOFF_CUT, None);
        handoff.notify_all();
      }
    }
    telemetry::log_event(None, LOC_CLOSE, EVT_CLOSE, None);
    self.send_gate.notify_all();
    self.recv_gate.notify_all();
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.ring.lock().closed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn fifo_within_capacity() {
    let shard = Shard::new(4, SendPolicy::Block);
    for i in 0..4 {
      shard.send(i).unwrap();
    }
    for i in 0..4 {
      assert_eq!(shard.recv().unwrap(), i);
    }
  }

  #[test]
  fn discard_oldest_replaces_head() {
    let shard = Shard::new(2, SendPolicy::DiscardOldest);
    for i in 1..=4 {
      shard.send(i).unwrap();
    }
    assert_eq!(shard.recv().unwrap(), 3);
    assert_eq!(shard.recv().unwrap(), 4);
  }

  #[test]
  fn discard_newest_rejects_on_full() {
    let shard = Shard::new(2, SendPolicy::DiscardNewest);
    shard.send(1).unwrap();
    shard.send(2).unwrap();
    assert_eq!(shard.send(3), Err(SendError::Full));
    assert_eq!(shard.recv().unwrap(), 1);
    assert_eq!(shard.recv().unwrap(), 2);
  }

  #[test]
  fn close_drains_then_reports_closed() {
    let shard = Shard::new(4, SendPolicy::Block);
    shard.send('a').unwrap();
    shard.send('b').unwrap();
    shard.close();
    assert_eq!(shard.send('c'), Err(SendError::Closed));
    assert_eq!(shard.recv().unwrap(), 'a');
    assert_eq!(shard.recv().unwrap(), 'b');
    assert_eq!(shard.recv(), Err(RecvError::Closed));
    // close is idempotent
    shard.close();
    assert_eq!(shard.recv(), Err(RecvError::Closed));
  }

  #[test]
  fn position_counters_rewind_near_the_limit() {
    let shard = Shard::new(16, SendPolicy::Block);

    // Seed the counters just short of the rewind bound, at a position that
    // is not a multiple of the capacity.
    {
      let mut ring = shard.ring.lock();
      let seed = POSITION_LIMIT - 8;
      ring.first = seed;
      ring.next = seed;
    }

    // Drive enough traffic through to cross the bound.
    for round in 0..4 {
      for i in 0..16 {
        shard.send(round * 16 + i).unwrap();
      }
      for i in 0..16 {
        assert_eq!(shard.recv().unwrap(), round * 16 + i);
      }
    }

    let ring = shard.ring.lock();
    assert!(ring.next < POSITION_LIMIT, "rewind must have fired");
    assert!(ring.first <= ring.next);
    assert_eq!(ring.len(), 0);
  }

  #[test]
  fn rewind_preserves_live_values() {
    let shard = Shard::new(8, SendPolicy::Block);

    {
      let mut ring = shard.ring.lock();
      let seed = POSITION_LIMIT - 3;
      ring.first = seed;
      ring.next = seed;
    }

    // Keep the ring half-full across the rewind so live slots are remapped.
    for i in 0..4 {
      shard.send(i).unwrap();
    }
    for i in 4..32 {
      shard.send(i).unwrap();
      assert_eq!(shard.recv().unwrap(), i - 4);
    }
    for i in 28..32 {
      assert_eq!(shard.recv().unwrap(), i);
    }
  }

  #[test]
  fn buffered_values_are_dropped_with_the_shard() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
      fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
      }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let shard = Shard::new(4, SendPolicy::Block);
    for _ in 0..3 {
      shard.send(Tracked(Arc::clone(&drops))).unwrap();
    }
    drop(shard.recv().unwrap());
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    drop(shard);
    assert_eq!(drops.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn close_destroys_in_flight_rendezvous_value() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
      fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
      }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let shard = Arc::new(Shard::new(0, SendPolicy::Block));

    let sender = {
      let shard = Arc::clone(&shard);
      let drops = Arc::clone(&drops);
      thread::spawn(move || shard.send(Tracked(drops)))
    };

    // Give the sender time to park in the handoff wait, then close.
    thread::sleep(Duration::from_millis(50));
    shard.close();

    assert_eq!(sender.join().unwrap(), Err(SendError::Closed));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(matches!(shard.recv(), Err(RecvError::Closed)));
  }
}
