// src/chan/mod.rs

//! The sharded, bounded MPMC channel.
//!
//! A [`Chan`] stripes its traffic across `1 << concurrent_shift` independent
//! bounded queues ("shards"), each with its own mutex, so producers and
//! consumers that land on different shards never contend. Two atomic
//! round-robin cursors pick the shard for each `send` and `recv`.
//!
//! Values are delivered FIFO *per shard*. With more than one shard there is
//! no global ordering: a value sent later can be received earlier when the
//! two land on different shards. Callers that need strict FIFO should stay
//! with one shard (`concurrent_shift == 0`).

mod shard;

use crate::error::{RecvError, SendError};
use crate::internal::CachePadded;
use self::shard::Shard;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Behavior of [`Chan::send`] when the selected shard's buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPolicy {
  /// Park the sender until space frees up or the channel closes.
  ///
  /// With capacity 0 this is the rendezvous mode: every `send` parks until
  /// a receiver has taken its value.
  Block,
  /// Destroy the oldest buffered value to make room. Never parks.
  DiscardOldest,
  /// Discard the incoming value and report [`SendError::Full`]. Never parks.
  DiscardNewest,
}

struct ChanShared<T> {
  shards: Box<[CachePadded<Shard<T>>]>,
  /// `shards.len() - 1`; the shard count is a power of two, so masking the
  /// cursor keeps the round-robin continuous across counter wraparound.
  shard_mask: usize,
  send_cursor: CachePadded<AtomicUsize>,
  recv_cursor: CachePadded<AtomicUsize>,
  capacity: usize,
  policy: SendPolicy,
}

/// A handle to a sharded bounded channel.
///
/// Handles are cheap to clone; every clone names the same shards. The
/// channel lives until the last handle is dropped, at which point any
/// still-buffered values are destroyed.
pub struct Chan<T> {
  shared: Arc<ChanShared<T>>,
}

impl<T: Send> Chan<T> {
  /// A single-shard channel: `capacity` slots, full-buffer behavior per
  /// `policy`. Capacity 0 with [`SendPolicy::Block`] is a rendezvous
  /// channel; with the discard policies it is normalized to one slot.
  pub fn new(capacity: usize, policy: SendPolicy) -> Self {
    Self::sharded(0, capacity, policy)
  }

  /// A zero-capacity blocking channel: every `send` parks until a receiver
  /// takes its value.
  pub fn rendezvous() -> Self {
    Self::new(0, SendPolicy::Block)
  }

  /// A channel with `1 << concurrent_shift` shards, each configured with
  /// `capacity` and `policy`.
  ///
  /// Sharding trades global FIFO ordering for lower lock contention; see
  /// the module docs.
  pub fn sharded(concurrent_shift: u32, capacity: usize, policy: SendPolicy) -> Self {
    assert!(
      concurrent_shift < usize::BITS,
      "concurrent_shift {} would overflow the shard index",
      concurrent_shift
    );
    let shard_count = 1usize << concurrent_shift;
    let mut shards = Vec::with_capacity(shard_count);
    for _ in 0..shard_count {
      shards.push(CachePadded::new(Shard::new(capacity, policy)));
    }
    Chan {
      shared: Arc::new(ChanShared {
        shards: shards.into_boxed_slice(),
        shard_mask: shard_count - 1,
        send_cursor: CachePadded::new(AtomicUsize::new(0)),
        recv_cursor: CachePadded::new(AtomicUsize::new(0)),
        capacity,
        policy,
      }),
    }
  }

  /// Delivers `value` into the next shard in round-robin order.
  ///
  /// With [`SendPolicy::Block`] this parks while the shard is full (and, on
  /// a rendezvous channel, until a receiver takes the value). The discard
  /// policies never park. `Err` means the value was not delivered and has
  /// been dropped: [`SendError::Closed`] after [`close`](Chan::close),
  /// [`SendError::Full`] for a rejected value under
  /// [`SendPolicy::DiscardNewest`].
  pub fn send(&self, value: T) -> Result<(), SendError> {
    let ix = self.shared.send_cursor.fetch_add(1, Ordering::AcqRel);
    self.shared.shards[ix & self.shared.shard_mask].send(value)
  }

  /// Takes a value from the next shard in round-robin order, parking until
  /// one arrives or the channel closes.
  ///
  /// After [`close`](Chan::close), each shard first drains its buffered
  /// values and then reports [`RecvError::Closed`]. With multiple shards
  /// the error speaks only for the shard this call landed on; other shards
  /// may still hold values, so draining consumers should keep calling until
  /// they have accounted for everything they expect.
  pub fn recv(&self) -> Result<T, RecvError> {
    let ix = self.shared.recv_cursor.fetch_add(1, Ordering::AcqRel);
    self.shared.shards[ix & self.shared.shard_mask].recv()
  }

  /// Closes every shard and wakes all parked threads. Idempotent, and
  /// effective for every handle of this channel.
  ///
  /// Parked senders report [`SendError::Closed`]; receivers drain the
  /// remaining buffered values and then report [`RecvError::Closed`]. An
  /// in-flight rendezvous value is destroyed.
  pub fn close(&self) {
    for shard in self.shared.shards.iter() {
      shard.close();
    }
  }

  /// Whether [`close`](Chan::close) has been observed on shard 0.
  ///
  /// `close` visits shards in unspecified order, so during a concurrent
  /// close this snapshot can lag the shards other operations land on; the
  /// `send`/`recv` results are the authoritative signal.
  pub fn is_closed(&self) -> bool {
    self.shared.shards[0].is_closed()
  }

  /// The number of independent shards.
  pub fn shard_count(&self) -> usize {
    self.shared.shards.len()
  }

  /// The requested per-shard capacity (0 for a rendezvous channel).
  pub fn capacity(&self) -> usize {
    self.shared.capacity
  }

  /// The policy applied when a shard's buffer is full.
  pub fn policy(&self) -> SendPolicy {
    self.shared.policy
  }
}

impl<T: Send> Default for Chan<T> {
  /// Equivalent to [`Chan::rendezvous`].
  fn default() -> Self {
    Self::rendezvous()
  }
}

impl<T> Clone for Chan<T> {
  fn clone(&self) -> Self {
    Chan {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> fmt::Debug for Chan<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Chan")
      .field("shards", &self.shared.shards.len())
      .field("capacity", &self.shared.capacity)
      .field("policy", &self.shared.policy)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_robin_covers_every_shard() {
    let chan = Chan::sharded(2, 1, SendPolicy::Block);
    assert_eq!(chan.shard_count(), 4);

    // One value per shard fits without blocking even though each shard
    // holds a single slot.
    for i in 0..4 {
      chan.send(i).unwrap();
    }
    let mut seen: Vec<i32> = (0..4).map(|_| chan.recv().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
  }

  #[test]
  fn single_threaded_send_then_recv_hits_the_same_shard() {
    // Both cursors start at 0 and advance in lockstep, so an alternating
    // send/recv sequence on one thread sees its own values in order even
    // with many shards.
    let chan = Chan::sharded(3, 4, SendPolicy::Block);
    for i in 0..64 {
      chan.send(i).unwrap();
      assert_eq!(chan.recv().unwrap(), i);
    }
  }

  #[test]
  fn clone_shares_the_same_shards() {
    let chan = Chan::new(4, SendPolicy::Block);
    let other = chan.clone();
    chan.send(7).unwrap();
    assert_eq!(other.recv().unwrap(), 7);

    other.close();
    assert!(chan.is_closed());
    assert_eq!(chan.send(8), Err(SendError::Closed));
  }

  #[test]
  fn accessors_report_construction_parameters() {
    let chan = Chan::<u8>::sharded(1, 3, SendPolicy::DiscardOldest);
    assert_eq!(chan.shard_count(), 2);
    assert_eq!(chan.capacity(), 3);
    assert_eq!(chan.policy(), SendPolicy::DiscardOldest);
    assert!(!chan.is_closed());

    let debugged = format!("{:?}", chan);
    assert!(debugged.contains("Chan"));
    assert!(debugged.contains("DiscardOldest"));
  }

  #[test]
  fn default_is_rendezvous() {
    let chan = Chan::<String>::default();
    assert_eq!(chan.capacity(), 0);
    assert_eq!(chan.policy(), SendPolicy::Block);
    assert_eq!(chan.shard_count(), 1);
  }
}
