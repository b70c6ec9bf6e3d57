// src/error.rs

//! Error types reported by channel operations.
//!
//! A closed channel is the expected end-of-stream signal, not a fault;
//! both errors exist so callers can tell "stop" apart from "this one
//! value was dropped".

use core::fmt;

/// Error returned by [`Chan::send`](crate::Chan::send).
///
/// The channel never hands a rejected value back: a rendezvous value may
/// already have been destroyed by a concurrent `close`, so the failing
/// variants drop the value in place instead of carrying it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SendError {
  /// The channel was closed before the value was delivered.
  Closed,
  /// The shard's buffer was full and the policy is
  /// [`DiscardNewest`](crate::SendPolicy::DiscardNewest); the value was
  /// discarded.
  Full,
}

impl std::error::Error for SendError {}
impl fmt::Display for SendError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SendError::Closed => write!(f, "channel closed"),
      SendError::Full => write!(f, "channel full, value discarded"),
    }
  }
}

/// Error returned by [`Chan::recv`](crate::Chan::recv).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvError {
  /// The channel is closed and the receiving shard has been drained.
  Closed,
}

impl std::error::Error for RecvError {}
impl fmt::Display for RecvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecvError::Closed => write!(f, "channel closed and drained"),
    }
  }
}
