#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Sharded, bounded MPMC channels for coordinating producer and consumer
//! threads.
//!
//! A [`Chan`] is a CSP-style value channel backed by one or more bounded
//! ring buffers ("shards"). Concurrent sends and receives are striped
//! across the shards round-robin, so traffic on different shards never
//! touches the same lock. Each shard delivers its values FIFO; three
//! [`SendPolicy`] options control what happens when a shard's buffer is
//! full, and a zero-capacity blocking channel degenerates to a rendezvous
//! where every send parks until its value is received.
//!
//! ```
//! use strand::{Chan, SendPolicy};
//! use std::thread;
//!
//! let chan = Chan::new(4, SendPolicy::Block);
//!
//! let producer = {
//!   let chan = chan.clone();
//!   thread::spawn(move || {
//!     for i in 0..6 {
//!       chan.send(i).unwrap();
//!     }
//!     chan.close();
//!   })
//! };
//!
//! let mut received = Vec::new();
//! while let Ok(value) = chan.recv() {
//!   received.push(value);
//! }
//! producer.join().unwrap();
//! assert_eq!(received, vec![0, 1, 2, 3, 4, 5]);
//! ```

pub mod chan;
pub mod error;
pub mod telemetry;

// Internal utilities - not part of the public API.
mod coord;
mod internal;

pub use chan::{Chan, SendPolicy};
pub use error::{RecvError, SendError};
