//! Oluk: forward-progress deferred logging for measurement harnesses.
//! Wait-free producers, one I/O thread, bounded hot-path cost.
//!
//! Producers on hot threads never block, lock, open files or format
//! strings: [`log`] appends a closure to a per-thread double-buffered
//! queue and, at most, performs one CAS on a swap-request ring. A single
//! I/O thread periodically swaps and drains those buffers, executing each
//! closure against the [`AsyncLog`] sink where all stringification and
//! output happens.
//!
//! # Guarantees
//!
//! - Entries from one producer are delivered in submission order.
//! - **No** ordering across producers; bake timestamps into the entry if
//!   you need to reconstruct an interleaving.
//! - Producers finish in bounded time regardless of I/O thread progress.
//!   There is no back-pressure: if the consumer stalls, memory grows.
//! - A thread may exit right after logging; its queue is orphaned and
//!   still drained before being destroyed.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! oluk::global().start_io_thread();
//!
//! oluk::log(|log| log.detail("hello from the hot path"));
//!
//! // Entries are picked up on the next poll tick.
//! std::thread::sleep(Duration::from_millis(50));
//! oluk::global().stop_io_thread();
//! ```

#![warn(missing_docs)]

mod error;
mod global;
mod io_thread;
mod logger;
mod queue;
mod registry;
mod ring;
mod signal;
mod sink;
mod util;

pub use error::LogError;
pub use global::{global, log};
pub use logger::{Builder, Logger, ProducerHandle};
pub use queue::LogEntry;
pub use sink::AsyncLog;
