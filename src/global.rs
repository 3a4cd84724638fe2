//! Process-wide entry point: one lazily constructed logger, one lazily
//! registered queue per producer thread.

use std::sync::Arc;

use once_cell::race::OnceBox;

use crate::logger::{Logger, ProducerHandle};
use crate::sink::AsyncLog;

/// Global logger instance. Never torn down; the process exit reclaims it.
static GLOBAL: OnceBox<Arc<Logger>> = OnceBox::new();

/// The process-wide logger, built with default configuration on first use.
pub fn global() -> &'static Arc<Logger> {
    GLOBAL.get_or_init(|| Box::new(Logger::builder().build()))
}

thread_local! {
    // Registered on this thread's first log(); dropped on thread exit,
    // which performs the orphan handoff automatically.
    static PRODUCER: ProducerHandle = global().register_producer();
}

/// Submits one deferred entry through the calling thread's queue,
/// creating and registering the queue on first use.
///
/// Wait-free after the first call on a thread. During thread teardown,
/// once the thread-local queue has already been destroyed, the entry is
/// dropped instead of delivered.
pub fn log(entry: impl FnOnce(&mut AsyncLog) + Send + 'static) {
    let _ = PRODUCER.try_with(move |producer| producer.submit(entry));
}
