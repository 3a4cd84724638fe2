//! The `AsyncLog` sink: where deferred entries finally turn into bytes.
//!
//! The concurrency core drives this type through a deliberately narrow
//! surface — `set_current_pid_tid` before draining a queue and `flush` once
//! per I/O iteration. Everything else is called from user-supplied entry
//! closures, which run exclusively on the I/O thread and may therefore take
//! `&mut self` without any synchronization of their own.

use std::io::{self, Write};
use std::time::Instant;

/// Output sink mutated only by the I/O thread.
///
/// Holds a summary stream, a detail stream, and an optional trace stream.
/// Both log streams default to stderr until [`Logger::start_logging`]
/// installs real ones.
///
/// [`Logger::start_logging`]: crate::Logger::start_logging
pub struct AsyncLog {
    summary: Box<dyn Write + Send>,
    detail: Box<dyn Write + Send>,
    trace: Option<Box<dyn Write + Send>>,
    trace_origin: Instant,
    pid_tid: String,
}

impl AsyncLog {
    pub(crate) fn new() -> Self {
        Self {
            summary: Box::new(io::stderr()),
            detail: Box::new(io::stderr()),
            trace: None,
            trace_origin: Instant::now(),
            pid_tid: String::new(),
        }
    }

    /// Installs the summary and detail output streams.
    pub fn set_log_sinks(
        &mut self,
        summary: Box<dyn Write + Send>,
        detail: Box<dyn Write + Send>,
    ) {
        self.summary = summary;
        self.detail = detail;
    }

    pub(crate) fn reset_log_sinks(&mut self) {
        self.summary = Box::new(io::stderr());
        self.detail = Box::new(io::stderr());
    }

    /// Replaces the trace stream. `None` turns tracing off. `origin` becomes
    /// the zero point for event timestamps.
    pub fn start_new_trace(&mut self, trace: Option<Box<dyn Write + Send>>, origin: Instant) {
        self.trace = trace;
        self.trace_origin = origin;
    }

    /// Sets the producer attribution used by subsequent trace events.
    /// Called by the I/O thread before draining each producer's entries.
    pub fn set_current_pid_tid(&mut self, pid_tid: &str) {
        self.pid_tid.clear();
        self.pid_tid.push_str(pid_tid);
    }

    /// Writes one line to the summary stream.
    pub fn summary(&mut self, msg: &str) {
        let _ = writeln!(self.summary, "{}", msg);
    }

    /// Writes one line to the detail stream.
    pub fn detail(&mut self, msg: &str) {
        let _ = writeln!(self.detail, "{}", msg);
    }

    /// Emits one trace event attributed to the current producer, timestamped
    /// in microseconds since the trace origin. No-op when tracing is off.
    pub fn trace_event(&mut self, name: &str) {
        if let Some(trace) = &mut self.trace {
            let ts = self.trace_origin.elapsed().as_nanos() as f64 / 1_000.0;
            let _ = writeln!(
                trace,
                "{{ \"name\": \"{}\", {}\"ts\": {:.3} }},",
                name, self.pid_tid, ts
            );
        }
    }

    /// Flushes every stream. Write errors are swallowed; there is nowhere
    /// better to report them than the streams that just failed.
    pub(crate) fn flush(&mut self) {
        let _ = self.summary.flush();
        let _ = self.detail.flush();
        if let Some(trace) = &mut self.trace {
            let _ = trace.flush();
        }
    }
}
