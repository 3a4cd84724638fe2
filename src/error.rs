use std::fmt;
use std::io::Write;

/// Typed errors for logger control calls and internal diagnostics
#[derive(Debug, Clone)]
pub enum LogError {
    /// The producer state machine needed more buffer CAS attempts than the
    /// double-buffer protocol allows (a bug, not a load condition)
    ProducerInvariant {
        /// Number of failed attempts observed
        attempts: usize,
    },
    /// The consumer failed to recycle a ring slot it had just read (a bug)
    RingSlotCasAnomaly {
        /// Index of the offending slot
        slot: usize,
    },
    /// More producers are registered than the ring is sized for
    OverCapacity {
        /// Currently registered producer count
        registered: usize,
        /// Configured maximum
        max: usize,
    },
    /// A control call that must wait on the I/O thread was issued from the
    /// I/O thread itself and would deadlock
    FromIoThread,
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::ProducerInvariant { attempts } => {
                write!(f, "submit exceeded the buffer CAS bound ({} attempts)", attempts)
            }
            LogError::RingSlotCasAnomaly { slot } => {
                write!(f, "ring slot {} could not be recycled after read", slot)
            }
            LogError::OverCapacity { registered, max } => {
                write!(
                    f,
                    "{} producers registered, ring sized for {}",
                    registered, max
                )
            }
            LogError::FromIoThread => {
                write!(f, "control call not supported from the I/O thread")
            }
        }
    }
}

impl std::error::Error for LogError {}

/// Synchronous fallback reporting for paths where the async pipeline itself
/// is the thing being diagnosed. Goes straight to stderr.
pub(crate) fn error_sync(msg: &str) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "oluk: {}", msg);
}
