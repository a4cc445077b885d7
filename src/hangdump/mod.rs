//! Hang detection for worker processes.
//!
//! Two cooperating halves talk over the pipe transport:
//!
//! - [`HangDumpProcessLifetimeHandler`] lives in the controller. It listens on a pipe, waits for the worker's
//!   handshake, then feeds every activity message to a watchdog running on a dedicated OS thread. When no activity
//!   arrives within the timeout, the watchdog asks the worker for its in-progress tests, writes them next to the dump,
//!   collects the dump and terminates the worker.
//! - [`HangDumpActivityIndicator`] lives in the worker. It connects to the controller, announces its own consumer
//!   pipe and process id, reports test-state updates, and answers snapshot requests.
//!
//! A [`messages::SessionEnd`] message tells the watchdog the worker is shutting down cleanly.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod dump;
pub mod indicator;
pub mod lifetime;
pub mod messages;

use std::path::PathBuf;
use std::time::Duration;

use testhost_pipe::PipeError;
use thiserror::Error;

pub use dump::{CommandDumpCollector, DumpCollector, ProcessTerminator, SystemProcessTerminator};
pub use indicator::HangDumpActivityIndicator;
pub use lifetime::{HangDumpProcessLifetimeHandler, HangReport, WatchdogOutcome};

/// Errors raised by hang detection.
#[derive(Debug, Error)]
pub enum HangDumpError {
    /// A coordination step did not finish in time. Distinct from cancellation.
    #[error("timed out after {timeout:?} waiting to {operation}")]
    OperationTimeout { operation: &'static str, timeout: Duration },

    #[error(transparent)]
    Pipe(#[from] PipeError),

    #[error("could not write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dump collection failed: {0}")]
    Dump(String),

    #[error("could not terminate process {process_id}: {reason}")]
    Terminate { process_id: u32, reason: String },

    #[error("hang-dump watchdog failed: {0}")]
    Watchdog(String),
}

/// Map a transport timeout to [`HangDumpError::OperationTimeout`]; anything else stays a pipe error.
fn timeout_as(operation: &'static str) -> impl Fn(PipeError) -> HangDumpError {
    move |error| match error {
        PipeError::Timeout(timeout) => HangDumpError::OperationTimeout { operation, timeout },
        other => HangDumpError::Pipe(other),
    }
}
