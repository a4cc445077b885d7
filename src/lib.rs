#![forbid(unsafe_code)]
//! Test discovery host.
//!
//! `testhost` finds the tests of reflected test assemblies the way an MSTest-style adapter does: it validates test
//! classes and methods, synthesizes fixture pseudo-tests, and unfolds data-driven tests into one test per data row.
//! Discovery runs behind an isolation boundary, either in process or in a worker process reached over a named pipe
//! (see [`testhost_pipe`]); the worker can be watched for hangs.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli`, `discovery` and
//!   `hangdump` modules enforce `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod cli;
pub mod discovery;
pub mod filter;
pub mod hangdump;
pub mod isolation;
pub mod loader;
pub mod settings;
pub mod worker;

pub use discovery::{
    AssemblyEnumerator, AssemblyEnumeratorWrapper, DiscoveryError, DiscoverySink, MessageLevel, MessageLogger,
    TestCase, UnitTestDiscoverer,
};
pub use filter::{FilterError, TestCaseFilter};
pub use loader::{FileOperations, InMemoryFileOperations, ManifestFileOperations};
pub use settings::{AdapterSettings, HangDumpSettings, IsolationMode, RunSettings};
