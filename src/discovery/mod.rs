//! Test discovery.
//!
//! Discovery turns a reflected assembly manifest into an ordered list of [`UnitTestElement`]s plus warnings.
//!
//! ## Pipeline
//!
//! - [`wrapper::AssemblyEnumeratorWrapper`]: pre-flight checks, then runs discovery inside an isolation host.
//! - [`assembly_enumerator::AssemblyEnumerator`]: loads the assembly, walks its types, synthesizes fixture
//!   pseudo-tests, and unfolds data-driven tests into one element per data row.
//! - [`type_enumerator::TypeEnumerator`]: builds one element per valid test method of one type.
//! - [`type_validator::TypeValidator`] and [`method_validator::TestMethodValidator`]: pure predicates.
//! - [`discoverer::UnitTestDiscoverer`]: maps elements to [`test_case::TestCase`]s, applies the filter, and feeds
//!   the discovery sink.
//!
//! ## Notes
//!
//! - Attribute lookups go through a [`reflect::ReflectHelper`] owned by one enumeration call; nothing is cached
//!   across calls, so discovering the same assembly twice yields identical results.
//! - Discovery is single-threaded per assembly. Emission order follows type order, then method order, then data
//!   source declaration order.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod assembly_enumerator;
pub mod data_source;
pub mod deployment;
pub mod discoverer;
pub mod method_validator;
pub mod reflect;
pub mod test_case;
pub mod type_cache;
pub mod type_enumerator;
pub mod type_validator;
pub mod wrapper;

use std::path::PathBuf;

use testhost_pipe::PipeError;
use thiserror::Error;

use crate::hangdump::HangDumpError;
use crate::settings::SettingsError;

pub use assembly_enumerator::AssemblyEnumerator;
pub use discoverer::{DiscoverySink, MessageLevel, MessageLogger, UnitTestDiscoverer};
pub use test_case::TestCase;
pub use testhost_core::{DiscoveryResult, UnitTestElement};
pub use wrapper::AssemblyEnumeratorWrapper;

/// Errors raised while discovering tests in one source.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("test source '{}' was not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("could not read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' is not a valid assembly manifest: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    /// Type loading failed with exactly one loader error; the error is reported as is.
    #[error("{0}")]
    TypeLoad(String),

    /// Type loading failed with several loader errors.
    #[error("unable to load types from '{assembly}': {} loader errors", errors.len())]
    TypeLoadAggregate { assembly: String, errors: Vec<String> },

    #[error("method {type_name}.{method} has wrong signature: {reason}")]
    InvalidFixture {
        type_name: String,
        method: String,
        reason: String,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("isolation host failed: {0}")]
    Isolation(String),

    #[error(transparent)]
    Pipe(#[from] PipeError),

    #[error(transparent)]
    HangDump(#[from] HangDumpError),
}
