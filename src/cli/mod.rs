//! Command line front end of testhost.
//!
//! ## Commands
//!
//! - `discover <ASSEMBLY>...` - Discover the tests of assembly manifests
//! - `worker --pipe <NAME>` - Serve discovery requests for a controlling process
//!
//! ## Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | every source was discovered |
//! | 1 | discovery finished but reported errors for at least one source |
//! | 2 | the run settings or the filter could not be used |
//! | 3 | the test cases could not be written out |
//! | 4 | the worker lost its controller or could not serve it |
//!
//! Commands return [`CliResult`]; only [`run`] turns a [`CliError`] into a process exit.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::filter::FilterError;
use crate::settings::SettingsError;

/// Process exit status of a testhost command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// Discovery ran to completion but a source reported an error.
    pub const DISCOVERY_ERRORS: ExitCode = ExitCode(1);
    pub const INVALID_INPUT: ExitCode = ExitCode(2);
    pub const OUTPUT_FAILED: ExitCode = ExitCode(3);
    pub const WORKER_FAILED: ExitCode = ExitCode(4);
}

/// Why a testhost command stopped before it could report its tests.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid run settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("invalid test case filter: {0}")]
    Filter(#[from] FilterError),

    #[error("could not write test cases: {0}")]
    Output(#[from] serde_json::Error),

    #[error("worker failed: {0}")]
    Worker(#[source] DiscoveryError),
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Settings(_) | CliError::Filter(_) => ExitCode::INVALID_INPUT,
            CliError::Output(_) => ExitCode::OUTPUT_FAILED,
            CliError::Worker(_) => ExitCode::WORKER_FAILED,
        }
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Test discovery host
#[derive(Parser, Debug)]
#[command(name = "testhost")]
#[command(version = VERSION)]
#[command(about = "Discover tests in reflected test assemblies", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover the tests of one or more assembly manifests
    Discover {
        /// Assembly manifests to discover
        #[arg(value_name = "ASSEMBLY", required = true)]
        assemblies: Vec<PathBuf>,
        /// Run settings file (TOML)
        #[arg(long, value_name = "FILE")]
        settings: Option<PathBuf>,
        /// Test case filter, e.g. "TestCategory=fast&Priority!=3"
        #[arg(long, value_name = "EXPR")]
        filter: Option<String>,
        /// Discover in a worker process
        #[arg(long)]
        isolate: bool,
        /// Print test cases as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve discovery requests on a pipe (started by `discover --isolate`)
    #[command(hide = true)]
    Worker {
        /// Discovery pipe to bind
        #[arg(long, value_name = "NAME")]
        pipe: String,
        /// Hang-dump controller pipe to report activity to
        #[arg(long, value_name = "NAME")]
        hang_dump_pipe: Option<String>,
    },
}

/// Parse the command line, run the command and exit with its status.
pub fn run() {
    let cli = Cli::parse();

    let exit_code = match execute(cli) {
        Ok(exit_code) => exit_code,
        Err(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    if exit_code != ExitCode::SUCCESS {
        process::exit(exit_code.0);
    }
}

fn execute(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Command::Discover {
            assemblies,
            settings,
            filter,
            isolate,
            json,
        } => commands::discover(&commands::DiscoverOptions {
            assemblies,
            settings,
            filter,
            isolate,
            json,
        }),
        Command::Worker { pipe, hang_dump_pipe } => commands::worker(&pipe, hang_dump_pipe.as_deref()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::filter::TestCaseFilter;
    use crate::settings::RunSettings;

    #[test]
    fn test_cli_parse_discover() {
        let cli = Cli::try_parse_from([
            "testhost",
            "discover",
            "a.json",
            "b.json",
            "--filter",
            "TestCategory=fast",
            "--isolate",
        ])
        .unwrap();
        if let Command::Discover {
            assemblies,
            filter,
            isolate,
            json,
            settings,
        } = cli.command
        {
            assert_eq!(assemblies, vec![PathBuf::from("a.json"), PathBuf::from("b.json")]);
            assert_eq!(filter.as_deref(), Some("TestCategory=fast"));
            assert!(isolate);
            assert!(!json);
            assert!(settings.is_none());
        } else {
            panic!("Expected Discover command");
        }
    }

    #[test]
    fn test_cli_discover_requires_an_assembly() {
        assert!(Cli::try_parse_from(["testhost", "discover"]).is_err());
    }

    #[test]
    fn test_input_errors_and_worker_failures_have_distinct_exit_codes() {
        let filter = CliError::from(TestCaseFilter::parse("   ").unwrap_err());
        assert_eq!(filter.exit_code(), ExitCode::INVALID_INPUT);
        assert!(filter.to_string().starts_with("invalid test case filter: "), "{filter}");

        let settings = CliError::from(RunSettings::from_toml_str("[adapter]\nunknown = 1").unwrap_err());
        assert_eq!(settings.exit_code(), ExitCode::INVALID_INPUT);

        let worker = CliError::Worker(DiscoveryError::FileNotFound(PathBuf::from("/bin/Gone.dll")));
        assert_eq!(worker.exit_code(), ExitCode::WORKER_FAILED);
        assert_ne!(ExitCode::DISCOVERY_ERRORS, ExitCode::SUCCESS);
    }

    #[test]
    fn test_cli_parse_worker() {
        let cli = Cli::try_parse_from(["testhost", "worker", "--pipe", "p1", "--hang-dump-pipe", "p2"]).unwrap();
        if let Command::Worker { pipe, hang_dump_pipe } = cli.command {
            assert_eq!(pipe, "p1");
            assert_eq!(hang_dump_pipe.as_deref(), Some("p2"));
        } else {
            panic!("Expected Worker command");
        }
    }
}
