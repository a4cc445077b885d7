//! `discover` and `worker` commands.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use crate::discovery::{
    AssemblyEnumeratorWrapper, DiscoverySink, MessageLevel, MessageLogger, TestCase, UnitTestDiscoverer,
};
use crate::filter::TestCaseFilter;
use crate::loader::ManifestFileOperations;
use crate::settings::{IsolationMode, RunSettings};

use super::{CliError, CliResult, ExitCode};

/// Arguments of `testhost discover`.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    pub assemblies: Vec<PathBuf>,
    pub settings: Option<PathBuf>,
    pub filter: Option<String>,
    pub isolate: bool,
    pub json: bool,
}

/// Prints discovery messages to stderr as they arrive and remembers whether any was an error.
#[derive(Default)]
struct StderrLogger {
    errors: usize,
}

impl MessageLogger for StderrLogger {
    fn send_message(&mut self, level: MessageLevel, message: &str) {
        let prefix = match level {
            MessageLevel::Informational => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => {
                self.errors += 1;
                "error"
            }
        };
        eprintln!("{}: {}", prefix, message);
    }
}

#[derive(Default)]
struct CollectingSink {
    cases: Vec<TestCase>,
}

impl DiscoverySink for CollectingSink {
    fn send_test_case(&mut self, test_case: TestCase) {
        self.cases.push(test_case);
    }
}

/// Discover the tests of every assembly and print them.
///
/// Returns [`ExitCode::DISCOVERY_ERRORS`] when an error-level message was reported.
pub fn discover(options: &DiscoverOptions) -> CliResult<ExitCode> {
    let mut settings = match &options.settings {
        Some(path) => RunSettings::load(path)?,
        None => RunSettings::default(),
    };
    if options.isolate {
        settings = settings.with_isolation(IsolationMode::ChildProcess);
    }

    let filter = options
        .filter
        .as_deref()
        .map(TestCaseFilter::parse)
        .transpose()?;

    let sources: Vec<String> = options.assemblies.iter().map(|p| p.display().to_string()).collect();
    let discoverer = UnitTestDiscoverer::new(AssemblyEnumeratorWrapper::new(Arc::new(ManifestFileOperations)));

    let mut logger = StderrLogger::default();
    let mut sink = CollectingSink::default();
    discoverer.discover_tests(&sources, &settings, &mut logger, &mut sink, filter.as_ref());

    if options.json {
        println!("{}", serde_json::to_string_pretty(&sink.cases)?);
    } else {
        print!("{}", render_cases(&sink.cases));
    }

    if logger.errors > 0 {
        Ok(ExitCode::DISCOVERY_ERRORS)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Serve a controlling `discover --isolate` process.
pub fn worker(pipe: &str, hang_dump_pipe: Option<&str>) -> CliResult<ExitCode> {
    crate::worker::run_worker(pipe, hang_dump_pipe).map_err(CliError::Worker)?;
    Ok(ExitCode::SUCCESS)
}

/// Human-readable listing: test cases grouped under their class, in discovery order.
pub fn render_cases(cases: &[TestCase]) -> String {
    let mut out = String::new();
    let mut current_class: Option<&str> = None;

    for case in cases {
        let class = case.class_name();
        if current_class != Some(class) {
            let _ = writeln!(out, "{}", class);
            current_class = Some(class);
        }

        let _ = write!(out, "  {}", case.display_name);
        if !case.categories.is_empty() {
            let _ = write!(out, " [{}]", case.categories.join(", "));
        }
        if case.ignored {
            out.push_str(" (ignored)");
        }
        out.push('\n');
    }

    let tests = cases.iter().filter(|c| !c.is_fixture()).count();
    let _ = writeln!(out, "{} test{} discovered.", tests, if tests == 1 { "" } else { "s" });
    out
}
